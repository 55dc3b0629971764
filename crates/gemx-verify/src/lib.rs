//! Host-side reference GEMM and result verification.
//!
//! Everything here is pure: results are recomputed from the host operands
//! with 128-bit accumulation and the accelerator's quantization rule, then
//! compared element-wise. No backend is involved, so these checks run the
//! same with or without hardware.

pub mod reference;
pub mod verify;

pub use reference::{check_shapes, reference_gemm, reference_values};
pub use verify::{MatchResult, Verifier, verify};
