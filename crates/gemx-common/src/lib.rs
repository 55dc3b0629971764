//! Common types, errors and configuration for the GEMX host runtime.
//!
//! This crate holds the pieces shared by the runtime, the reference
//! verifier and the scenario runner: strongly typed matrices, buffer and
//! engine identifiers, the post-accumulation quantization rule, the error
//! taxonomy and the accelerator configuration.

pub mod config;
pub mod error;
pub mod matrix;
pub mod quant;
pub mod types;

pub use config::{AcceleratorConfig, ConfigError};
pub use error::{GemxError, OperandRole, Result};
pub use matrix::{Matrix, MatrixData};
pub use quant::{BiasStage, PostScale, QuantizationRule, RoundingMode, saturate_i16, shift_right};
pub use types::{BufferHandle, ElementType, EngineId, MatrixId, Shape};
