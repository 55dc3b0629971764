//! Host runtime for the GEMX matrix-multiply accelerator.
//!
//! Matrices are registered per engine in a [`BufferRegistry`], GEMM
//! operations are accumulated into an [`OperationGraph`], and the
//! [`Coordinator`] submits a whole graph to a [`ComputeBackend`] as one
//! batch.
//!
//! ```no_run
//! use gemx_common::{AcceleratorConfig, ElementType, EngineId, Matrix};
//! use gemx_runtime::Coordinator;
//!
//! # fn main() -> gemx_common::Result<()> {
//! let mut coord = Coordinator::simulated(AcceleratorConfig::default());
//! let a = Matrix::from_rows_i16(&[&[1, 2], &[3, 4]])?;
//! let b = Matrix::from_rows_i16(&[&[5, 6], &[7, 8]])?;
//! let mut c = Matrix::zeros((2, 2), ElementType::I16)?;
//! for m in [&a, &b, &c] {
//!     coord.send(m, EngineId::DEFAULT)?;
//! }
//! coord.add_gemm(&a, &b, &c, None, 1, 0)?;
//! coord.execute(None)?;
//! coord.retrieve(&mut c, EngineId::DEFAULT)?;
//! assert_eq!(c.as_i16(), Some(&[19, 22, 43, 50][..]));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod coordinator;
pub mod graph;
pub mod memory;
pub mod registry;
pub mod sim;
pub mod timing;

pub use backend::{BufferRef, ComputeBackend, GemmInstruction};
pub use coordinator::Coordinator;
pub use graph::{GemmOp, Operand, OperationGraph, validate_gemm};
pub use memory::{DeviceArena, Region};
pub use registry::{BufferRegistry, DeviceBuffer, RegistryStats};
pub use sim::SimulatedBackend;
pub use timing::{ExecutionTimeline, PerfReport, Stage};
