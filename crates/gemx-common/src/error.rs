//! Error types shared across the GEMX host runtime.

use std::fmt;

use thiserror::Error;

use crate::types::{BufferHandle, ElementType, EngineId, MatrixId, Shape};

/// Which slot of a GEMM operation an operand occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRole {
    A,
    B,
    C,
    Bias,
}

impl fmt::Display for OperandRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::Bias => write!(f, "bias"),
        }
    }
}

/// Errors produced by the registry, graph builder and coordinator.
///
/// Everything up to and including [`GemxError::CapacityExceeded`] is raised
/// while registering buffers or building a graph and can be fixed and
/// retried by the caller. [`GemxError::BackendUnavailable`] and
/// [`GemxError::ExecutionFault`] come out of `execute` and invalidate the
/// whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GemxError {
    #[error("shape mismatch for {role}: expected {expected}, got {actual}")]
    ShapeMismatch { role: OperandRole, expected: Shape, actual: Shape },

    #[error("element type mismatch for {role}: expected {expected}, got {actual}")]
    ElementTypeMismatch { role: OperandRole, expected: ElementType, actual: ElementType },

    #[error("operand {role} ({matrix}) is not registered on engine {engine}")]
    UnregisteredOperand { role: OperandRole, matrix: MatrixId, engine: EngineId },

    #[error("invalid buffer handle {0}")]
    InvalidHandle(BufferHandle),

    #[error("handle {handle} is bound to {bound}, not {given}")]
    HandleMatrixMismatch { handle: BufferHandle, bound: MatrixId, given: MatrixId },

    #[error("engine {engine} does not exist (configured engines: {count})")]
    InvalidEngine { engine: EngineId, count: usize },

    #[error(
        "device memory exhausted on engine {engine}: requested {requested} bytes, \
         {available} of {capacity} bytes free"
    )]
    CapacityExceeded { engine: EngineId, requested: usize, available: usize, capacity: usize },

    #[error("compute backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("execution fault on {engine} at operation {index}: {reason}")]
    ExecutionFault { engine: EngineId, index: usize, reason: String },

    #[error("invalid matrix: {0}")]
    InvalidMatrix(String),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, GemxError>;

impl GemxError {
    /// Errors raised at build/register time that the caller may fix and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::BackendUnavailable(_) | Self::ExecutionFault { .. })
    }
}
