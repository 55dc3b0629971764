//! Identifier and descriptor types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ── Identity ────────────────────────────────────────────────────────────────

static NEXT_MATRIX_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a host [`crate::Matrix`].
///
/// Two matrices with identical contents still have different ids; the
/// registry keys device buffers on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatrixId(u64);

impl MatrixId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MATRIX_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "matrix#{}", self.0)
    }
}

/// Index of a compute partition (PE) on the accelerator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EngineId(pub usize);

impl EngineId {
    pub const DEFAULT: EngineId = EngineId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PE{}", self.0)
    }
}

impl From<usize> for EngineId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// Opaque reference to a device-resident buffer on one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle {
    engine: EngineId,
    slot: u64,
}

impl BufferHandle {
    pub fn new(engine: EngineId, slot: u64) -> Self {
        Self { engine, slot }
    }

    pub fn engine(self) -> EngineId {
        self.engine
    }

    pub fn slot(self) -> u64 {
        self.slot
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:buf{}", self.engine, self.slot)
    }
}

// ── Shape / element type ────────────────────────────────────────────────────

/// Row-major 2-D extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub const fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl From<(usize, usize)> for Shape {
    fn from((rows, cols): (usize, usize)) -> Self {
        Self { rows, cols }
    }
}

/// Element types the accelerator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Operand and output element.
    I16,
    /// Bias element.
    I32,
}

impl ElementType {
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::I16 => 2,
            Self::I32 => 4,
        }
    }

    /// Inclusive range of representable values.
    pub const fn bounds(self) -> (i64, i64) {
        match self {
            Self::I16 => (i16::MIN as i64, i16::MAX as i64),
            Self::I32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
        }
    }
}
