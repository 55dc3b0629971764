//! Strongly typed host matrices.
//!
//! A [`Matrix`] owns row-major storage tagged with an [`ElementType`] and a
//! process-unique [`MatrixId`]. The id, not the contents, is what the buffer
//! registry binds device memory to, so `Matrix` is deliberately not `Clone`;
//! use [`Matrix::duplicate`] to obtain a copy with a fresh identity.

use std::fmt;

use crate::error::{GemxError, Result};
use crate::types::{ElementType, MatrixId, Shape};

/// Typed row-major storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixData {
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl MatrixData {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::I16(_) => ElementType::I16,
            Self::I32(_) => ElementType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A host-side 2-D matrix with identity.
pub struct Matrix {
    id: MatrixId,
    shape: Shape,
    data: MatrixData,
}

impl Matrix {
    /// Build a matrix, checking that `data` holds exactly `rows * cols`
    /// elements.
    pub fn new(shape: impl Into<Shape>, data: MatrixData) -> Result<Self> {
        let shape = shape.into();
        if shape.is_empty() {
            return Err(GemxError::InvalidMatrix(format!("empty shape {shape}")));
        }
        if data.len() != shape.len() {
            return Err(GemxError::InvalidMatrix(format!(
                "{shape} {} matrix needs {} elements, got {}",
                data.element_type(),
                shape.len(),
                data.len()
            )));
        }
        Ok(Self { id: MatrixId::next(), shape, data })
    }

    pub fn from_i16(rows: usize, cols: usize, values: Vec<i16>) -> Result<Self> {
        Self::new((rows, cols), MatrixData::I16(values))
    }

    pub fn from_i32(rows: usize, cols: usize, values: Vec<i32>) -> Result<Self> {
        Self::new((rows, cols), MatrixData::I32(values))
    }

    /// Build an `i16` matrix from row slices; all rows must have equal length.
    pub fn from_rows_i16(rows: &[&[i16]]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        if let Some(bad) = rows.iter().position(|r| r.len() != cols) {
            return Err(GemxError::InvalidMatrix(format!(
                "row {bad} has {} columns, expected {cols}",
                rows[bad].len()
            )));
        }
        Self::from_i16(rows.len(), cols, rows.concat())
    }

    /// Zero-filled matrix of the given element type.
    pub fn zeros(shape: impl Into<Shape>, element_type: ElementType) -> Result<Self> {
        let shape = shape.into();
        let data = match element_type {
            ElementType::I16 => MatrixData::I16(vec![0; shape.len()]),
            ElementType::I32 => MatrixData::I32(vec![0; shape.len()]),
        };
        Self::new(shape, data)
    }

    /// Copy of this matrix with a new identity.
    pub fn duplicate(&self) -> Self {
        Self { id: MatrixId::next(), shape: self.shape, data: self.data.clone() }
    }

    pub fn id(&self) -> MatrixId {
        self.id
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows
    }

    pub fn cols(&self) -> usize {
        self.shape.cols
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn data(&self) -> &MatrixData {
        &self.data
    }

    pub fn as_i16(&self) -> Option<&[i16]> {
        match &self.data {
            MatrixData::I16(v) => Some(v),
            MatrixData::I32(_) => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            MatrixData::I32(v) => Some(v),
            MatrixData::I16(_) => None,
        }
    }

    /// Element at `(row, col)` widened to `i64`.
    ///
    /// # Panics
    /// Panics if the index is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> i64 {
        assert!(
            row < self.shape.rows && col < self.shape.cols,
            "index ({row}, {col}) out of bounds for {}",
            self.shape
        );
        let idx = row * self.shape.cols + col;
        match &self.data {
            MatrixData::I16(v) => i64::from(v[idx]),
            MatrixData::I32(v) => i64::from(v[idx]),
        }
    }

    /// Size of the storage in bytes.
    pub fn byte_len(&self) -> usize {
        self.shape.len() * self.element_type().size_bytes()
    }

    /// Native-endian view of the storage.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            MatrixData::I16(v) => bytemuck::cast_slice(v),
            MatrixData::I32(v) => bytemuck::cast_slice(v),
        }
    }

    /// Overwrite the storage from a native-endian byte image.
    ///
    /// `bytes` must be exactly [`Matrix::byte_len`] long.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.byte_len() {
            return Err(GemxError::InvalidMatrix(format!(
                "byte image of {} bytes does not fit {} {} matrix ({} bytes)",
                bytes.len(),
                self.shape,
                self.element_type(),
                self.byte_len()
            )));
        }
        match &mut self.data {
            MatrixData::I16(v) => bytemuck::cast_slice_mut::<i16, u8>(v).copy_from_slice(bytes),
            MatrixData::I32(v) => bytemuck::cast_slice_mut::<i32, u8>(v).copy_from_slice(bytes),
        }
        Ok(())
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("element_type", &self.element_type())
            .finish_non_exhaustive()
    }
}
