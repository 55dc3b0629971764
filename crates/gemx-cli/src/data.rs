//! Seeded operand generation.

use std::ops::Range;

use gemx_common::{Matrix, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic source of random operand matrices.
#[derive(Debug, Clone)]
pub struct MatrixGen {
    rng: ChaCha8Rng,
}

impl MatrixGen {
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// `rows×cols` of `i16` drawn uniformly from `range` (all zeros if the
    /// range is empty).
    pub fn i16(&mut self, rows: usize, cols: usize, range: Range<i16>) -> Result<Matrix> {
        let values = if range.is_empty() {
            vec![0; rows * cols]
        } else {
            (0..rows * cols).map(|_| self.rng.random_range(range.clone())).collect()
        };
        Matrix::from_i16(rows, cols, values)
    }

    /// `rows×cols` of `i32` drawn uniformly from `range`.
    pub fn i32(&mut self, rows: usize, cols: usize, range: Range<i32>) -> Result<Matrix> {
        let values = if range.is_empty() {
            vec![0; rows * cols]
        } else {
            (0..rows * cols).map(|_| self.rng.random_range(range.clone())).collect()
        };
        Matrix::from_i32(rows, cols, values)
    }
}

/// `-r..r`, the half-open symmetric range. `r` must not be negative.
pub fn symmetric<T: std::ops::Neg<Output = T> + Copy>(r: T) -> Range<T> {
    -r..r
}
