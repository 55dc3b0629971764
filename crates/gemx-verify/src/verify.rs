//! Element-wise comparison against the reference transform.

use std::fmt;

use gemx_common::{
    ElementType, GemxError, Matrix, OperandRole, PostScale, QuantizationRule, Result,
};
use serde::Serialize;
use tracing::debug;

use crate::reference::{check_shapes, reference_values};

/// Outcome of a verification. A mismatch is a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchResult {
    Match,
    Mismatch {
        /// Elements outside the tolerance.
        count: usize,
        /// `(row, col)` of the first such element in row-major order.
        first_index: (usize, usize),
        expected: i16,
        actual: i16,
    },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match)
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Match => f.write_str("match"),
            MatchResult::Mismatch { count, first_index: (r, c), expected, actual } => write!(
                f,
                "{count} mismatching element(s); first at ({r}, {c}): \
                 expected {expected}, got {actual}"
            ),
        }
    }
}

/// Reference checker bound to a quantization rule and tolerance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verifier {
    rule: QuantizationRule,
    tolerance: u32,
}

impl Verifier {
    pub fn new(rule: QuantizationRule) -> Self {
        Self { rule, tolerance: 0 }
    }

    /// Largest accepted absolute difference. `0` demands bit-exact output.
    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn rule(&self) -> QuantizationRule {
        self.rule
    }

    pub fn tolerance(&self) -> u32 {
        self.tolerance
    }

    /// Compare `actual` against `post(A·B + bias)`.
    ///
    /// Operand shape or type violations are errors; differing values are
    /// reported through [`MatchResult::Mismatch`].
    pub fn verify(
        &self,
        actual: &Matrix,
        a: &Matrix,
        b: &Matrix,
        bias: Option<&Matrix>,
        post: PostScale,
    ) -> Result<MatchResult> {
        let out = check_shapes(a, b, bias)?;
        let values = actual.as_i16().ok_or(GemxError::ElementTypeMismatch {
            role: OperandRole::C,
            expected: ElementType::I16,
            actual: actual.element_type(),
        })?;
        if actual.shape() != out {
            return Err(GemxError::ShapeMismatch {
                role: OperandRole::C,
                expected: out,
                actual: actual.shape(),
            });
        }

        let expected = reference_values(a, b, bias, post, self.rule)?;
        let result = self.compare(&expected, values, out.cols);
        debug!(matrix = %actual.id(), shape = %out, %result, "verified");
        Ok(result)
    }

    /// Compare two row-major buffers of equal length.
    pub fn compare(&self, expected: &[i16], actual: &[i16], cols: usize) -> MatchResult {
        let tolerance = i32::try_from(self.tolerance).unwrap_or(i32::MAX);
        let mut bad = expected
            .iter()
            .zip(actual)
            .enumerate()
            .filter(|(_, (e, a))| (i32::from(**e) - i32::from(**a)).abs() > tolerance);

        let Some((first, (&e, &a))) = bad.next() else {
            return MatchResult::Match;
        };
        let cols = cols.max(1);
        MatchResult::Mismatch {
            count: 1 + bad.count(),
            first_index: (first / cols, first % cols),
            expected: e,
            actual: a,
        }
    }
}

/// Verify with the default quantization rule.
pub fn verify(
    actual: &Matrix,
    a: &Matrix,
    b: &Matrix,
    bias: Option<&Matrix>,
    scale: i32,
    shift: u32,
    tolerance: u32,
) -> Result<MatchResult> {
    Verifier::default()
        .with_tolerance(tolerance)
        .verify(actual, a, b, bias, PostScale::new(scale, shift))
}
