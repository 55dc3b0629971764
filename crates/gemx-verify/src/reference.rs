//! Exact reference transform.

use gemx_common::{
    ElementType, GemxError, Matrix, OperandRole, PostScale, QuantizationRule, Result, Shape,
};

/// Shape and element-type contract for `A: m×k (i16)`, `B: k×n (i16)` and
/// an optional `bias: m×n (i32)`. Returns the output shape.
pub fn check_shapes(a: &Matrix, b: &Matrix, bias: Option<&Matrix>) -> Result<Shape> {
    for (role, m) in [(OperandRole::A, a), (OperandRole::B, b)] {
        if m.element_type() != ElementType::I16 {
            return Err(GemxError::ElementTypeMismatch {
                role,
                expected: ElementType::I16,
                actual: m.element_type(),
            });
        }
    }
    if a.cols() != b.rows() {
        return Err(GemxError::ShapeMismatch {
            role: OperandRole::B,
            expected: Shape::new(a.cols(), b.cols()),
            actual: b.shape(),
        });
    }

    let out = Shape::new(a.rows(), b.cols());
    if let Some(bias) = bias {
        if bias.element_type() != ElementType::I32 {
            return Err(GemxError::ElementTypeMismatch {
                role: OperandRole::Bias,
                expected: ElementType::I32,
                actual: bias.element_type(),
            });
        }
        if bias.shape() != out {
            return Err(GemxError::ShapeMismatch {
                role: OperandRole::Bias,
                expected: out,
                actual: bias.shape(),
            });
        }
    }
    Ok(out)
}

/// Expected output elements, row-major.
pub fn reference_values(
    a: &Matrix,
    b: &Matrix,
    bias: Option<&Matrix>,
    post: PostScale,
    rule: QuantizationRule,
) -> Result<Vec<i16>> {
    let out = check_shapes(a, b, bias)?;
    let k = a.cols();
    let mut values = Vec::with_capacity(out.len());
    for i in 0..out.rows {
        for j in 0..out.cols {
            let acc: i128 = (0..k).map(|l| i128::from(a.get(i, l)) * i128::from(b.get(l, j))).sum();
            let bias = bias.map_or(0, |m| i128::from(m.get(i, j)));
            values.push(rule.apply(acc, bias, post));
        }
    }
    Ok(values)
}

/// Expected output as a fresh `i16` matrix.
pub fn reference_gemm(
    a: &Matrix,
    b: &Matrix,
    bias: Option<&Matrix>,
    post: PostScale,
    rule: QuantizationRule,
) -> Result<Matrix> {
    let values = reference_values(a, b, bias, post, rule)?;
    Matrix::from_i16(a.rows(), b.cols(), values)
}
