//! Per-engine operation graph.
//!
//! Building a graph is pure bookkeeping: [`OperationGraph::add_gemm`]
//! validates operand types, shapes and registration against the engine's
//! [`BufferRegistry`] and appends a [`GemmOp`]. Nothing touches the device
//! until the coordinator executes the graph, which is what lets many
//! operations share a single dispatch.

use gemx_common::{
    BufferHandle, ElementType, EngineId, GemxError, Matrix, MatrixId, OperandRole, PostScale,
    Result, Shape,
};
use tracing::trace;

use crate::registry::BufferRegistry;

/// A registered operand as captured at append time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub matrix: MatrixId,
    pub handle: BufferHandle,
    pub shape: Shape,
    pub element_type: ElementType,
}

/// One `C = post(A·B + bias)` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemmOp {
    pub a: Operand,
    pub b: Operand,
    pub c: Operand,
    pub bias: Option<Operand>,
    pub post: PostScale,
    pub engine: EngineId,
}

impl GemmOp {
    /// `(m, k, n)` for `A: m×k`, `B: k×n`.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.a.shape.rows, self.a.shape.cols, self.b.shape.cols)
    }

    /// Operation count used for throughput figures: the multiply-adds plus
    /// bias, scale and shift per output element.
    pub fn total_operations(&self) -> u64 {
        let (m, k, n) = self.dims();
        (2 * m * k * n + 3 * m * n) as u64
    }

    /// Operations that run on the systolic array.
    pub fn parallel_operations(&self) -> u64 {
        let (m, k, n) = self.dims();
        (2 * m * k * n) as u64
    }

    /// Handles this operation reads.
    pub fn inputs(&self) -> impl Iterator<Item = &Operand> {
        [Some(&self.a), Some(&self.b), self.bias.as_ref()].into_iter().flatten()
    }
}

/// Check element types and the `A: m×k, B: k×n, C: m×n, bias: m×n` contract.
pub fn validate_gemm(a: &Matrix, b: &Matrix, c: &Matrix, bias: Option<&Matrix>) -> Result<()> {
    for (role, m, expected) in [
        (OperandRole::A, a, ElementType::I16),
        (OperandRole::B, b, ElementType::I16),
        (OperandRole::C, c, ElementType::I16),
    ]
    .into_iter()
    .chain(bias.map(|m| (OperandRole::Bias, m, ElementType::I32)))
    {
        if m.element_type() != expected {
            return Err(GemxError::ElementTypeMismatch {
                role,
                expected,
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
    if c.shape() != out {
        return Err(GemxError::ShapeMismatch {
            role: OperandRole::C,
            expected: out,
            actual: c.shape(),
        });
    }
    if let Some(bias) = bias
        && bias.shape() != out
    {
        return Err(GemxError::ShapeMismatch {
            role: OperandRole::Bias,
            expected: out,
            actual: bias.shape(),
        });
    }
    Ok(())
}

/// Ordered list of GEMM operations for one engine.
#[derive(Debug, Clone, Default)]
pub struct OperationGraph {
    engine: EngineId,
    ops: Vec<GemmOp>,
}

impl OperationGraph {
    pub fn new(engine: EngineId) -> Self {
        Self { engine, ops: Vec::new() }
    }

    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// Validate and append an operation; returns its index in the graph.
    ///
    /// Every operand must already be registered in `registry`, which must
    /// belong to this graph's engine.
    pub fn add_gemm(
        &mut self,
        registry: &BufferRegistry,
        a: &Matrix,
        b: &Matrix,
        c: &Matrix,
        bias: Option<&Matrix>,
        post: PostScale,
    ) -> Result<usize> {
        debug_assert_eq!(registry.engine(), self.engine);
        validate_gemm(a, b, c, bias)?;

        let engine = self.engine;
        let operand = |role: OperandRole, m: &Matrix| -> Result<Operand> {
            let handle = registry.lookup(m.id()).ok_or(GemxError::UnregisteredOperand {
                role,
                matrix: m.id(),
                engine,
            })?;
            Ok(Operand { matrix: m.id(), handle, shape: m.shape(), element_type: m.element_type() })
        };

        let op = GemmOp {
            a: operand(OperandRole::A, a)?,
            b: operand(OperandRole::B, b)?,
            c: operand(OperandRole::C, c)?,
            bias: bias.map(|m| operand(OperandRole::Bias, m)).transpose()?,
            post,
            engine,
        };

        trace!(engine = %self.engine, index = self.ops.len(), dims = ?op.dims(), "appended GEMM");
        self.ops.push(op);
        Ok(self.ops.len() - 1)
    }

    pub fn ops(&self) -> &[GemmOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Sum of [`GemmOp::total_operations`] over the graph.
    pub fn total_operations(&self) -> u64 {
        self.ops.iter().map(GemmOp::total_operations).sum()
    }

    /// Sum of [`GemmOp::parallel_operations`] over the graph.
    pub fn parallel_operations(&self) -> u64 {
        self.ops.iter().map(GemmOp::parallel_operations).sum()
    }
}
