//! Scenario implementations.

use anyhow::{Context, Result};
use gemx_common::{AcceleratorConfig, EngineId, Matrix, PostScale};
use gemx_runtime::{ComputeBackend, Coordinator};
use gemx_verify::Verifier;

use crate::report::Check;

mod basic;
mod chain;
mod perf;

pub use basic::BasicCommand;
pub use chain::{ChainCommand, ChainPerfCommand};
pub use perf::PerfCommand;

/// Settings shared by every scenario.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: AcceleratorConfig,
    pub seed: u64,
}

impl RunContext {
    pub fn new(config: AcceleratorConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    pub(crate) fn verifier(&self) -> Verifier {
        Verifier::new(self.config.quantization_rule())
    }
}

/// Operands of one GEMM as sent to the device.
pub(crate) struct GemmCase {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    pub bias: Option<Matrix>,
    pub post: PostScale,
}

impl GemmCase {
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.a.rows(), self.a.cols(), self.b.cols())
    }

    /// `2mkn + 3mn` and `2mkn`.
    pub fn operation_counts(&self) -> (u64, u64) {
        let (m, k, n) = self.dims();
        let parallel = (2 * m * k * n) as u64;
        (parallel + (3 * m * n) as u64, parallel)
    }

    pub fn send<B: ComputeBackend>(
        &self,
        coord: &mut Coordinator<B>,
        engine: EngineId,
    ) -> Result<()> {
        for m in [&self.a, &self.b, &self.c].into_iter().chain(self.bias.as_ref()) {
            coord
                .send(m, engine)
                .with_context(|| format!("failed to send {} to {engine}", m.id()))?;
        }
        Ok(())
    }

    pub fn add<B: ComputeBackend>(
        &self,
        coord: &mut Coordinator<B>,
        engine: EngineId,
    ) -> Result<usize> {
        coord
            .add_gemm_on(
                engine,
                &self.a,
                &self.b,
                &self.c,
                self.bias.as_ref(),
                self.post.scale,
                self.post.shift,
            )
            .context("failed to append GEMM")
    }

    pub fn release<B: ComputeBackend>(
        &self,
        coord: &mut Coordinator<B>,
        engine: EngineId,
    ) -> Result<()> {
        for m in [&self.a, &self.b, &self.c].into_iter().chain(self.bias.as_ref()) {
            if let Some(handle) = coord.handle_of(m, engine) {
                coord.release(handle)?;
            }
        }
        Ok(())
    }

    pub fn check(
        &self,
        ctx: &RunContext,
        label: impl Into<String>,
        engine: EngineId,
    ) -> Result<Check> {
        let result = ctx
            .verifier()
            .verify(&self.c, &self.a, &self.b, self.bias.as_ref(), self.post)
            .context("verification rejected operands")?;
        Ok(Check { label: label.into(), engine, dims: self.dims(), result })
    }
}
