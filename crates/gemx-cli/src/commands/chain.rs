//! Chained GEMMs: later operations consume earlier outputs inside one batch.

use anyhow::{Context, Result, ensure};
use clap::Args;
use gemx_common::{ElementType, EngineId, Matrix, PostScale};
use gemx_runtime::Coordinator;
use tracing::info;

use super::{GemmCase, RunContext};
use crate::data::{MatrixGen, symmetric};
use crate::report::{Check, ScenarioReport};

/// Two-deep chain `C = A·B + b0`, `E = D·C + b1`.
#[derive(Args, Debug, Clone)]
pub struct ChainCommand {
    /// Operand values are drawn from `-RANGE..RANGE`
    #[arg(
        long,
        default_value = "32764",
        value_name = "RANGE",
        value_parser = clap::value_parser!(i16).range(1..)
    )]
    pub range: i16,

    #[arg(short, default_value = "512")]
    pub m: usize,

    #[arg(short, default_value = "512")]
    pub k: usize,

    #[arg(short, default_value = "128")]
    pub n: usize,

    /// Add random bias matrices instead of zeros
    #[arg(long)]
    pub bias: bool,
}

impl ChainCommand {
    pub fn run(&self, ctx: &RunContext) -> Result<ScenarioReport> {
        let (m, k, n) = (self.m, self.k, self.n);
        let mut report = ScenarioReport::new("chain", ctx.seed);
        let mut coord = Coordinator::simulated(ctx.config.clone());
        let mut data = MatrixGen::new(ctx.seed);
        let engine = EngineId::DEFAULT;
        let range = symmetric(self.range);
        let bias_range = if self.bias { symmetric(i32::from(self.range)) } else { 0..0 };
        info!(m, k, n, bias = self.bias, "two-deep chain");

        let mut first = GemmCase {
            a: data.i16(m, k, range.clone())?,
            b: data.i16(k, n, range.clone())?,
            c: Matrix::zeros((m, n), ElementType::I16)?,
            bias: Some(data.i32(m, n, bias_range.clone())?),
            post: PostScale::IDENTITY,
        };
        let d = data.i16(m, m, range)?;
        let mut e = Matrix::zeros((m, n), ElementType::I16)?;
        let b1 = data.i32(m, n, bias_range)?;

        first.send(&mut coord, engine)?;
        for mat in [&d, &e, &b1] {
            coord.send(mat, engine)?;
        }
        first.add(&mut coord, engine)?;
        coord
            .add_gemm(&d, &first.c, &e, Some(&b1), 1, 0)
            .context("failed to append chained GEMM")?;
        coord.execute(Some(engine)).context("chain execution failed")?;
        coord.retrieve(&mut first.c, engine)?;
        coord.retrieve(&mut e, engine)?;

        report.checks.push(first.check(ctx, "C = A*B + b0", engine)?);
        let second = GemmCase { a: d, b: first.c, c: e, bias: Some(b1), post: PostScale::IDENTITY };
        report.checks.push(second.check(ctx, "E = D*C + b1", engine)?);
        Ok(report)
    }
}

/// Chain of `DEPTH` GEMMs `C[i] = A[i]·C[i-1]` with a perf report.
#[derive(Args, Debug, Clone)]
pub struct ChainPerfCommand {
    /// Square matrix size of every operation
    #[arg(long, default_value = "256", value_name = "N")]
    pub size: usize,

    /// Number of chained operations
    #[arg(long, default_value = "4", value_name = "N")]
    pub depth: usize,

    /// Values of A are drawn from `-RANGE..RANGE`
    #[arg(
        long,
        default_value = "32764",
        value_name = "RANGE",
        value_parser = clap::value_parser!(i16).range(1..)
    )]
    pub a_range: i16,

    /// Values of the first B are drawn from `-RANGE..RANGE`
    #[arg(
        long,
        default_value = "32764",
        value_name = "RANGE",
        value_parser = clap::value_parser!(i16).range(1..)
    )]
    pub b_range: i16,

    #[arg(long, default_value = "1")]
    pub scale: i32,

    #[arg(long, default_value = "0")]
    pub shift: u32,
}

impl ChainPerfCommand {
    pub fn run(&self, ctx: &RunContext) -> Result<ScenarioReport> {
        ensure!(self.depth > 0, "chain depth must be at least 1");
        let n = self.size;
        let post = PostScale::new(self.scale, self.shift);
        let mut report = ScenarioReport::new("chain-perf", ctx.seed);
        let mut coord = Coordinator::simulated(ctx.config.clone());
        let mut data = MatrixGen::new(ctx.seed);
        let engine = EngineId::DEFAULT;
        info!(size = n, depth = self.depth, "chained perf run");

        let mut a = Vec::with_capacity(self.depth);
        let mut c = Vec::with_capacity(self.depth);
        let mut bias = Vec::with_capacity(self.depth);
        for _ in 0..self.depth {
            a.push(data.i16(n, n, symmetric(self.a_range))?);
            c.push(Matrix::zeros((n, n), ElementType::I16)?);
            bias.push(Matrix::zeros((n, n), ElementType::I32)?);
        }
        let b0 = data.i16(n, n, symmetric(self.b_range))?;

        coord.reset_timeline();
        for i in 0..self.depth {
            for mat in [&a[i], &c[i], &bias[i]] {
                coord.send(mat, engine)?;
            }
        }
        coord.send(&b0, engine)?;
        for i in 0..self.depth {
            let b = if i == 0 { &b0 } else { &c[i - 1] };
            coord.add_gemm(&a[i], b, &c[i], Some(&bias[i]), post.scale, post.shift)?;
        }
        coord.execute(Some(engine)).context("chain execution failed")?;
        for out in c.iter_mut() {
            coord.retrieve(out, engine)?;
        }

        let parallel = (2 * n * n * n * self.depth) as u64;
        let total = parallel + (3 * n * n * self.depth) as u64;
        let perf = coord
            .perf_report(total, parallel)
            .context("timeline incomplete after chained run")?;
        info!(%perf, "chain-perf");
        report.perf.push(perf);

        let verifier = ctx.verifier();
        for i in 0..self.depth {
            let b = if i == 0 { &b0 } else { &c[i - 1] };
            let result = verifier.verify(&c[i], &a[i], b, Some(&bias[i]), post)?;
            report.checks.push(Check {
                label: format!("C[{i}]"),
                engine,
                dims: (n, n, n),
                result,
            });
        }
        Ok(report)
    }
}
