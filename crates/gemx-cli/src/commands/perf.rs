//! Square-size throughput sweep.

use anyhow::{Context, Result, ensure};
use clap::Args;
use gemx_common::{ElementType, EngineId, Matrix, PostScale};
use gemx_runtime::Coordinator;
use tracing::info;

use super::{GemmCase, RunContext};
use crate::data::{MatrixGen, symmetric};
use crate::report::ScenarioReport;

/// Runs `size×size×size` GEMMs for sizes doubling from `--min-size` while
/// below `--max-size`, one timed send/execute/retrieve cycle each.
#[derive(Args, Debug, Clone)]
pub struct PerfCommand {
    #[arg(long, default_value = "256", value_name = "N")]
    pub min_size: usize,

    /// Exclusive upper bound
    #[arg(long, default_value = "8192", value_name = "N")]
    pub max_size: usize,

    #[arg(
        long,
        default_value = "32764",
        value_name = "RANGE",
        value_parser = clap::value_parser!(i16).range(1..)
    )]
    pub a_range: i16,

    #[arg(
        long,
        default_value = "32764",
        value_name = "RANGE",
        value_parser = clap::value_parser!(i16).range(1..)
    )]
    pub b_range: i16,

    /// Bias values are drawn from `-RANGE..RANGE`; 0 sends a zero bias
    #[arg(
        long,
        default_value = "32764",
        value_name = "RANGE",
        value_parser = clap::value_parser!(i32).range(0..)
    )]
    pub bias_range: i32,

    #[arg(long, default_value = "1")]
    pub scale: i32,

    #[arg(long, default_value = "0")]
    pub shift: u32,
}

impl PerfCommand {
    /// Sizes visited by the sweep.
    pub fn sizes(&self) -> Vec<usize> {
        std::iter::successors(Some(self.min_size), |&s| s.checked_mul(2))
            .take_while(|&s| s < self.max_size)
            .collect()
    }

    pub fn run(&self, ctx: &RunContext) -> Result<ScenarioReport> {
        ensure!(self.min_size > 0, "--min-size must be positive");
        let mut report = ScenarioReport::new("perf", ctx.seed);
        let mut coord = Coordinator::simulated(ctx.config.clone());
        let mut data = MatrixGen::new(ctx.seed);
        let engine = EngineId::DEFAULT;

        for n in self.sizes() {
            let mut case = GemmCase {
                a: data.i16(n, n, symmetric(self.a_range))?,
                b: data.i16(n, n, symmetric(self.b_range))?,
                c: Matrix::zeros((n, n), ElementType::I16)?,
                bias: Some(data.i32(n, n, symmetric(self.bias_range))?),
                post: PostScale::new(self.scale, self.shift),
            };

            coord.reset_timeline();
            case.send(&mut coord, engine)?;
            case.add(&mut coord, engine)?;
            coord.execute(Some(engine)).with_context(|| format!("execute failed at size {n}"))?;
            coord.retrieve(&mut case.c, engine)?;

            let (total, parallel) = case.operation_counts();
            let perf = coord
                .perf_report(total, parallel)
                .context("timeline incomplete after perf run")?
                .with_dims(n, n, n);
            info!(size = n, %perf, "perf");
            report.perf.push(perf);
            report.checks.push(case.check(ctx, format!("{n}^3"), engine)?);
            case.release(&mut coord, engine)?;
        }
        Ok(report)
    }
}
