//! Random single-GEMM sweep over a grid of post-scales on every engine.

use anyhow::{Context, Result};
use clap::Args;
use gemx_common::{ElementType, EngineId, Matrix, PostScale};
use gemx_runtime::Coordinator;
use tracing::{debug, info};

use super::{GemmCase, RunContext};
use crate::data::MatrixGen;
use crate::report::ScenarioReport;

#[derive(Args, Debug, Clone)]
pub struct BasicCommand {
    /// Square matrix size
    #[arg(long, default_value = "64", value_name = "N")]
    pub size: usize,

    /// Scales and shifts run over `0..GRID`
    #[arg(long, default_value = "15", value_name = "GRID")]
    pub grid: u32,
}

impl BasicCommand {
    pub fn run(&self, ctx: &RunContext) -> Result<ScenarioReport> {
        let mut report = ScenarioReport::new("basic", ctx.seed);
        let mut coord = Coordinator::simulated(ctx.config.clone());
        let mut data = MatrixGen::new(ctx.seed);
        let n = self.size;

        for engine in (0..coord.engine_count()).map(EngineId) {
            info!(%engine, size = n, grid = self.grid, "basic sweep");
            for scale in 0..self.grid {
                for shift in 0..self.grid {
                    let mut case = GemmCase {
                        a: data.i16(n, n, i16::MIN..i16::MAX)?,
                        b: data.i16(n, n, i16::MIN..i16::MAX)?,
                        c: Matrix::zeros((n, n), ElementType::I16)?,
                        bias: Some(data.i32(n, n, i32::MIN..i32::MAX)?),
                        post: PostScale::new(scale as i32, shift),
                    };
                    case.send(&mut coord, engine)?;
                    case.add(&mut coord, engine)?;
                    coord
                        .execute(Some(engine))
                        .with_context(|| format!("execute failed on {engine}"))?;
                    coord.retrieve(&mut case.c, engine)?;

                    let check = case.check(ctx, format!("scale={scale} shift={shift}"), engine)?;
                    debug!(%check, "checked");
                    report.checks.push(check);
                    case.release(&mut coord, engine)?;
                }
            }
        }
        Ok(report)
    }
}
