//! Scenario results.

use std::fmt;

use gemx_common::EngineId;
use gemx_runtime::PerfReport;
use gemx_verify::MatchResult;
use serde::Serialize;

/// One verified output matrix.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub label: String,
    pub engine: EngineId,
    pub dims: (usize, usize, usize),
    pub result: MatchResult,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (m, k, n) = self.dims;
        write!(f, "[{}] {} {m}x{k}x{n}: {}", self.engine, self.label, self.result)
    }
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub seed: u64,
    pub checks: Vec<Check>,
    pub perf: Vec<PerfReport>,
}

impl ScenarioReport {
    pub fn new(scenario: &'static str, seed: u64) -> Self {
        Self { scenario, seed, checks: Vec::new(), perf: Vec::new() }
    }

    pub fn mismatches(&self) -> usize {
        self.checks.iter().filter(|c| !c.result.is_match()).count()
    }

    pub fn passed(&self) -> bool {
        self.mismatches() == 0
    }

    /// `DATA_CSV` header followed by one row per perf entry.
    pub fn csv(&self) -> String {
        let mut out = String::from(PerfReport::CSV_HEADER);
        for p in &self.perf {
            out.push('\n');
            out.push_str(&p.to_csv_row());
        }
        out
    }
}
