//! Stage timestamps and throughput figures.
//!
//! The coordinator stamps four points of a send → compute → retrieve cycle
//! into an [`ExecutionTimeline`]. [`PerfReport`] turns a complete timeline
//! plus operation counts into kernel/API time, efficiency against the
//! array's theoretical peak, and TOPS. None of this feeds back into
//! execution.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Stage boundaries of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Before the first host → device transfer.
    PreTransfer,
    /// Transfers done, kernel about to launch.
    PreLaunch,
    /// Kernel done, results not yet read back.
    PostLaunch,
    /// Last device → host transfer finished.
    PostRetrieve,
}

/// Monotonic timestamps of the four stage boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionTimeline {
    pre_transfer: Option<Instant>,
    pre_launch: Option<Instant>,
    post_launch: Option<Instant>,
    post_retrieve: Option<Instant>,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stage` at `at`.
    ///
    /// Marking [`Stage::PreTransfer`] starts a fresh cycle and forgets the
    /// later stamps of the previous one.
    pub fn mark_at(&mut self, stage: Stage, at: Instant) {
        match stage {
            Stage::PreTransfer => *self = Self { pre_transfer: Some(at), ..Self::default() },
            Stage::PreLaunch => self.pre_launch = Some(at),
            Stage::PostLaunch => self.post_launch = Some(at),
            Stage::PostRetrieve => self.post_retrieve = Some(at),
        }
    }

    pub fn mark(&mut self, stage: Stage) {
        self.mark_at(stage, Instant::now());
    }

    pub fn get(&self, stage: Stage) -> Option<Instant> {
        match stage {
            Stage::PreTransfer => self.pre_transfer,
            Stage::PreLaunch => self.pre_launch,
            Stage::PostLaunch => self.post_launch,
            Stage::PostRetrieve => self.post_retrieve,
        }
    }

    /// True once a cycle has been read back, i.e. the next transfer starts
    /// a new cycle.
    pub fn is_finished(&self) -> bool {
        self.post_retrieve.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.pre_transfer.is_some()
            && self.pre_launch.is_some()
            && self.post_launch.is_some()
            && self.post_retrieve.is_some()
    }

    /// Time between launching the batch and its completion.
    pub fn kernel_time(&self) -> Option<Duration> {
        Some(self.post_launch?.saturating_duration_since(self.pre_launch?))
    }

    /// Time spent sending operands and encoding the batch.
    pub fn transfer_time(&self) -> Option<Duration> {
        Some(self.pre_launch?.saturating_duration_since(self.pre_transfer?))
    }

    /// Time spent reading results back.
    pub fn retrieve_time(&self) -> Option<Duration> {
        Some(self.post_retrieve?.saturating_duration_since(self.post_launch?))
    }

    /// Whole cycle as seen by the caller.
    pub fn api_time(&self) -> Option<Duration> {
        Some(self.post_retrieve?.saturating_duration_since(self.pre_transfer?))
    }
}

/// Throughput summary of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfReport {
    pub clock_mhz: f64,
    pub dims: Option<(usize, usize, usize)>,
    pub total_operations: u64,
    pub parallel_operations: u64,
    pub kernel_ms: f64,
    pub api_ms: f64,
    /// Kernel time the array would need at 100% utilisation.
    pub ideal_ms: f64,
    pub kernel_efficiency_pct: f64,
    pub api_efficiency_pct: f64,
    pub kernel_tops: f64,
    pub api_tops: f64,
}

impl PerfReport {
    pub const CSV_HEADER: &'static str = concat!(
        "DATA_CSV:,Freq,M,K,N,TimeKernelMs,TimeApiMs,",
        "EffKernelPct,EffApiPct,PerfKernelTops,PerfApiTops"
    );

    /// Build a report from a complete timeline. Returns `None` if any stage
    /// stamp is missing.
    pub fn new(
        timeline: &ExecutionTimeline,
        total_operations: u64,
        parallel_operations: u64,
        clock_mhz: f64,
        macs_per_cycle: u64,
    ) -> Option<Self> {
        let kernel_ms = timeline.kernel_time()?.as_secs_f64() * 1e3;
        let api_ms = timeline.api_time()?.as_secs_f64() * 1e3;
        // one MAC is two operations
        let cycles = parallel_operations as f64 / 2.0 / macs_per_cycle.max(1) as f64;
        let ideal_ms = cycles / (clock_mhz * 1e6) * 1e3;

        let pct = |ms: f64| if ms > 0.0 { 100.0 * ideal_ms / ms } else { 0.0 };
        let tops =
            |ms: f64| if ms > 0.0 { total_operations as f64 / (ms * 1e-3) / 1e12 } else { 0.0 };

        Some(Self {
            clock_mhz,
            dims: None,
            total_operations,
            parallel_operations,
            kernel_ms,
            api_ms,
            ideal_ms,
            kernel_efficiency_pct: pct(kernel_ms),
            api_efficiency_pct: pct(api_ms),
            kernel_tops: tops(kernel_ms),
            api_tops: tops(api_ms),
        })
    }

    pub fn with_dims(mut self, m: usize, k: usize, n: usize) -> Self {
        self.dims = Some((m, k, n));
        self
    }

    pub fn to_csv_row(&self) -> String {
        let (m, k, n) = self.dims.unwrap_or((0, 0, 0));
        format!(
            "DATA_CSV:,{},{m},{k},{n},{:.3},{:.3},{:.3},{:.3},{:.6},{:.6}",
            self.clock_mhz,
            self.kernel_ms,
            self.api_ms,
            self.kernel_efficiency_pct,
            self.api_efficiency_pct,
            self.kernel_tops,
            self.api_tops,
        )
    }
}

impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kernel {:.3} ms ({:.1}% eff, {:.4} TOPS), api {:.3} ms ({:.1}% eff, {:.4} TOPS)",
            self.kernel_ms,
            self.kernel_efficiency_pct,
            self.kernel_tops,
            self.api_ms,
            self.api_efficiency_pct,
            self.api_tops
        )
    }
}
