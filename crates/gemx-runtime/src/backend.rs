//! Compute backend seam.
//!
//! The coordinator lowers each [`GemmOp`](crate::graph::GemmOp) to a
//! [`GemmInstruction`] that carries device regions instead of host
//! identities, then hands the whole batch to a [`ComputeBackend`]. Real
//! hardware encodes these into its own instruction format; the
//! [`SimulatedBackend`](crate::sim::SimulatedBackend) executes them in
//! process.

use gemx_common::{BufferHandle, ElementType, EngineId, PostScale, Result};

use crate::memory::Region;
use crate::registry::BufferRegistry;

/// A device buffer reference resolved at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRef {
    pub handle: BufferHandle,
    pub region: Region,
}

/// One GEMM as seen by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmInstruction {
    /// Position in the submitted batch; used to attribute faults.
    pub index: usize,
    pub a: BufferRef,
    pub b: BufferRef,
    pub c: BufferRef,
    pub bias: Option<BufferRef>,
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub post: PostScale,
    pub output_type: ElementType,
}

/// A device able to run GEMM batches.
pub trait ComputeBackend: Send {
    fn name(&self) -> &'static str;

    /// Whether the device is reachable. Checked before every dispatch.
    fn is_available(&self) -> bool;

    /// Kernel clock in MHz, for throughput figures.
    fn clock_mhz(&self) -> f64;

    /// Run `batch` in order on `engine`, reading and writing `memory`.
    ///
    /// Must return once every instruction has completed. On failure the
    /// error should be [`GemxError::ExecutionFault`](gemx_common::GemxError)
    /// naming the offending instruction, or
    /// [`GemxError::BackendUnavailable`](gemx_common::GemxError) if the device
    /// went away mid-batch.
    fn run_batch(
        &mut self,
        engine: EngineId,
        batch: &[GemmInstruction],
        memory: &mut BufferRegistry,
    ) -> Result<()>;
}

impl<T: ComputeBackend + ?Sized> ComputeBackend for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn clock_mhz(&self) -> f64 {
        (**self).clock_mhz()
    }

    fn run_batch(
        &mut self,
        engine: EngineId,
        batch: &[GemmInstruction],
        memory: &mut BufferRegistry,
    ) -> Result<()> {
        (**self).run_batch(engine, batch, memory)
    }
}
