//! Execution coordinator.
//!
//! [`Coordinator`] is the session object: it owns one [`BufferRegistry`] and
//! one [`OperationGraph`] per engine plus the [`ComputeBackend`], and stamps
//! the [`ExecutionTimeline`]. Dropping it releases every device buffer.

use std::collections::HashMap;

use gemx_common::{
    AcceleratorConfig, BufferHandle, ElementType, EngineId, GemxError, Matrix, OperandRole,
    PostScale, Result,
};
use tracing::{debug, info, warn};

use crate::backend::{BufferRef, ComputeBackend, GemmInstruction};
use crate::graph::{GemmOp, Operand, OperationGraph};
use crate::registry::{BufferRegistry, RegistryStats};
use crate::sim::SimulatedBackend;
use crate::timing::{ExecutionTimeline, PerfReport, Stage};

struct EngineState {
    registry: BufferRegistry,
    graph: OperationGraph,
}

/// Session owning device buffers, per-engine graphs and the backend.
pub struct Coordinator<B: ComputeBackend> {
    config: AcceleratorConfig,
    engines: Vec<EngineState>,
    backend: B,
    timeline: ExecutionTimeline,
}

impl Coordinator<SimulatedBackend> {
    /// Coordinator driving a [`SimulatedBackend`] configured from `config`.
    pub fn simulated(config: AcceleratorConfig) -> Self {
        let backend = SimulatedBackend::new(config.clock_mhz, config.quantization_rule());
        Self::new(config, backend)
    }
}

impl<B: ComputeBackend> Coordinator<B> {
    /// # Panics
    ///
    /// If `config.alignment` is not a power of two. Configs produced by
    /// [`AcceleratorConfig::load`] and friends are already validated.
    pub fn new(config: AcceleratorConfig, backend: B) -> Self {
        let engines = (0..config.engine_count)
            .map(|i| EngineState {
                registry: BufferRegistry::new(
                    EngineId(i),
                    config.memory_per_engine,
                    config.alignment,
                ),
                graph: OperationGraph::new(EngineId(i)),
            })
            .collect();
        info!(
            backend = backend.name(),
            engines = config.engine_count,
            memory_per_engine = config.memory_per_engine,
            "coordinator ready"
        );
        Self { config, engines, backend, timeline: ExecutionTimeline::new() }
    }

    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Kernel clock reported by the backend, in MHz.
    pub fn clock_mhz(&self) -> f64 {
        self.backend.clock_mhz()
    }

    // ── buffers ─────────────────────────────────────────────────────────────

    pub fn registry(&self, engine: EngineId) -> Result<&BufferRegistry> {
        Ok(&self.engine(engine)?.registry)
    }

    pub fn register(&mut self, matrix: &Matrix, engine: EngineId) -> Result<BufferHandle> {
        self.engine_mut(engine)?.registry.register(matrix)
    }

    pub fn handle_of(&self, matrix: &Matrix, engine: EngineId) -> Option<BufferHandle> {
        self.engine(engine).ok()?.registry.lookup(matrix.id())
    }

    /// Copy `matrix` into its device buffer. The first transfer after a
    /// completed cycle starts a new timeline.
    pub fn transfer_in(&mut self, handle: BufferHandle, matrix: &Matrix) -> Result<()> {
        self.engine_mut(handle.engine())?.registry.transfer_in(handle, matrix)?;
        if self.timeline.get(Stage::PreTransfer).is_none() || self.timeline.is_finished() {
            self.timeline.mark(Stage::PreTransfer);
        }
        Ok(())
    }

    /// Read a device buffer back into `matrix`.
    pub fn transfer_out(&mut self, handle: BufferHandle, matrix: &mut Matrix) -> Result<()> {
        self.engine(handle.engine())?.registry.transfer_out(handle, matrix)?;
        self.timeline.mark(Stage::PostRetrieve);
        Ok(())
    }

    /// Register `matrix` on `engine` and copy its contents over.
    pub fn send(&mut self, matrix: &Matrix, engine: EngineId) -> Result<BufferHandle> {
        let handle = self.register(matrix, engine)?;
        self.transfer_in(handle, matrix)?;
        Ok(handle)
    }

    /// Read back the buffer bound to `matrix` on `engine`.
    pub fn retrieve(&mut self, matrix: &mut Matrix, engine: EngineId) -> Result<()> {
        let handle = self.handle_of(matrix, engine).ok_or(GemxError::UnregisteredOperand {
            role: OperandRole::C,
            matrix: matrix.id(),
            engine,
        })?;
        self.transfer_out(handle, matrix)
    }

    pub fn release(&mut self, handle: BufferHandle) -> Result<()> {
        self.engine_mut(handle.engine())
            .map_err(|_| GemxError::InvalidHandle(handle))?
            .registry
            .release(handle)
    }

    pub fn stats(&self, engine: EngineId) -> Result<RegistryStats> {
        Ok(self.engine(engine)?.registry.stats())
    }

    // ── graph ───────────────────────────────────────────────────────────────

    /// Append a GEMM to the default engine's graph.
    pub fn add_gemm(
        &mut self,
        a: &Matrix,
        b: &Matrix,
        c: &Matrix,
        bias: Option<&Matrix>,
        scale: i32,
        shift: u32,
    ) -> Result<usize> {
        self.add_gemm_on(EngineId::DEFAULT, a, b, c, bias, scale, shift)
    }

    /// Append a GEMM to `engine`'s graph; returns its index in that graph.
    #[allow(clippy::too_many_arguments)]
    pub fn add_gemm_on(
        &mut self,
        engine: EngineId,
        a: &Matrix,
        b: &Matrix,
        c: &Matrix,
        bias: Option<&Matrix>,
        scale: i32,
        shift: u32,
    ) -> Result<usize> {
        let state = self.engine_mut(engine)?;
        state.graph.add_gemm(&state.registry, a, b, c, bias, PostScale::new(scale, shift))
    }

    /// Pending operations of `engine`.
    pub fn pending(&self, engine: EngineId) -> Result<&[GemmOp]> {
        Ok(self.engine(engine)?.graph.ops())
    }

    /// Empty one engine's graph, or every graph for `None`.
    pub fn clear(&mut self, engine: Option<EngineId>) -> Result<()> {
        match engine {
            Some(e) => self.engine_mut(e)?.graph.clear(),
            None => self.engines.iter_mut().for_each(|s| s.graph.clear()),
        }
        Ok(())
    }

    // ── execution ───────────────────────────────────────────────────────────

    /// Run `engine`'s graph, or every non-empty graph in engine order for
    /// `None`, blocking until the backend finishes.
    ///
    /// All targeted graphs form one batch. Every operand is re-validated
    /// and every output buffer is snapshotted before anything is dispatched.
    /// If any engine fails, the outputs of every targeted engine are
    /// restored and every graph is kept, so no partial results are
    /// observable. Graphs are drained only once all engines succeeded.
    pub fn execute(&mut self, engine: Option<EngineId>) -> Result<()> {
        let targets: Vec<EngineId> = match engine {
            Some(e) => {
                self.engine(e)?;
                vec![e]
            }
            None => (0..self.engines.len()).map(EngineId).collect(),
        };

        if !self.backend.is_available() {
            warn!(backend = self.backend.name(), "backend unavailable, batch not dispatched");
            return Err(GemxError::BackendUnavailable(format!(
                "{} backend is not reachable",
                self.backend.name()
            )));
        }

        let mut batches = Vec::with_capacity(targets.len());
        for target in targets {
            let state = self.engine(target)?;
            if state.graph.is_empty() {
                debug!(engine = %target, "nothing to execute");
                continue;
            }
            let batch = encode(state)?;
            let snapshot = snapshot_outputs(&state.registry, &batch)?;
            batches.push((target, batch, snapshot));
        }
        if batches.is_empty() {
            return Ok(());
        }

        if self.timeline.get(Stage::PreTransfer).is_none() || self.timeline.is_finished() {
            self.timeline.mark(Stage::PreTransfer);
        }
        self.timeline.mark(Stage::PreLaunch);

        for (target, batch, _) in &batches {
            info!(
                engine = %target,
                instructions = batch.len(),
                backend = self.backend.name(),
                "dispatching batch"
            );
            let registry = &mut self.engines[target.index()].registry;
            if let Err(err) = self.backend.run_batch(*target, batch, registry) {
                warn!(
                    engine = %target,
                    engines = batches.len(),
                    error = %err,
                    "batch failed, rolling back outputs"
                );
                for (id, _, snapshot) in &batches {
                    restore_outputs(&mut self.engines[id.index()].registry, snapshot);
                }
                return Err(err);
            }
        }

        for (target, batch, _) in &batches {
            self.engines[target.index()].graph.clear();
            info!(engine = %target, instructions = batch.len(), "batch complete");
        }
        self.timeline.mark(Stage::PostLaunch);
        Ok(())
    }

    /// Stage timestamps of the current (or last) cycle.
    pub fn timeline(&self) -> &ExecutionTimeline {
        &self.timeline
    }

    pub fn reset_timeline(&mut self) {
        self.timeline = ExecutionTimeline::new();
    }

    /// Throughput of the last complete cycle.
    pub fn perf_report(
        &self,
        total_operations: u64,
        parallel_operations: u64,
    ) -> Option<PerfReport> {
        PerfReport::new(
            &self.timeline,
            total_operations,
            parallel_operations,
            self.clock_mhz(),
            self.config.macs_per_cycle,
        )
    }

    fn engine(&self, engine: EngineId) -> Result<&EngineState> {
        self.engines
            .get(engine.index())
            .ok_or(GemxError::InvalidEngine { engine, count: self.engines.len() })
    }

    fn engine_mut(&mut self, engine: EngineId) -> Result<&mut EngineState> {
        let count = self.engines.len();
        self.engines.get_mut(engine.index()).ok_or(GemxError::InvalidEngine { engine, count })
    }
}

impl<B: ComputeBackend> Drop for Coordinator<B> {
    fn drop(&mut self) {
        for state in &mut self.engines {
            state.registry.release_all();
        }
        debug!("coordinator released all device buffers");
    }
}

/// Lower a graph to backend instructions, re-checking that every operand is
/// still bound as it was when the operation was appended.
fn encode(state: &EngineState) -> Result<Vec<GemmInstruction>> {
    let engine = state.graph.engine();
    let resolve = |index: usize, op: &Operand| -> Result<BufferRef> {
        let buffer = state.registry.get(op.handle).map_err(|_| GemxError::ExecutionFault {
            engine,
            index,
            reason: format!("buffer {} was released after the operation was added", op.handle),
        })?;
        if buffer.matrix() != op.matrix {
            return Err(GemxError::ExecutionFault {
                engine,
                index,
                reason: format!("buffer {} is no longer bound to {}", op.handle, op.matrix),
            });
        }
        Ok(BufferRef { handle: op.handle, region: buffer.region() })
    };

    state
        .graph
        .ops()
        .iter()
        .enumerate()
        .map(|(index, op)| {
            let (m, k, n) = op.dims();
            Ok(GemmInstruction {
                index,
                a: resolve(index, &op.a)?,
                b: resolve(index, &op.b)?,
                c: resolve(index, &op.c)?,
                bias: op.bias.as_ref().map(|b| resolve(index, b)).transpose()?,
                m,
                k,
                n,
                post: op.post,
                output_type: ElementType::I16,
            })
        })
        .collect()
}

/// Copy of every output buffer `batch` writes, keyed by handle.
fn snapshot_outputs(
    registry: &BufferRegistry,
    batch: &[GemmInstruction],
) -> Result<HashMap<BufferHandle, Vec<u8>>> {
    let mut snapshot = HashMap::new();
    for instr in batch {
        if !snapshot.contains_key(&instr.c.handle) {
            snapshot.insert(instr.c.handle, registry.get(instr.c.handle)?.bytes().to_vec());
        }
    }
    Ok(snapshot)
}

fn restore_outputs(registry: &mut BufferRegistry, snapshot: &HashMap<BufferHandle, Vec<u8>>) {
    for (handle, bytes) in snapshot {
        if let Ok(buffer) = registry.get_mut(*handle) {
            buffer.bytes_mut().copy_from_slice(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(engines: usize) -> AcceleratorConfig {
        AcceleratorConfig {
            engine_count: engines,
            memory_per_engine: 1 << 16,
            ..Default::default()
        }
    }

    fn i16m(rows: &[&[i16]]) -> Matrix {
        Matrix::from_rows_i16(rows).unwrap()
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let mut coord = Coordinator::simulated(config(2));
        let m = Matrix::zeros((2, 2), ElementType::I16).unwrap();
        assert_eq!(
            coord.register(&m, EngineId(2)),
            Err(GemxError::InvalidEngine { engine: EngineId(2), count: 2 })
        );
        assert!(coord.execute(Some(EngineId(5))).is_err());
    }

    #[test]
    fn execute_empty_graph_is_a_no_op() {
        let mut coord = Coordinator::simulated(config(1));
        coord.execute(None).unwrap();
        assert_eq!(coord.backend().batches_run(), 0);
        assert!(coord.timeline().get(Stage::PreLaunch).is_none());
    }

    #[test]
    fn successful_execute_drains_the_graph() {
        let mut coord = Coordinator::simulated(config(1));
        let a = i16m(&[&[1, 2], &[3, 4]]);
        let b = i16m(&[&[5, 6], &[7, 8]]);
        let mut c = Matrix::zeros((2, 2), ElementType::I16).unwrap();
        for m in [&a, &b, &c] {
            coord.send(m, EngineId(0)).unwrap();
        }
        coord.add_gemm(&a, &b, &c, None, 1, 0).unwrap();
        coord.execute(None).unwrap();
        assert!(coord.pending(EngineId(0)).unwrap().is_empty());

        coord.retrieve(&mut c, EngineId(0)).unwrap();
        assert_eq!(c.as_i16().unwrap(), &[19, 22, 43, 50]);
        assert!(coord.timeline().is_complete());
    }

    #[test]
    fn released_operand_is_reported_as_execution_fault() {
        let mut coord = Coordinator::simulated(config(1));
        let a = i16m(&[&[1]]);
        let b = i16m(&[&[2]]);
        let c = i16m(&[&[0]]);
        let d = i16m(&[&[0]]);
        for m in [&a, &b, &c, &d] {
            coord.send(m, EngineId(0)).unwrap();
        }
        coord.add_gemm(&a, &b, &c, None, 1, 0).unwrap();
        coord.add_gemm(&a, &b, &d, None, 1, 0).unwrap();
        let hd = coord.handle_of(&d, EngineId(0)).unwrap();
        coord.release(hd).unwrap();

        let err = coord.execute(None).unwrap_err();
        assert!(matches!(err, GemxError::ExecutionFault { engine: EngineId(0), index: 1, .. }));
        assert_eq!(coord.pending(EngineId(0)).unwrap().len(), 2);
        assert_eq!(coord.backend().batches_run(), 0);
    }

    #[test]
    fn rejected_transfer_does_not_start_the_timeline() {
        let mut coord = Coordinator::simulated(config(1));
        let a = i16m(&[&[1, 2]]);
        let b = i16m(&[&[3, 4]]);
        let handle = coord.register(&a, EngineId(0)).unwrap();

        assert!(coord.transfer_in(handle, &b).is_err());
        coord.release(handle).unwrap();
        assert!(coord.transfer_in(handle, &a).is_err());
        assert!(coord.timeline().get(Stage::PreTransfer).is_none());

        let handle = coord.register(&a, EngineId(0)).unwrap();
        coord.transfer_in(handle, &a).unwrap();
        assert!(coord.timeline().get(Stage::PreTransfer).is_some());
    }

    #[test]
    fn clear_single_and_all() {
        let mut coord = Coordinator::simulated(config(2));
        let a = i16m(&[&[1]]);
        for e in [EngineId(0), EngineId(1)] {
            coord.send(&a, e).unwrap();
            coord.add_gemm_on(e, &a, &a, &a, None, 1, 0).unwrap();
        }
        coord.clear(Some(EngineId(1))).unwrap();
        assert_eq!(coord.pending(EngineId(0)).unwrap().len(), 1);
        assert!(coord.pending(EngineId(1)).unwrap().is_empty());
        coord.clear(None).unwrap();
        assert!(coord.pending(EngineId(0)).unwrap().is_empty());
    }

    #[test]
    fn drop_releases_buffers() {
        let mut coord = Coordinator::simulated(config(1));
        let a = i16m(&[&[1, 2]]);
        coord.send(&a, EngineId(0)).unwrap();
        assert_eq!(coord.stats(EngineId(0)).unwrap().live_buffers, 1);
        drop(coord);
    }
}
