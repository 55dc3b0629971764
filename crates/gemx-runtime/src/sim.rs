//! In-process simulation of the GEMM engine.
//!
//! Executes instructions sequentially against the registry's device
//! buffers, so chained operations observe their producers' results exactly
//! as the hardware pipeline would. Useful for tests and for running the
//! scenario suite without a card.

use gemx_common::{EngineId, GemxError, QuantizationRule, Result};
use tracing::{debug, trace};

use crate::backend::{BufferRef, ComputeBackend, GemmInstruction};
use crate::registry::{BufferRegistry, DeviceBuffer};

/// Deterministic software GEMM engine.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    clock_mhz: f64,
    rule: QuantizationRule,
    available: bool,
    fail_at: Option<usize>,
    batches_run: usize,
    instructions_run: usize,
}

impl SimulatedBackend {
    pub fn new(clock_mhz: f64, rule: QuantizationRule) -> Self {
        Self {
            clock_mhz,
            rule,
            available: true,
            fail_at: None,
            batches_run: 0,
            instructions_run: 0,
        }
    }

    /// A backend that reports itself unreachable.
    pub fn offline() -> Self {
        Self { available: false, ..Self::default() }
    }

    /// Fail with an execution fault when reaching instruction `index` of a
    /// batch. Instructions before it still run.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn set_fail_at(&mut self, index: Option<usize>) {
        self.fail_at = index;
    }

    pub fn rule(&self) -> QuantizationRule {
        self.rule
    }

    pub fn batches_run(&self) -> usize {
        self.batches_run
    }

    pub fn instructions_run(&self) -> usize {
        self.instructions_run
    }

    fn run_one(
        &self,
        engine: EngineId,
        instr: &GemmInstruction,
        memory: &mut BufferRegistry,
    ) -> Result<()> {
        let fault =
            |reason: String| GemxError::ExecutionFault { engine, index: instr.index, reason };
        let GemmInstruction { m, k, n, .. } = *instr;

        let read_i16 = |r: BufferRef| {
            memory.get(r.handle).and_then(DeviceBuffer::read_i16).map_err(|e| fault(e.to_string()))
        };
        let a = read_i16(instr.a)?;
        let b = read_i16(instr.b)?;
        let bias = match instr.bias {
            Some(r) => memory
                .get(r.handle)
                .and_then(DeviceBuffer::read_i32)
                .map_err(|e| fault(e.to_string()))?,
            None => vec![0; m * n],
        };
        if a.len() != m * k || b.len() != k * n || bias.len() != m * n {
            return Err(fault(format!(
                "operand sizes {}/{}/{} do not match {m}x{k}x{n}",
                a.len(),
                b.len(),
                bias.len()
            )));
        }

        let mut out = vec![0i16; m * n];
        for i in 0..m {
            let row = &a[i * k..(i + 1) * k];
            for j in 0..n {
                let acc: i128 = row
                    .iter()
                    .enumerate()
                    .map(|(l, &x)| i128::from(x) * i128::from(b[l * n + j]))
                    .sum();
                out[i * n + j] = self.rule.apply(acc, i128::from(bias[i * n + j]), instr.post);
            }
        }

        memory
            .get_mut(instr.c.handle)
            .and_then(|c| c.write_i16(&out))
            .map_err(|e| fault(e.to_string()))
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(250.0, QuantizationRule::default())
    }
}

impl ComputeBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn clock_mhz(&self) -> f64 {
        self.clock_mhz
    }

    fn run_batch(
        &mut self,
        engine: EngineId,
        batch: &[GemmInstruction],
        memory: &mut BufferRegistry,
    ) -> Result<()> {
        if !self.available {
            return Err(GemxError::BackendUnavailable(format!("{engine} is offline")));
        }
        debug!(%engine, instructions = batch.len(), "simulating batch");
        for instr in batch {
            if self.fail_at == Some(instr.index) {
                return Err(GemxError::ExecutionFault {
                    engine,
                    index: instr.index,
                    reason: "injected fault".into(),
                });
            }
            trace!(%engine, index = instr.index, m = instr.m, k = instr.k, n = instr.n, "gemm");
            self.run_one(engine, instr, memory)?;
            self.instructions_run += 1;
        }
        self.batches_run += 1;
        Ok(())
    }
}
