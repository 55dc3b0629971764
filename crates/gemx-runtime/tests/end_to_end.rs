//! End-to-end GEMM scenarios on the simulated backend.

use gemx_common::{AcceleratorConfig, ElementType, EngineId, GemxError, Matrix, OperandRole};
use gemx_runtime::{
    BufferRegistry, ComputeBackend, Coordinator, GemmInstruction, SimulatedBackend, Stage,
};
use gemx_verify::{MatchResult, verify};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const PE0: EngineId = EngineId(0);

fn config() -> AcceleratorConfig {
    AcceleratorConfig { engine_count: 2, memory_per_engine: 1 << 20, ..Default::default() }
}

fn a() -> Matrix {
    Matrix::from_rows_i16(&[&[1, 2], &[3, 4]]).unwrap()
}

fn b() -> Matrix {
    Matrix::from_rows_i16(&[&[5, 6], &[7, 8]]).unwrap()
}

fn zeros(rows: usize, cols: usize) -> Matrix {
    Matrix::zeros((rows, cols), ElementType::I16).unwrap()
}

fn random_i16(rng: &mut ChaCha8Rng, rows: usize, cols: usize, bound: i16) -> Matrix {
    let values = (0..rows * cols).map(|_| rng.random_range(-bound..=bound)).collect();
    Matrix::from_i16(rows, cols, values).unwrap()
}

fn run_single(shift: u32) -> Matrix {
    let mut coord = Coordinator::simulated(config());
    let (a, b, mut c) = (a(), b(), zeros(2, 2));
    let bias = Matrix::zeros((2, 2), ElementType::I32).unwrap();
    for m in [&a, &b, &c, &bias] {
        coord.send(m, PE0).unwrap();
    }
    coord.add_gemm(&a, &b, &c, Some(&bias), 1, shift).unwrap();
    coord.execute(None).unwrap();
    coord.retrieve(&mut c, PE0).unwrap();
    c
}

#[test]
fn two_by_two_product() {
    let c = run_single(0);
    assert_eq!(c.as_i16().unwrap(), &[19, 22, 43, 50]);
    assert_eq!(verify(&c, &a(), &b(), None, 1, 0, 0).unwrap(), MatchResult::Match);
}

#[test]
fn two_by_two_product_shifted() {
    let c = run_single(1);
    assert_eq!(c.as_i16().unwrap(), &[9, 11, 21, 25]);
}

#[test]
fn output_saturates_instead_of_wrapping() {
    let mut coord = Coordinator::simulated(config());
    let a = Matrix::from_rows_i16(&[&[i16::MAX, i16::MAX], &[i16::MIN, i16::MIN]]).unwrap();
    let b = Matrix::from_rows_i16(&[&[i16::MAX, 1], &[i16::MAX, 0]]).unwrap();
    let mut c = zeros(2, 2);
    for m in [&a, &b, &c] {
        coord.send(m, PE0).unwrap();
    }
    coord.add_gemm(&a, &b, &c, None, 1, 0).unwrap();
    coord.execute(None).unwrap();
    coord.retrieve(&mut c, PE0).unwrap();
    assert_eq!(c.as_i16().unwrap(), &[i16::MAX, i16::MAX, i16::MIN, i16::MIN]);
}

#[test]
fn chained_operations_see_producer_results() {
    let mut rng = ChaCha8Rng::seed_from_u64(123);
    let mut coord = Coordinator::simulated(config());
    let a = random_i16(&mut rng, 4, 8, 20);
    let b = random_i16(&mut rng, 8, 6, 20);
    let mut c = zeros(4, 6);
    let d = random_i16(&mut rng, 6, 3, 20);
    let mut e = zeros(4, 3);
    for m in [&a, &b, &c, &d, &e] {
        coord.send(m, PE0).unwrap();
    }
    coord.add_gemm(&a, &b, &c, None, 1, 4).unwrap();
    coord.add_gemm(&c, &d, &e, None, 1, 0).unwrap();
    coord.execute(None).unwrap();
    coord.retrieve(&mut c, PE0).unwrap();
    coord.retrieve(&mut e, PE0).unwrap();

    assert!(verify(&c, &a, &b, None, 1, 4, 0).unwrap().is_match());
    // e is computed from the retrieved intermediate, not the zeroed host copy
    assert!(verify(&e, &c, &d, None, 1, 0, 0).unwrap().is_match());
    assert!(e.as_i16().unwrap().iter().any(|&v| v != 0));
}

#[test]
fn registration_is_idempotent() {
    let mut coord = Coordinator::simulated(config());
    let a = a();
    let h1 = coord.register(&a, PE0).unwrap();
    let used = coord.stats(PE0).unwrap().used_bytes;
    let h2 = coord.register(&a, PE0).unwrap();
    assert_eq!(h1, h2);
    assert_eq!(coord.stats(PE0).unwrap().used_bytes, used);
    assert_eq!(coord.stats(PE0).unwrap().live_buffers, 1);

    // same engine, same contents, different identity
    let twin = a.duplicate();
    assert_ne!(coord.register(&twin, PE0).unwrap(), h1);
}

#[test]
fn capacity_exceeded_keeps_existing_buffers() {
    let cfg = AcceleratorConfig { memory_per_engine: 256, alignment: 64, ..Default::default() };
    let mut coord = Coordinator::simulated(cfg);
    let small = Matrix::from_i16(8, 8, vec![7; 64]).unwrap(); // 128 bytes
    let h = coord.send(&small, PE0).unwrap();
    let big = zeros(16, 16); // 512 bytes

    let err = coord.register(&big, PE0).unwrap_err();
    assert!(matches!(err, GemxError::CapacityExceeded { requested: 512, .. }));
    assert!(err.is_recoverable());

    let mut back = small;
    coord.transfer_out(h, &mut back).unwrap();
    assert_eq!(back.as_i16().unwrap(), &[7; 64][..]);
}

#[test]
fn released_handle_is_invalid() {
    let mut coord = Coordinator::simulated(config());
    let mut a = a();
    let h = coord.send(&a, PE0).unwrap();
    coord.release(h).unwrap();
    assert_eq!(coord.transfer_out(h, &mut a), Err(GemxError::InvalidHandle(h)));
    assert_eq!(coord.release(h), Err(GemxError::InvalidHandle(h)));
}

#[test]
fn unregistered_operand_is_rejected_at_build_time() {
    let mut coord = Coordinator::simulated(config());
    let (a, b, c) = (a(), b(), zeros(2, 2));
    coord.send(&a, PE0).unwrap();
    coord.send(&c, PE0).unwrap();
    let err = coord.add_gemm(&a, &b, &c, None, 1, 0).unwrap_err();
    assert_eq!(
        err,
        GemxError::UnregisteredOperand { role: OperandRole::B, matrix: b.id(), engine: PE0 }
    );

    // registered on another engine does not count
    coord.send(&b, EngineId(1)).unwrap();
    assert!(coord.add_gemm(&a, &b, &c, None, 1, 0).is_err());
}

#[test]
fn fault_rolls_back_every_output() {
    let backend = SimulatedBackend::default().fail_at(1);
    let mut coord = Coordinator::new(config(), backend);
    let (a, b) = (a(), b());
    let mut c = Matrix::from_rows_i16(&[&[-1, -1], &[-1, -1]]).unwrap();
    let d = zeros(2, 2);
    for m in [&a, &b, &c, &d] {
        coord.send(m, PE0).unwrap();
    }
    coord.add_gemm(&a, &b, &c, None, 1, 0).unwrap();
    coord.add_gemm(&a, &b, &d, None, 1, 0).unwrap();

    let err = coord.execute(Some(PE0)).unwrap_err();
    assert!(matches!(err, GemxError::ExecutionFault { engine: PE0, index: 1, .. }));
    // the first instruction ran before the fault, but its output is restored
    coord.retrieve(&mut c, PE0).unwrap();
    assert_eq!(c.as_i16().unwrap(), &[-1, -1, -1, -1]);
    assert_eq!(coord.pending(PE0).unwrap().len(), 2);

    coord.backend_mut().set_fail_at(None);
    coord.execute(Some(PE0)).unwrap();
    coord.retrieve(&mut c, PE0).unwrap();
    assert_eq!(c.as_i16().unwrap(), &[19, 22, 43, 50]);
}

/// Two engines: one GEMM writing `c0` on PE0, two GEMMs writing `c1` then
/// `d1` on PE1. Every output starts at -1.
fn two_engine_batch<B: ComputeBackend>(coord: &mut Coordinator<B>) -> (Matrix, Matrix, Matrix) {
    let (a, b) = (a(), b());
    let minus_ones = || Matrix::from_rows_i16(&[&[-1, -1], &[-1, -1]]).unwrap();
    let (c0, c1, d1) = (minus_ones(), minus_ones(), minus_ones());
    for m in [&a, &b, &c0] {
        coord.send(m, PE0).unwrap();
    }
    for m in [&a, &b, &c1, &d1] {
        coord.send(m, EngineId(1)).unwrap();
    }
    coord.add_gemm_on(PE0, &a, &b, &c0, None, 1, 0).unwrap();
    coord.add_gemm_on(EngineId(1), &a, &b, &c1, None, 1, 0).unwrap();
    coord.add_gemm_on(EngineId(1), &a, &b, &d1, None, 1, 0).unwrap();
    (c0, c1, d1)
}

fn assert_untouched<B: ComputeBackend>(coord: &mut Coordinator<B>, outputs: &mut [Matrix]) {
    let engines = [PE0, EngineId(1), EngineId(1)];
    for (m, e) in outputs.iter_mut().zip(engines) {
        coord.retrieve(m, e).unwrap();
        assert_eq!(m.as_i16().unwrap(), &[-1, -1, -1, -1], "output on {e} was committed");
    }
    assert_eq!(coord.pending(PE0).unwrap().len(), 1);
    assert_eq!(coord.pending(EngineId(1)).unwrap().len(), 2);
}

#[test]
fn fault_on_one_engine_rolls_back_all_engines() {
    let mut coord = Coordinator::new(config(), SimulatedBackend::default().fail_at(1));
    let (c0, c1, d1) = two_engine_batch(&mut coord);

    let err = coord.execute(None).unwrap_err();
    assert!(matches!(err, GemxError::ExecutionFault { engine: EngineId(1), index: 1, .. }));
    // PE0's batch completed before PE1 faulted, yet nothing is committed
    assert_eq!(coord.backend().batches_run(), 1);
    assert!(coord.timeline().get(Stage::PostLaunch).is_none());
    let mut outputs = [c0, c1, d1];
    assert_untouched(&mut coord, &mut outputs);

    coord.backend_mut().set_fail_at(None);
    coord.execute(None).unwrap();
    let engines = [PE0, EngineId(1), EngineId(1)];
    for (m, e) in outputs.iter_mut().zip(engines) {
        coord.retrieve(m, e).unwrap();
        assert_eq!(m.as_i16().unwrap(), &[19, 22, 43, 50]);
    }
    assert!(coord.pending(PE0).unwrap().is_empty());
    assert!(coord.pending(EngineId(1)).unwrap().is_empty());
}

/// Simulator that loses the device once `budget` instructions have run.
struct DroppingBackend {
    inner: SimulatedBackend,
    budget: usize,
}

impl ComputeBackend for DroppingBackend {
    fn name(&self) -> &'static str {
        "dropping"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn clock_mhz(&self) -> f64 {
        self.inner.clock_mhz()
    }

    fn run_batch(
        &mut self,
        engine: EngineId,
        batch: &[GemmInstruction],
        memory: &mut BufferRegistry,
    ) -> gemx_common::Result<()> {
        for instr in batch {
            if self.budget == 0 {
                return Err(GemxError::BackendUnavailable(format!("{engine} dropped off the bus")));
            }
            self.inner.run_batch(engine, std::slice::from_ref(instr), memory)?;
            self.budget -= 1;
        }
        Ok(())
    }
}

#[test]
fn device_lost_mid_batch_rolls_back_all_engines() {
    let backend = DroppingBackend { inner: SimulatedBackend::default(), budget: 2 };
    let mut coord = Coordinator::new(config(), backend);
    let (c0, c1, d1) = two_engine_batch(&mut coord);

    // PE0's GEMM and PE1's first GEMM run before the device goes away
    let err = coord.execute(None).unwrap_err();
    assert!(matches!(err, GemxError::BackendUnavailable(_)));
    assert_eq!(coord.backend().inner.instructions_run(), 2);
    let mut outputs = [c0, c1, d1];
    assert_untouched(&mut coord, &mut outputs);

    coord.backend_mut().budget = usize::MAX;
    coord.execute(None).unwrap();
    for (m, e) in outputs.iter_mut().zip([PE0, EngineId(1), EngineId(1)]) {
        coord.retrieve(m, e).unwrap();
        assert_eq!(m.as_i16().unwrap(), &[19, 22, 43, 50]);
    }
}

#[test]
fn unavailable_backend_dispatches_nothing() {
    let mut coord = Coordinator::new(config(), SimulatedBackend::offline());
    let (a, b, mut c) = (a(), b(), zeros(2, 2));
    for m in [&a, &b, &c] {
        coord.send(m, PE0).unwrap();
    }
    coord.add_gemm(&a, &b, &c, None, 1, 0).unwrap();
    assert!(matches!(coord.execute(None), Err(GemxError::BackendUnavailable(_))));
    assert_eq!(coord.pending(PE0).unwrap().len(), 1);
    coord.retrieve(&mut c, PE0).unwrap();
    assert_eq!(c.as_i16().unwrap(), &[0, 0, 0, 0]);
}

#[test]
fn engines_are_independent() {
    let mut coord = Coordinator::simulated(config());
    let (a, b) = (a(), b());
    let mut c0 = zeros(2, 2);
    let mut c1 = zeros(2, 2);
    for e in [EngineId(0), EngineId(1)] {
        coord.send(&a, e).unwrap();
        coord.send(&b, e).unwrap();
    }
    coord.send(&c0, EngineId(0)).unwrap();
    coord.send(&c1, EngineId(1)).unwrap();
    coord.add_gemm_on(EngineId(0), &a, &b, &c0, None, 1, 0).unwrap();
    coord.add_gemm_on(EngineId(1), &a, &b, &c1, None, 1, 1).unwrap();

    coord.execute(Some(EngineId(1))).unwrap();
    assert_eq!(coord.pending(EngineId(0)).unwrap().len(), 1);
    coord.execute(None).unwrap();

    coord.retrieve(&mut c0, EngineId(0)).unwrap();
    coord.retrieve(&mut c1, EngineId(1)).unwrap();
    assert_eq!(c0.as_i16().unwrap(), &[19, 22, 43, 50]);
    assert_eq!(c1.as_i16().unwrap(), &[9, 11, 21, 25]);
}

#[test]
fn buffers_survive_multiple_submissions() {
    let mut coord = Coordinator::simulated(config());
    let (a, b, mut c) = (a(), b(), zeros(2, 2));
    for m in [&a, &b, &c] {
        coord.send(m, PE0).unwrap();
    }
    for shift in [0, 1] {
        coord.add_gemm(&a, &b, &c, None, 1, shift).unwrap();
        coord.execute(None).unwrap();
    }
    coord.retrieve(&mut c, PE0).unwrap();
    assert_eq!(c.as_i16().unwrap(), &[9, 11, 21, 25]);
    assert_eq!(coord.backend().batches_run(), 2);
}

#[test]
fn timeline_covers_a_full_cycle() {
    let c = {
        let mut coord = Coordinator::simulated(config());
        let (a, b, mut c) = (a(), b(), zeros(2, 2));
        for m in [&a, &b, &c] {
            coord.send(m, PE0).unwrap();
        }
        let op = coord.add_gemm(&a, &b, &c, None, 1, 0).unwrap();
        let (total, parallel) = {
            let op = &coord.pending(PE0).unwrap()[op];
            (op.total_operations(), op.parallel_operations())
        };
        coord.execute(None).unwrap();
        coord.retrieve(&mut c, PE0).unwrap();

        let tl = coord.timeline();
        assert!(tl.is_complete());
        assert!(tl.get(Stage::PreTransfer) <= tl.get(Stage::PreLaunch));
        assert!(tl.get(Stage::PostLaunch) <= tl.get(Stage::PostRetrieve));

        let report = coord.perf_report(total, parallel).unwrap().with_dims(2, 2, 2);
        assert_eq!(report.total_operations, 2 * 8 + 3 * 4);
        assert!(report.to_csv_row().starts_with("DATA_CSV:,250,2,2,2,"));
        c
    };
    assert_eq!(c.as_i16().unwrap(), &[19, 22, 43, 50]);
}
