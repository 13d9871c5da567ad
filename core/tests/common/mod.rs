//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use beamrun_core::{
    checkpoint::{CheckpointStore, RetryPolicy},
    engine::TrackingEngine,
    kernel::{KernelFault, TrackKernel, TrackRequest},
    layout::{ElementKind, ParticleStatus, RunInput, RunInputBuilder},
    ledger::RunLedger,
    reference_kernel::{fodo_ring, linspace_ensemble, ReferenceKernel},
    suspend::SuspendFlag,
    types::Turn,
};
use std::{
    any::Any,
    path::{Path, PathBuf},
};

/// A scratch directory under the system temp dir, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(label: &str) -> Self {
        let path = std::env::temp_dir().join(format!("beamrun-{label}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Two-cell demo ring, four particles well inside the aperture.
pub fn ring_input(num_turns: Turn, checkpoint_every: Turn) -> RunInput {
    RunInputBuilder::new(fodo_ring(2, 7), linspace_ensemble(4, 0.005), num_turns)
        .checkpoint_every(checkpoint_every)
        .build()
        .expect("ring input")
}

/// Route `log` output through the test harness; `RUST_LOG=debug` to see it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn ledger() -> RunLedger {
    let ledger = RunLedger::in_memory().expect("in-memory ledger");
    ledger.migrate().expect("migration");
    ledger
}

pub fn store(dir: &TempDir) -> CheckpointStore {
    CheckpointStore::open(dir.join("checkpoint.bin"))
        .expect("open checkpoint store")
        .with_retry(RetryPolicy::once())
}

pub fn engine(dir: &TempDir, input: RunInput, kernel: ScriptedKernel) -> TrackingEngine {
    init_logging();
    TrackingEngine::initialize(input, store(dir), ledger(), Box::new(kernel))
        .expect("initialize engine")
        .with_output(dir.join("out.bin"))
}

/// Reference kernel plus scripted misbehaviour. Turn numbers below are
/// the state's `current_turn` once the scripted turn has been tracked.
#[derive(Default)]
pub struct ScriptedKernel {
    inner:       ReferenceKernel,
    pub calls:   u64,
    fail_on:     Option<Turn>,
    lose_all_at: Option<Turn>,
    suspend_at:  Option<(Turn, SuspendFlag)>,
    remove_dir:  Option<(Turn, PathBuf)>,
}

impl ScriptedKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault while tracking the turn that would reach `turn`.
    pub fn fail_reaching(mut self, turn: Turn) -> Self {
        self.fail_on = Some(turn);
        self
    }

    /// Every alive particle is lost on the turn that reaches `turn`.
    pub fn lose_all_at(mut self, turn: Turn) -> Self {
        self.lose_all_at = Some(turn);
        self
    }

    /// Raise `flag` once `turn` has been tracked.
    pub fn suspend_at(mut self, turn: Turn, flag: SuspendFlag) -> Self {
        self.suspend_at = Some((turn, flag));
        self
    }

    /// Delete `dir` once `turn` has been tracked, so later saves there fail.
    pub fn remove_dir_at(mut self, turn: Turn, dir: impl Into<PathBuf>) -> Self {
        self.remove_dir = Some((turn, dir.into()));
        self
    }
}

impl TrackKernel for ScriptedKernel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn track_line(&mut self, mut request: TrackRequest<'_>) -> Result<(), KernelFault> {
        self.calls += 1;
        let reaching = request.turn + 1;
        if self.fail_on == Some(reaching) {
            return Err(KernelFault::Aborted(format!("scripted fault reaching turn {reaching}")));
        }
        if self.lose_all_at == Some(reaching) {
            for slot in 0..request.particles.capacity() {
                if request.particles.status(slot) == ParticleStatus::Alive {
                    request.particles.set_state(slot, 0);
                }
            }
        }
        self.inner.track_line(request)?;
        if let Some((turn, flag)) = &self.suspend_at {
            if *turn == reaching {
                flag.request();
            }
        }
        if let Some((turn, dir)) = &self.remove_dir {
            if *turn == reaching {
                std::fs::remove_dir_all(dir).expect("remove checkpoint dir");
            }
        }
        Ok(())
    }

    fn supports(&self, kind: ElementKind) -> bool {
        self.inner.supports(kind)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn kernel_calls(engine: &TrackingEngine) -> u64 {
    engine
        .kernel()
        .as_any()
        .downcast_ref::<ScriptedKernel>()
        .expect("scripted kernel")
        .calls
}

/// (turn, trigger) of every checkpoint the engine recorded.
pub fn checkpoints(engine: &TrackingEngine) -> Vec<(Turn, String)> {
    engine
        .ledger()
        .checkpoints_for_run(&engine.run_id)
        .expect("checkpoint rows")
        .into_iter()
        .map(|row| (row.turn, row.trigger))
        .collect()
}

/// Run `input` start to finish with a healthy kernel; returns the final
/// state bytes.
pub fn uninterrupted(input: &RunInput) -> Vec<u8> {
    let dir = TempDir::new("reference");
    let mut engine = engine(&dir, input.clone(), ScriptedKernel::new());
    let outcome = engine.run();
    assert_eq!(outcome.exit_code, 0, "reference run must complete: {outcome:?}");
    std::fs::read(dir.join("out.bin")).expect("reference output")
}
