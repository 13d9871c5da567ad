//! The tracking engine: the checkpoint/resume state machine.
//!
//! PHASES:
//!   Initializing → Running → (Checkpointing → Running)* → Completed | Suspended | Failed
//!
//! RULES:
//!   - The kernel advances exactly one turn per shim call.
//!   - Checkpoint, stop and suspend decisions are taken only at turn
//!     boundaries (see policy.rs for their order).
//!   - Completed and Suspended are always preceded by a checkpoint of the
//!     state they report.
//!   - A tracker fault is never retried. Checkpoint saves are retried by
//!     the store; anything that still fails ends the run as Failed.
//!   - On resume the checkpoint file is the only source of state.

use crate::{
    checkpoint::{write_atomically, CheckpointStore},
    config::RunnerConfig,
    error::{SimError, SimResult},
    event::{RunEvent, RunEventEntry},
    kernel::{check_supported, TrackKernel},
    layout::{RunInput, SimulationState},
    ledger::RunLedger,
    outcome::{RunOutcome, RunStatus},
    policy::{Boundary, CheckpointPolicy, CheckpointTrigger},
    shim::KernelShim,
    suspend::{NeverSuspend, SuspendFile, SuspendSignal},
    types::{InvocationId, RunId, Turn},
    version::LAYOUT_VERSION,
};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    Running,
    Checkpointing,
    Completed,
    Suspended,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing  => "initializing",
            Self::Running       => "running",
            Self::Checkpointing => "checkpointing",
            Self::Completed     => "completed",
            Self::Suspended     => "suspended",
            Self::Failed        => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Suspended | Self::Failed)
    }

    fn enter(&mut self, next: RunPhase) {
        if *self != next {
            log::debug!("Phase {} -> {}", self.as_str(), next.as_str());
            *self = next;
        }
    }
}

pub struct TrackingEngine {
    pub run_id:        RunId,
    pub invocation_id: InvocationId,
    input:             RunInput,
    state:             SimulationState,
    kernel:            Box<dyn TrackKernel>,
    store:             CheckpointStore,
    ledger:            RunLedger,
    suspend:           Box<dyn SuspendSignal>,
    policy:            CheckpointPolicy,
    output:            Option<PathBuf>,
    discard_on_completion: bool,
    phase:             RunPhase,
    resumed_from:      Option<Turn>,
}

impl TrackingEngine {
    /// Load the checkpoint if there is one, otherwise start from the
    /// input's initial state. The ledger must already be migrated.
    pub fn initialize(
        input: RunInput,
        store: CheckpointStore,
        ledger: RunLedger,
        kernel: Box<dyn TrackKernel>,
    ) -> SimResult<Self> {
        let run_id = input.lineage_id();
        let invocation_id = Uuid::new_v4().to_string();
        ledger.register_run(&run_id, &input.checksum(), input.num_turns(), &LAYOUT_VERSION.to_string())?;

        let adopted = check_supported(input.lattice(), kernel.as_ref())
            .and_then(|()| adopt_checkpoint(&input, &store));
        let (state, resumed_from) = match adopted {
            Ok(adopted) => adopted,
            Err(e) => {
                let turn = input.initial_state().current_turn();
                ledger.start_invocation(&invocation_id, &run_id, kernel.name(), turn)?;
                log::error!("Run {run_id} cannot start: {e}");
                let event = RunEvent::Failed { turn: None, kind: e.kind(), message: e.to_string() };
                record(&ledger, &run_id, &invocation_id, turn, &event)?;
                ledger.record_outcome(&run_id, &invocation_id, &RunOutcome::failed(Some(run_id.clone()), &e))?;
                return Err(e);
            }
        };

        let start_turn = state.current_turn();
        ledger.start_invocation(&invocation_id, &run_id, kernel.name(), start_turn)?;
        let started = RunEvent::RunStarted {
            run_id:     run_id.clone(),
            kernel:     kernel.name().to_string(),
            num_turns:  input.num_turns(),
            start_turn,
        };
        record(&ledger, &run_id, &invocation_id, start_turn, &started)?;
        match resumed_from {
            Some(turn) => {
                log::info!("Run {run_id} resumed from checkpoint at turn {turn}/{}", input.num_turns());
                record(&ledger, &run_id, &invocation_id, turn, &RunEvent::Resumed { turn })?;
            }
            None => log::info!("Run {run_id} starting fresh, {} turns", input.num_turns()),
        }

        Ok(Self {
            policy: CheckpointPolicy::from_input(&input),
            run_id,
            invocation_id,
            input,
            state,
            kernel,
            store,
            ledger,
            suspend: Box::new(NeverSuspend),
            output: None,
            discard_on_completion: false,
            phase: RunPhase::Initializing,
            resumed_from,
        })
    }

    pub fn with_suspend_signal(mut self, signal: Box<dyn SuspendSignal>) -> Self {
        self.suspend = signal;
        self
    }

    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Where the final state is written on completion.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn with_discard_on_completion(mut self, discard: bool) -> Self {
        self.discard_on_completion = discard;
        self
    }

    pub fn input(&self) -> &RunInput {
        &self.input
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn resumed_from(&self) -> Option<Turn> {
        self.resumed_from
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// For downcasting the kernel in tests and tooling.
    pub fn kernel(&self) -> &dyn TrackKernel {
        self.kernel.as_ref()
    }

    /// Run until the job completes, suspends or fails.
    pub fn run(&mut self) -> RunOutcome {
        let outcome = match self.drive() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.phase.enter(RunPhase::Failed);
                let turn = self.state.current_turn();
                log::error!("Run {} failed at turn {turn}: {e}", self.run_id);
                let event = RunEvent::Failed { turn: Some(turn), kind: e.kind(), message: e.to_string() };
                if let Err(ledger_err) = record(&self.ledger, &self.run_id, &self.invocation_id, turn, &event) {
                    log::warn!("Could not record failure in the ledger: {ledger_err}");
                }
                RunOutcome { error: Some((&e).into()), ..self.outcome(RunStatus::Failed) }
            }
        };
        if let Err(e) = self.ledger.record_outcome(&self.run_id, &self.invocation_id, &outcome) {
            log::warn!("Could not record outcome in the ledger: {e}");
        }
        outcome
    }

    fn drive(&mut self) -> SimResult<RunOutcome> {
        match self.track_until_stop()? {
            CheckpointTrigger::Final => self.complete(),
            trigger => self.suspend(trigger),
        }
    }

    /// The turn loop. Returns the trigger of the checkpoint that ended it.
    fn track_until_stop(&mut self) -> SimResult<CheckpointTrigger> {
        let shim = KernelShim::new(&self.input)?;
        let num_turns = self.input.num_turns();
        let mut executed: Turn = 0;
        self.phase.enter(RunPhase::Running);

        loop {
            let turn = self.state.current_turn();
            let boundary = Boundary {
                turn,
                num_turns,
                alive: self.state.status_counts().alive,
                executed,
                suspend_requested: self.suspend.suspend_requested(),
            };

            if let Some(trigger) = self.policy.decide(&boundary) {
                self.phase.enter(RunPhase::Checkpointing);
                let handle = self.store.save(&self.state)?;
                self.ledger.record_checkpoint(&self.run_id, &self.invocation_id, trigger, &handle)?;
                let event = RunEvent::CheckpointWritten {
                    turn,
                    trigger,
                    checksum: handle.checksum.clone(),
                    bytes:    handle.bytes,
                };
                record(&self.ledger, &self.run_id, &self.invocation_id, turn, &event)?;
                log::info!("Checkpoint ({}) at turn {turn}/{num_turns}", trigger.as_str());
                if trigger.ends_invocation() {
                    return Ok(trigger);
                }
                self.phase.enter(RunPhase::Running);
            }

            shim.advance_one_turn(self.kernel.as_mut(), &mut self.state)?;
            executed += 1;
        }
    }

    fn complete(&mut self) -> SimResult<RunOutcome> {
        if let Some(path) = &self.output {
            write_atomically(path, self.state.as_bytes())?;
            log::info!("Final state written to {}", path.display());
        }
        if self.discard_on_completion && self.store.discard()? {
            log::debug!("Checkpoint {} discarded", self.store.path().display());
        }
        self.phase.enter(RunPhase::Completed);

        let outcome = self.outcome(RunStatus::Completed);
        let turn = self.state.current_turn();
        let event = RunEvent::Completed {
            turn,
            alive: outcome.alive,
            lost:  outcome.lost,
            early: turn < self.input.num_turns(),
        };
        record(&self.ledger, &self.run_id, &self.invocation_id, turn, &event)?;
        log::info!(
            "Run {} completed at turn {turn}/{}: {} alive, {} lost",
            self.run_id, self.input.num_turns(), outcome.alive, outcome.lost
        );
        Ok(outcome)
    }

    fn suspend(&mut self, trigger: CheckpointTrigger) -> SimResult<RunOutcome> {
        if trigger == CheckpointTrigger::Suspend {
            if let Err(e) = self.suspend.acknowledge() {
                log::warn!("Suspend request not cleared: {e}");
            }
        }
        self.phase.enter(RunPhase::Suspended);
        let turn = self.state.current_turn();
        record(&self.ledger, &self.run_id, &self.invocation_id, turn, &RunEvent::Suspended { turn, trigger })?;
        log::info!("Run {} suspended at turn {turn} ({})", self.run_id, trigger.as_str());
        Ok(self.outcome(RunStatus::Suspended))
    }

    fn outcome(&self, status: RunStatus) -> RunOutcome {
        let counts = self.state.status_counts();
        RunOutcome {
            final_turn: Some(self.state.current_turn()),
            num_turns: Some(self.input.num_turns()),
            alive: counts.alive,
            lost: counts.lost,
            ..RunOutcome::new(status, Some(self.run_id.clone()))
        }
    }
}

/// Load and validate the checkpoint, or fall back to the initial state.
fn adopt_checkpoint(
    input: &RunInput,
    store: &CheckpointStore,
) -> SimResult<(SimulationState, Option<Turn>)> {
    let state = match store.load() {
        Ok(state) => state,
        Err(SimError::NoCheckpoint { .. }) => return Ok((input.initial_state().clone(), None)),
        Err(e) => return Err(e),
    };
    let turn = state.current_turn();
    if turn > input.num_turns() {
        return Err(SimError::InvalidResumeState {
            reason: format!("checkpoint at turn {turn} is past num_turns {}", input.num_turns()),
        });
    }
    if !state.same_shape(input.initial_state()) {
        return Err(SimError::InvalidResumeState {
            reason: "checkpoint particle capacity or monitor layout differs from the input".into(),
        });
    }
    Ok((state, Some(turn)))
}

fn record(ledger: &RunLedger, run_id: &str, invocation_id: &str, turn: Turn, event: &RunEvent) -> SimResult<()> {
    ledger.append_event(&RunEventEntry::new(run_id, invocation_id, turn, event)?)
}

/// Run one invocation of the job described by `config` and write its
/// outcome record. Never panics; every failure becomes a Failed outcome.
pub fn run_job(config: &RunnerConfig, kernel: Box<dyn TrackKernel>) -> RunOutcome {
    let outcome = match prepare(config, kernel) {
        Ok(mut engine) => engine.run(),
        Err((run_id, e)) => {
            log::error!("Run could not start: {e}");
            RunOutcome::failed(run_id, &e)
        }
    };
    if let Err(e) = outcome.write_json(&config.outcome_path) {
        log::error!("Could not write outcome to {}: {e}", config.outcome_path.display());
    }
    outcome
}

fn prepare(
    config: &RunnerConfig,
    kernel: Box<dyn TrackKernel>,
) -> Result<TrackingEngine, (Option<RunId>, SimError)> {
    let input = RunInput::read_from(&config.input_path).map_err(|e| (None, e))?;
    let run_id = input.lineage_id();
    let with_id = |e: SimError| (Some(run_id.clone()), e);

    let store = CheckpointStore::open(&config.checkpoint_path)
        .map_err(with_id)?
        .with_retry(config.retry_policy());
    let ledger = match &config.ledger_path {
        Some(path) => RunLedger::open(path),
        None => RunLedger::in_memory(),
    }
    .map_err(with_id)?;
    ledger.migrate().map_err(with_id)?;

    let policy = CheckpointPolicy::from_input(&input).with_turn_budget(config.max_turns_per_invocation);
    let suspend: Box<dyn SuspendSignal> = match &config.suspend_file {
        Some(path) => Box::new(SuspendFile::new(path)),
        None => Box::new(NeverSuspend),
    };

    let engine = TrackingEngine::initialize(input, store, ledger, kernel).map_err(with_id)?;
    Ok(engine
        .with_policy(policy)
        .with_suspend_signal(suspend)
        .with_output(&config.output_path)
        .with_discard_on_completion(config.discard_checkpoint_on_completion))
}
