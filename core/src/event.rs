//! Run lifecycle events.
//!
//! RULE: Every state-machine transition that matters to an operator is
//! recorded as a RunEvent in the ledger. Variants are appended only; the
//! serialized names are part of the ledger format.

use crate::{
    error::ErrorKind,
    policy::CheckpointTrigger,
    types::{InvocationId, RunId, Turn},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id:     RunId,
        kernel:     String,
        num_turns:  Turn,
        start_turn: Turn,
    },
    Resumed {
        turn: Turn,
    },
    CheckpointWritten {
        turn:     Turn,
        trigger:  CheckpointTrigger,
        checksum: String,
        bytes:    usize,
    },
    Suspended {
        turn:    Turn,
        trigger: CheckpointTrigger,
    },
    Completed {
        turn:  Turn,
        alive: usize,
        lost:  usize,
        early: bool,
    },
    Failed {
        turn:    Option<Turn>,
        kind:    ErrorKind,
        message: String,
    },
}

/// Stable string name of a RunEvent variant.
/// Used for the event_type column in run_event.
pub fn event_type_name(event: &RunEvent) -> &'static str {
    match event {
        RunEvent::RunStarted { .. }        => "run_started",
        RunEvent::Resumed { .. }           => "resumed",
        RunEvent::CheckpointWritten { .. } => "checkpoint_written",
        RunEvent::Suspended { .. }         => "suspended",
        RunEvent::Completed { .. }         => "completed",
        RunEvent::Failed { .. }            => "failed",
    }
}

/// The event as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventEntry {
    pub id:            Option<i64>,
    pub run_id:        RunId,
    pub invocation_id: InvocationId,
    pub turn:          Turn,
    pub event_type:    String,
    pub payload:       String, // JSON-serialized RunEvent
}

impl RunEventEntry {
    pub fn new(
        run_id: &str,
        invocation_id: &str,
        turn: Turn,
        event: &RunEvent,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id:            None,
            run_id:        run_id.to_string(),
            invocation_id: invocation_id.to_string(),
            turn,
            event_type:    event_type_name(event).to_string(),
            payload:       serde_json::to_string(event)?,
        })
    }

    pub fn event(&self) -> serde_json::Result<RunEvent> {
        serde_json::from_str(&self.payload)
    }
}
