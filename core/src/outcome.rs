//! Run outcome: what one invocation reports to the external scheduler.

use crate::{
    checkpoint::write_atomically,
    error::{ErrorKind, SimError, SimResult},
    types::{RunId, Turn},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const EXIT_COMPLETED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
/// EX_TEMPFAIL: the job is resumable and should be rescheduled.
pub const EXIT_SUSPENDED: i32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Suspended,
    Failed,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => EXIT_COMPLETED,
            Self::Suspended => EXIT_SUSPENDED,
            Self::Failed    => EXIT_FAILED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Suspended => "suspended",
            Self::Failed    => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "suspended" => Some(Self::Suspended),
            "failed"    => Some(Self::Failed),
            _           => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind:    ErrorKind,
    pub message: String,
}

impl From<&SimError> for ErrorRecord {
    fn from(e: &SimError) -> Self {
        Self { kind: e.kind(), message: e.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Unknown only when the input could not be read.
    pub run_id:     Option<RunId>,
    pub status:     RunStatus,
    pub exit_code:  i32,
    pub final_turn: Option<Turn>,
    pub num_turns:  Option<Turn>,
    pub alive:      usize,
    pub lost:       usize,
    pub error:      Option<ErrorRecord>,
}

impl RunOutcome {
    pub fn new(status: RunStatus, run_id: Option<RunId>) -> Self {
        Self {
            run_id,
            status,
            exit_code: status.exit_code(),
            final_turn: None,
            num_turns: None,
            alive: 0,
            lost: 0,
            error: None,
        }
    }

    pub fn failed(run_id: Option<RunId>, error: &SimError) -> Self {
        Self { error: Some(ErrorRecord::from(error)), ..Self::new(RunStatus::Failed, run_id) }
    }

    pub fn is_resumable(&self) -> bool {
        self.status == RunStatus::Suspended
    }

    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the outcome as JSON, atomically.
    pub fn write_json(&self, path: &Path) -> SimResult<()> {
        let mut json = self.to_json()?;
        json.push('\n');
        write_atomically(path, json.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(RunStatus::Completed.exit_code(), 0);
        assert_eq!(RunStatus::Suspended.exit_code(), 75);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
    }

    #[test]
    fn failed_outcome_carries_error_kind() {
        let err = SimError::TrackerFault { turn: 12, reason: "boom".into() };
        let outcome = RunOutcome::failed(Some("run-1".into()), &err);
        assert_eq!(outcome.exit_code, EXIT_FAILED);
        let json = outcome.to_json().unwrap();
        assert!(json.contains(r#""kind": "tracker_fault""#), "{json}");
        assert!(json.contains(r#""status": "failed""#));
    }

    #[test]
    fn status_names_round_trip() {
        for status in [RunStatus::Completed, RunStatus::Suspended, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
    }
}
