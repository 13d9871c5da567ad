//! Runner configuration, loaded from a JSON file.
//! Every field has a default, so `{}` is a valid config.

use crate::{checkpoint::RetryPolicy, checkpoint::CHECKPOINT_FILE, types::Turn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub input_path:      PathBuf,
    pub checkpoint_path: PathBuf,
    pub output_path:     PathBuf,
    pub outcome_path:    PathBuf,
    /// SQLite ledger file; in-memory when absent.
    pub ledger_path:     Option<PathBuf>,
    /// Presence of this file asks the run to checkpoint and suspend.
    pub suspend_file:    Option<PathBuf>,
    pub save_retries:    u32,
    pub save_backoff_ms: u64,
    pub max_turns_per_invocation: Option<Turn>,
    pub discard_checkpoint_on_completion: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            input_path:      PathBuf::from("beamrun_input.bin"),
            checkpoint_path: PathBuf::from(CHECKPOINT_FILE),
            output_path:     PathBuf::from("beamrun_state_out.bin"),
            outcome_path:    PathBuf::from("beamrun_outcome.json"),
            ledger_path:     None,
            suspend_file:    None,
            save_retries:    3,
            save_backoff_ms: 250,
            max_turns_per_invocation: None,
            discard_checkpoint_on_completion: false,
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: RunnerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { attempts: self.save_retries.max(1), backoff_ms: self.save_backoff_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_all_defaults() {
        let config: RunnerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert_eq!(config.checkpoint_path, PathBuf::from("checkpoint.bin"));
    }

    #[test]
    fn partial_override() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"save_retries": 0, "max_turns_per_invocation": 500}"#).unwrap();
        assert_eq!(config.retry_policy().attempts, 1);
        assert_eq!(config.max_turns_per_invocation, Some(500));
        assert_eq!(config.output_path, PathBuf::from("beamrun_state_out.bin"));
    }
}
