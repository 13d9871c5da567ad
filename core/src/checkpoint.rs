//! Checkpoint store: durable, atomic persistence of the simulation state.
//!
//! On-disk form: the state record followed by the SHA-256 of that record.
//!
//! RULES:
//!   - A save never overwrites the checkpoint in place. It writes a uniquely
//!     named temporary file next to the target, syncs it, renames it over the
//!     target and syncs the directory. A crash at any point leaves either the
//!     previous checkpoint or the new one, never a mix.
//!   - Saves get a bounded retry on storage failures. Loads are never retried.
//!   - Temporary files left behind by a crashed writer are swept on open.

use crate::{
    digest::{self, DIGEST_LEN},
    error::{SimError, SimResult},
    layout::SimulationState,
    types::Turn,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};
use uuid::Uuid;

pub const CHECKSUM_LEN: usize = DIGEST_LEN;

/// Default checkpoint file name inside the job directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.bin";

/// Bounded retry with linear backoff, applied to saves only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts:   u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, backoff_ms: 250 }
    }
}

impl RetryPolicy {
    /// A single attempt, no backoff.
    pub fn once() -> Self {
        Self { attempts: 1, backoff_ms: 0 }
    }

    fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Receipt for a committed checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHandle {
    pub turn:     Turn,
    pub checksum: String,
    pub bytes:    usize,
    pub path:     PathBuf,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path:  PathBuf,
    retry: RetryPolicy,
}

impl CheckpointStore {
    /// Open the store for `path`, creating its directory and removing stale
    /// temporary files from earlier crashed saves.
    pub fn open(path: impl Into<PathBuf>) -> SimResult<Self> {
        let path = path.into();
        let dir = parent_dir(&path);
        fs::create_dir_all(&dir).map_err(|e| SimError::storage(&dir, e))?;
        sweep_stale_temps(&path)?;
        Ok(Self { path, retry: RetryPolicy::default() })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Persist `state` atomically, retrying storage failures.
    pub fn save(&self, state: &SimulationState) -> SimResult<CheckpointHandle> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.stage(state).and_then(StagedCheckpoint::commit) {
                Ok(handle) => {
                    log::debug!(
                        "Checkpoint at turn {} written ({} bytes, sha256 {})",
                        handle.turn, handle.bytes, handle.checksum
                    );
                    return Ok(handle);
                }
                Err(e @ SimError::StorageFailure { .. }) if attempt < attempts => {
                    log::warn!("Checkpoint save attempt {attempt}/{attempts} failed: {e}");
                    thread::sleep(self.retry.delay(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// First half of a save: the framed state is written and synced to a
    /// temporary file, but the checkpoint path is untouched until
    /// [`StagedCheckpoint::commit`].
    pub fn stage(&self, state: &SimulationState) -> SimResult<StagedCheckpoint> {
        let framed = frame(state.as_bytes());
        let checksum = digest::hex(&framed[framed.len() - CHECKSUM_LEN..]);
        let temp = stage_bytes(&self.path, &framed)?;
        Ok(StagedCheckpoint {
            temp,
            target: self.path.clone(),
            turn: state.current_turn(),
            checksum,
            bytes: framed.len(),
            committed: false,
        })
    }

    pub fn load(&self) -> SimResult<SimulationState> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SimError::NoCheckpoint { path: self.path.clone() });
            }
            Err(e) => return Err(SimError::storage(&self.path, e)),
        };
        unframe(&self.path, &bytes)
    }

    /// Remove the checkpoint. Returns whether a file was removed.
    pub fn discard(&self) -> SimResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                sync_dir(&parent_dir(&self.path))?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SimError::storage(&self.path, e)),
        }
    }
}

/// A checkpoint written to its temporary file but not yet renamed into
/// place. Dropping it without committing removes the temporary file.
#[derive(Debug)]
pub struct StagedCheckpoint {
    temp:      PathBuf,
    target:    PathBuf,
    turn:      Turn,
    checksum:  String,
    bytes:     usize,
    committed: bool,
}

impl StagedCheckpoint {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn commit(mut self) -> SimResult<CheckpointHandle> {
        fs::rename(&self.temp, &self.target).map_err(|e| SimError::storage(&self.target, e))?;
        self.committed = true;
        sync_dir(&parent_dir(&self.target))?;
        Ok(CheckpointHandle {
            turn:     self.turn,
            checksum: std::mem::take(&mut self.checksum),
            bytes:    self.bytes,
            path:     self.target.clone(),
        })
    }
}

impl Drop for StagedCheckpoint {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Append the checksum trailer.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    framed.extend_from_slice(payload);
    framed.extend_from_slice(&digest::sha256(payload));
    framed
}

/// Verify and decode a framed checkpoint read from `path`.
///
/// Truncation, a checksum mismatch or an undecodable payload are all
/// `CorruptCheckpoint`. A checksum-valid payload from another layout
/// version keeps its `LayoutVersionMismatch`.
pub fn unframe(path: &Path, bytes: &[u8]) -> SimResult<SimulationState> {
    let corrupt = |reason: String| SimError::CorruptCheckpoint { path: path.to_path_buf(), reason };
    if bytes.len() <= CHECKSUM_LEN {
        return Err(corrupt(format!("{} bytes is too short for a checkpoint", bytes.len())));
    }
    let (payload, stored) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if digest::sha256(payload).as_slice() != stored {
        return Err(corrupt("checksum mismatch".into()));
    }
    SimulationState::decode(payload).map_err(|e| match e {
        SimError::TruncatedData { .. } | SimError::MalformedLayout { .. } => corrupt(e.to_string()),
        other => other,
    })
}

/// Write `bytes` to `path` with the same temp-sync-rename-sync sequence
/// used for checkpoints.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> SimResult<()> {
    let temp = stage_bytes(path, bytes)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(SimError::storage(path, e));
    }
    sync_dir(&parent_dir(path))
}

// ── Filesystem helpers ─────────────────────────────────────────

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn temp_prefix(target: &Path) -> String {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.tmp-")
}

fn stage_bytes(target: &Path, bytes: &[u8]) -> SimResult<PathBuf> {
    let temp = parent_dir(target).join(format!("{}{}", temp_prefix(target), Uuid::new_v4().simple()));
    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(SimError::storage(&temp, e));
    }
    Ok(temp)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> SimResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| SimError::storage(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> SimResult<()> {
    Ok(())
}

fn sweep_stale_temps(target: &Path) -> SimResult<()> {
    let dir = parent_dir(target);
    let prefix = temp_prefix(target);
    let entries = fs::read_dir(&dir).map_err(|e| SimError::storage(&dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SimError::storage(&dir, e))?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            log::warn!("Removing stale checkpoint temp file {}", entry.path().display());
            fs::remove_file(entry.path()).map_err(|e| SimError::storage(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff() {
        let retry = RetryPolicy { attempts: 4, backoff_ms: 100 };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(3), Duration::from_millis(300));
    }

    #[test]
    fn bare_file_name_lives_in_current_dir() {
        assert_eq!(parent_dir(Path::new("checkpoint.bin")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/a/b/checkpoint.bin")), PathBuf::from("/a/b"));
        assert_eq!(temp_prefix(Path::new("/a/checkpoint.bin")), ".checkpoint.bin.tmp-");
    }

    #[test]
    fn short_and_tampered_frames_are_corrupt() {
        let path = Path::new("mem");
        assert!(matches!(unframe(path, &[0; 8]), Err(SimError::CorruptCheckpoint { .. })));
        let mut framed = frame(&crate::version::LAYOUT_VERSION.tag().to_le_bytes());
        assert!(matches!(unframe(path, &framed), Err(SimError::CorruptCheckpoint { .. })));
        framed[0] ^= 1;
        assert!(matches!(unframe(path, &framed), Err(SimError::CorruptCheckpoint { .. })));
    }
}
