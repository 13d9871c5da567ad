//! Suspend signals, polled by the state machine between turns.
//!
//! RULE: A request is consumed once its suspend checkpoint is on disk.

use crate::error::{SimError, SimResult};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

pub trait SuspendSignal: Send {
    fn suspend_requested(&self) -> bool;

    /// Consume the pending request.
    fn acknowledge(&self) -> SimResult<()> {
        Ok(())
    }
}

/// In-process flag. Clones share the same flag, so one clone can be handed
/// to the engine and another kept by whoever wants to stop it.
#[derive(Debug, Clone, Default)]
pub struct SuspendFlag(Arc<AtomicBool>);

impl SuspendFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl SuspendSignal for SuspendFlag {
    fn suspend_requested(&self) -> bool {
        self.is_set()
    }

    fn acknowledge(&self) -> SimResult<()> {
        self.clear();
        Ok(())
    }
}

/// Sentinel file: its presence is a quit request from the host platform.
#[derive(Debug, Clone)]
pub struct SuspendFile {
    path: PathBuf,
}

impl SuspendFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SuspendSignal for SuspendFile {
    fn suspend_requested(&self) -> bool {
        self.path.exists()
    }

    /// Removes the sentinel. Already gone is fine.
    fn acknowledge(&self) -> SimResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SimError::storage(&self.path, e)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSuspend;

impl SuspendSignal for NeverSuspend {
    fn suspend_requested(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_clones_share_state() {
        let flag = SuspendFlag::new();
        let handle = flag.clone();
        assert!(!flag.suspend_requested());
        handle.request();
        assert!(flag.suspend_requested());
        flag.clear();
        assert!(!handle.is_set());
    }

    #[test]
    fn sentinel_file_presence() {
        let path = std::env::temp_dir().join(format!("beamrun-quit-{}", uuid::Uuid::new_v4()));
        let signal = SuspendFile::new(&path);
        assert!(!signal.suspend_requested());
        std::fs::write(&path, b"").unwrap();
        assert!(signal.suspend_requested());
        signal.acknowledge().unwrap();
        assert!(!path.exists(), "acknowledging consumes the sentinel");
        signal.acknowledge().unwrap();
    }

    #[test]
    fn acknowledged_flag_is_cleared() {
        let flag = SuspendFlag::new();
        flag.request();
        flag.acknowledge().unwrap();
        assert!(!flag.suspend_requested());
        assert!(NeverSuspend.acknowledge().is_ok());
    }
}
