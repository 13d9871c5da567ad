use crate::{types::Turn, version::LayoutVersion};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Layout version mismatch: expected {expected}, found {found}")]
    LayoutVersionMismatch {
        expected: LayoutVersion,
        found:    LayoutVersion,
    },

    #[error("Truncated {record}: need {needed} bytes, have {available}")]
    TruncatedData {
        record:    &'static str,
        needed:    usize,
        available: usize,
    },

    #[error("Malformed {record}: {reason}")]
    MalformedLayout {
        record: &'static str,
        reason: String,
    },

    #[error("No checkpoint at {}", .path.display())]
    NoCheckpoint { path: PathBuf },

    #[error("Corrupt checkpoint at {}: {reason}", .path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("Invalid resume state: {reason}")]
    InvalidResumeState { reason: String },

    #[error("Storage failure on {}: {source}", .path.display())]
    StorageFailure {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Tracker fault at turn {turn}: {reason}")]
    TrackerFault { turn: Turn, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageFailure { path: path.into(), source }
    }

    pub fn malformed(record: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedLayout { record, reason: reason.into() }
    }

    /// Stable classification reported to the external scheduler.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LayoutVersionMismatch { .. } => ErrorKind::LayoutVersionMismatch,
            Self::TruncatedData { .. }         => ErrorKind::TruncatedData,
            Self::MalformedLayout { .. }       => ErrorKind::MalformedLayout,
            Self::NoCheckpoint { .. }          => ErrorKind::NoCheckpoint,
            Self::CorruptCheckpoint { .. }     => ErrorKind::CorruptCheckpoint,
            Self::InvalidResumeState { .. }    => ErrorKind::InvalidResumeState,
            Self::StorageFailure { .. }        => ErrorKind::StorageFailure,
            Self::TrackerFault { .. }          => ErrorKind::TrackerFault,
            Self::InvalidInput(_)              => ErrorKind::InvalidInput,
            Self::Database(_)                  => ErrorKind::Database,
            Self::Serialization(_)             => ErrorKind::Serialization,
            Self::Other(_)                     => ErrorKind::Other,
        }
    }
}

/// Machine-readable error classification.
/// Variants are appended only; the scheduler matches on the serialized names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LayoutVersionMismatch,
    TruncatedData,
    MalformedLayout,
    NoCheckpoint,
    CorruptCheckpoint,
    InvalidResumeState,
    StorageFailure,
    TrackerFault,
    InvalidInput,
    Database,
    Serialization,
    Other,
}

pub type SimResult<T> = Result<T, SimError>;
