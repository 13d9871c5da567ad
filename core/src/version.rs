//! Layout version tag shared by every binary record.
//!
//! The tag is the first word of every record. Host and kernel only agree on
//! offsets when the tags match exactly, so any change to a record layout
//! must bump this version.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const LAYOUT_VERSION: LayoutVersion = LayoutVersion::new(0, 1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl LayoutVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Packed integer form stored on the wire.
    pub const fn tag(self) -> u64 {
        self.major * 1_000_000 + self.minor * 1_000 + self.patch
    }

    pub const fn from_tag(tag: u64) -> Self {
        Self {
            major: tag / 1_000_000,
            minor: (tag / 1_000) % 1_000,
            patch: tag % 1_000,
        }
    }
}

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
