//! Binary layout codec: fixed-offset records shared by host and kernel.
//!
//! RULES:
//!   - Every field is one little-endian 8-byte word (i64, u64 or f64).
//!   - Every record starts with the layout version tag.
//!   - Every reference is a byte offset relative to the start of the
//!     record that contains it. No absolute address ever reaches the wire.
//!   - Variable-length sections are padded to a word boundary with zeros,
//!     so encoding the same value always yields the same bytes.
//!
//! Accessors resolve a logical field with
//! `header size + slot stride × index + contained relative offset`.

pub mod input;
pub mod lattice;
pub mod monitor;
pub mod particles;
pub mod state;

use crate::{
    error::{SimError, SimResult},
    version::{LayoutVersion, LAYOUT_VERSION},
};

pub use input::{MonitorRef, RunInput, RunInputBuilder};
pub use lattice::{ElementKind, ElementRef, Lattice, LatticeBuilder};
pub use monitor::{MonitorSample, MonitorSpec, Monitors, MonitorsMut};
pub use particles::{Particle, ParticleStatus, Particles, ParticlesMut, StatusCounts};
pub use state::SimulationState;

/// Size of one wire word.
pub const WORD: usize = 8;

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&buf[offset..offset + WORD]);
    u64::from_le_bytes(word)
}

pub(crate) fn read_i64(buf: &[u8], offset: usize) -> i64 {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&buf[offset..offset + WORD]);
    i64::from_le_bytes(word)
}

pub(crate) fn read_f64(buf: &[u8], offset: usize) -> f64 {
    f64::from_bits(read_u64(buf, offset))
}

pub(crate) fn write_i64(buf: &mut [u8], offset: usize, value: i64) {
    buf[offset..offset + WORD].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_f64(buf: &mut [u8], offset: usize, value: f64) {
    buf[offset..offset + WORD].copy_from_slice(&value.to_bits().to_le_bytes());
}

/// Round a byte length up to the next word boundary.
pub(crate) fn pad_to_word(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Fail with `TruncatedData` unless `buf` holds at least `needed` bytes.
pub(crate) fn require_len(record: &'static str, buf: &[u8], needed: usize) -> SimResult<()> {
    if buf.len() < needed {
        return Err(SimError::TruncatedData {
            record,
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Check the leading version tag. Runs before any other validation so a
/// foreign record is always reported as a version mismatch.
pub(crate) fn check_version(record: &'static str, buf: &[u8]) -> SimResult<()> {
    require_len(record, buf, WORD)?;
    let found = LayoutVersion::from_tag(read_u64(buf, 0));
    if found != LAYOUT_VERSION {
        return Err(SimError::LayoutVersionMismatch {
            expected: LAYOUT_VERSION,
            found,
        });
    }
    Ok(())
}

/// Read a non-negative count or size field.
pub(crate) fn read_len(record: &'static str, buf: &[u8], offset: usize, field: &str) -> SimResult<usize> {
    let raw = read_i64(buf, offset);
    usize::try_from(raw)
        .map_err(|_| SimError::malformed(record, format!("{field} is negative ({raw})")))
}

/// Byte span of `count` slots of `stride` bytes, rejecting overflow.
pub(crate) fn span(record: &'static str, count: usize, stride: usize) -> SimResult<usize> {
    count
        .checked_mul(stride)
        .ok_or_else(|| SimError::malformed(record, format!("{count} slots overflow the address space")))
}

/// Resolve a relative offset stored at `field_at` into an absolute index
/// into `buf`, checking alignment and that `span` bytes fit behind it.
pub(crate) fn resolve_offset(
    record: &'static str,
    buf: &[u8],
    field_at: usize,
    span: usize,
) -> SimResult<usize> {
    let raw = read_i64(buf, field_at);
    let offset = usize::try_from(raw)
        .map_err(|_| SimError::malformed(record, format!("negative relative offset {raw} at byte {field_at}")))?;
    if offset % WORD != 0 {
        return Err(SimError::malformed(
            record,
            format!("unaligned relative offset {offset} at byte {field_at}"),
        ));
    }
    let end = offset
        .checked_add(span)
        .ok_or_else(|| SimError::malformed(record, format!("offset {offset} overflows")))?;
    require_len(record, buf, end)?;
    Ok(offset)
}

/// Append-only word writer used by every encoder.
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn push_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Reserve a word to be patched later (typically a relative offset).
    pub fn reserve_word(&mut self) -> usize {
        let at = self.position();
        self.push_i64(0);
        at
    }

    pub fn patch_i64(&mut self, at: usize, value: i64) {
        write_i64(&mut self.buf, at, value);
    }

    /// Append raw bytes followed by zero padding up to a word boundary.
    pub fn push_padded(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        let padded = pad_to_word(bytes.len());
        self.buf.resize(self.buf.len() + (padded - bytes.len()), 0);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Convert a host length into a wire word.
pub(crate) fn word_from_len(len: usize) -> i64 {
    // Records are bounded by addressable memory, far below i64::MAX.
    len as i64
}
