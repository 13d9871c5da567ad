//! Simulation state record.
//!
//! ```text
//! 0    layout version tag
//! 8    current_turn
//! 16   total record size in bytes
//! 24   particle capacity
//! 32   relative offset of the particle region
//! 40   relative offset of the monitor table
//! 48   particle slots…  monitor table…
//! ```
//!
//! The record is kept in its wire form for the whole run. The kernel works
//! on the particle and monitor regions in place, so checkpointing is a
//! plain copy of the buffer.

use super::{
    check_version,
    monitor::{self, MonitorSpec, Monitors, MonitorsMut},
    particles::{self, Particle, Particles, ParticlesMut, StatusCounts, PARTICLE_STRIDE},
    read_i64, read_len, require_len, resolve_offset, word_from_len, write_i64, ByteWriter, WORD,
};
use crate::{
    error::{SimError, SimResult},
    types::{ElementIndex, Turn},
    version::LAYOUT_VERSION,
};
use std::fmt;

const RECORD: &str = "simulation state";

pub const STATE_HEADER: usize = 6 * WORD;

mod offset {
    use super::WORD;

    pub const CURRENT_TURN: usize = WORD;
    pub const XSIZE:        usize = 2 * WORD;
    pub const CAPACITY:     usize = 3 * WORD;
    pub const PARTICLES:    usize = 4 * WORD;
    pub const MONITORS:     usize = 5 * WORD;
}

#[derive(Clone, PartialEq, Eq)]
pub struct SimulationState {
    buf: Vec<u8>,
}

impl SimulationState {
    /// A fresh state at turn 0. Slots beyond `particles.len()` are invalid.
    pub fn new(
        particles: &[Particle],
        capacity: usize,
        monitors: &[(ElementIndex, MonitorSpec)],
    ) -> SimResult<Self> {
        if capacity < particles.len() {
            return Err(SimError::InvalidInput(format!(
                "capacity {capacity} below ensemble size {}",
                particles.len()
            )));
        }
        if capacity.checked_mul(PARTICLE_STRIDE).is_none() {
            return Err(SimError::InvalidInput(format!("capacity {capacity} overflows")));
        }
        let slots = particles::encode_slots(particles, capacity);
        let table = monitor::encode_table(monitors)?;
        let xsize = STATE_HEADER + slots.len() + table.len();

        let mut w = ByteWriter::with_capacity(xsize);
        w.push_u64(LAYOUT_VERSION.tag());
        w.push_i64(0);
        w.push_i64(word_from_len(xsize));
        w.push_i64(word_from_len(capacity));
        w.push_i64(word_from_len(STATE_HEADER));
        w.push_i64(word_from_len(STATE_HEADER + slots.len()));
        w.push_padded(&slots);
        w.push_padded(&table);
        Ok(Self { buf: w.into_bytes() })
    }

    /// Decode a record that occupies exactly `bytes`.
    pub fn decode(bytes: &[u8]) -> SimResult<Self> {
        check_version(RECORD, bytes)?;
        require_len(RECORD, bytes, STATE_HEADER)?;

        let turn = read_i64(bytes, offset::CURRENT_TURN);
        if turn < 0 {
            return Err(SimError::malformed(RECORD, format!("negative current_turn {turn}")));
        }
        let xsize = read_len(RECORD, bytes, offset::XSIZE, "record size")?;
        require_len(RECORD, bytes, xsize)?;
        if bytes.len() > xsize {
            return Err(SimError::malformed(
                RECORD,
                format!("{} trailing bytes after record", bytes.len() - xsize),
            ));
        }
        let record = &bytes[..xsize];

        let capacity = read_len(RECORD, record, offset::CAPACITY, "capacity")?;
        let region = capacity
            .checked_mul(PARTICLE_STRIDE)
            .ok_or_else(|| SimError::malformed(RECORD, "capacity overflows"))?;
        let particles_at = resolve_offset(RECORD, record, offset::PARTICLES, region)?;
        let monitors_at = resolve_offset(RECORD, record, offset::MONITORS, 0)?;
        if particles_at < STATE_HEADER || monitors_at < particles_at + region {
            return Err(SimError::malformed(RECORD, "particle and monitor regions overlap"));
        }
        monitor::decode_table(&record[monitors_at..])?;

        Ok(Self { buf: record.to_vec() })
    }

    /// Wire form of the record. Deterministic: equal states give equal bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn current_turn(&self) -> Turn {
        read_i64(&self.buf, offset::CURRENT_TURN) as Turn
    }

    pub(crate) fn set_current_turn(&mut self, turn: Turn) {
        write_i64(&mut self.buf, offset::CURRENT_TURN, turn as i64);
    }

    pub fn capacity(&self) -> usize {
        read_i64(&self.buf, offset::CAPACITY) as usize
    }

    fn particles_range(&self) -> (usize, usize) {
        let at = read_i64(&self.buf, offset::PARTICLES) as usize;
        (at, at + self.capacity() * PARTICLE_STRIDE)
    }

    fn monitors_at(&self) -> usize {
        read_i64(&self.buf, offset::MONITORS) as usize
    }

    pub fn particles(&self) -> Particles<'_> {
        let (start, end) = self.particles_range();
        Particles::new(&self.buf[start..end])
    }

    pub fn monitors(&self) -> Monitors<'_> {
        Monitors::new(&self.buf[self.monitors_at()..])
    }

    /// Borrow the particle region and monitor table mutably at once.
    pub fn split_mut(&mut self) -> (ParticlesMut<'_>, MonitorsMut<'_>) {
        let (start, end) = self.particles_range();
        let monitors_at = self.monitors_at();
        let (head, table) = self.buf.split_at_mut(monitors_at);
        (
            ParticlesMut::new(&mut head[start..end]),
            MonitorsMut::new(table),
        )
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.particles().status_counts()
    }

    /// Monitor descriptors (element index and windows), without samples.
    pub fn monitor_metadata(&self) -> Vec<(ElementIndex, MonitorSpec)> {
        let monitors = self.monitors();
        (0..monitors.count())
            .filter_map(|k| Some((monitors.element_index(k)?, monitors.spec(k)?)))
            .collect()
    }

    /// Whether `other` could stand in for this state: same slot capacity
    /// and same monitor metadata.
    pub fn same_shape(&self, other: &SimulationState) -> bool {
        self.capacity() == other.capacity() && self.monitor_metadata() == other.monitor_metadata()
    }
}

impl fmt::Debug for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationState")
            .field("current_turn", &self.current_turn())
            .field("capacity", &self.capacity())
            .field("status", &self.status_counts())
            .field("monitors", &self.monitors().count())
            .field("bytes", &self.buf.len())
            .finish()
    }
}
