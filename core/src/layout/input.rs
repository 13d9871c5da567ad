//! Run input record: the immutable job descriptor.
//!
//! ```text
//! 0    layout version tag
//! 8    num_turns
//! 16   num_elements
//! 24   ele_start
//! 32   ele_stop
//! 40   checkpoint_every (-1 = never)
//! 48   num_monitors
//! 56   relative offset of the monitor index array
//! 64   relative offset of the monitor size array
//! 72   relative offset of the lattice
//! 80   lattice size
//! 88   relative offset of the initial state
//! 96   initial state size
//! 104  variable sections…  initial state (always last)
//! ```
//!
//! The initial state is the tail of the record so it can be cut out
//! verbatim and used as the first checkpoint payload.

use super::{
    check_version,
    lattice::{ElementKind, Lattice},
    monitor::MonitorSpec,
    particles::Particle,
    read_i64, read_len, require_len, resolve_offset, span,
    state::SimulationState,
    word_from_len, ByteWriter, WORD,
};
use crate::{
    checkpoint::write_atomically,
    digest,
    error::{SimError, SimResult},
    types::{ElementIndex, RunId, Turn},
    version::LAYOUT_VERSION,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

const RECORD: &str = "run input";

pub const INPUT_HEADER: usize = 13 * WORD;

mod offset {
    use super::WORD;

    pub const NUM_TURNS:        usize = WORD;
    pub const NUM_ELEMENTS:     usize = 2 * WORD;
    pub const ELE_START:        usize = 3 * WORD;
    pub const ELE_STOP:         usize = 4 * WORD;
    pub const CHECKPOINT_EVERY: usize = 5 * WORD;
    pub const NUM_MONITORS:     usize = 6 * WORD;
    pub const IDX_MONITORS:     usize = 7 * WORD;
    pub const SIZE_MONITORS:    usize = 8 * WORD;
    pub const LATTICE:          usize = 9 * WORD;
    pub const LATTICE_SIZE:     usize = 10 * WORD;
    pub const STATE:            usize = 11 * WORD;
    pub const STATE_SIZE:       usize = 12 * WORD;
}

/// Where a monitor sits in the lattice and how many bytes its record
/// occupies in the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRef {
    pub element_index: ElementIndex,
    pub size:          usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInput {
    num_turns:        Turn,
    ele_start:        ElementIndex,
    ele_stop:         ElementIndex,
    checkpoint_every: Option<Turn>,
    monitors:         Vec<MonitorRef>,
    lattice:          Lattice,
    initial_state:    SimulationState,
}

impl RunInput {
    pub fn num_turns(&self) -> Turn {
        self.num_turns
    }

    pub fn num_elements(&self) -> usize {
        self.lattice.num_elements()
    }

    pub fn ele_start(&self) -> ElementIndex {
        self.ele_start
    }

    pub fn ele_stop(&self) -> ElementIndex {
        self.ele_stop
    }

    pub fn checkpoint_every(&self) -> Option<Turn> {
        self.checkpoint_every
    }

    pub fn monitors(&self) -> &[MonitorRef] {
        &self.monitors
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn initial_state(&self) -> &SimulationState {
        &self.initial_state
    }

    /// Hex SHA-256 of the encoded input.
    pub fn checksum(&self) -> String {
        digest::hex(&digest::sha256(&self.encode()))
    }

    /// Lineage id: a prefix of the content digest of the encoded input.
    /// Every invocation of the same job shares it.
    pub fn lineage_id(&self) -> RunId {
        format!("run-{}", &self.checksum()[..16])
    }

    pub fn encode(&self) -> Vec<u8> {
        let lattice = self.lattice.as_bytes();
        let state = self.initial_state.as_bytes();
        let mut w = ByteWriter::with_capacity(
            INPUT_HEADER + 2 * self.monitors.len() * WORD + lattice.len() + state.len(),
        );
        w.push_u64(LAYOUT_VERSION.tag());
        w.push_i64(self.num_turns as i64);
        w.push_i64(word_from_len(self.num_elements()));
        w.push_i64(word_from_len(self.ele_start));
        w.push_i64(word_from_len(self.ele_stop));
        w.push_i64(self.checkpoint_every.map_or(-1, |n| n as i64));
        w.push_i64(word_from_len(self.monitors.len()));
        let idx_slot = w.reserve_word();
        let size_slot = w.reserve_word();
        let lattice_slot = w.reserve_word();
        w.push_i64(word_from_len(lattice.len()));
        let state_slot = w.reserve_word();
        w.push_i64(word_from_len(state.len()));

        w.patch_i64(idx_slot, word_from_len(w.position()));
        for m in &self.monitors {
            w.push_i64(word_from_len(m.element_index));
        }
        w.patch_i64(size_slot, word_from_len(w.position()));
        for m in &self.monitors {
            w.push_i64(word_from_len(m.size));
        }
        w.patch_i64(lattice_slot, word_from_len(w.position()));
        w.push_padded(lattice);
        w.patch_i64(state_slot, word_from_len(w.position()));
        w.push_padded(state);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> SimResult<Self> {
        check_version(RECORD, bytes)?;
        require_len(RECORD, bytes, INPUT_HEADER)?;

        let num_turns = read_i64(bytes, offset::NUM_TURNS);
        if num_turns <= 0 {
            return Err(SimError::malformed(RECORD, format!("num_turns must be positive, got {num_turns}")));
        }
        let num_turns = num_turns as Turn;
        let num_elements = read_len(RECORD, bytes, offset::NUM_ELEMENTS, "num_elements")?;
        let ele_start = read_len(RECORD, bytes, offset::ELE_START, "ele_start")?;
        let ele_stop = read_len(RECORD, bytes, offset::ELE_STOP, "ele_stop")?;
        if ele_start > num_elements || ele_stop > num_elements {
            return Err(SimError::malformed(
                RECORD,
                format!("tracking range [{ele_start}, {ele_stop}) outside {num_elements} elements"),
            ));
        }
        let every = read_i64(bytes, offset::CHECKPOINT_EVERY);
        let checkpoint_every = (every > 0).then_some(every as Turn);

        let count = read_len(RECORD, bytes, offset::NUM_MONITORS, "num_monitors")?;
        let array = span(RECORD, count, WORD)?;
        let idx_at = resolve_offset(RECORD, bytes, offset::IDX_MONITORS, array)?;
        let size_at = resolve_offset(RECORD, bytes, offset::SIZE_MONITORS, array)?;
        let monitors = (0..count)
            .map(|k| {
                Ok(MonitorRef {
                    element_index: read_len(RECORD, bytes, idx_at + k * WORD, "monitor index")?,
                    size:          read_len(RECORD, bytes, size_at + k * WORD, "monitor size")?,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;

        let lattice_size = read_len(RECORD, bytes, offset::LATTICE_SIZE, "lattice size")?;
        let lattice_at = resolve_offset(RECORD, bytes, offset::LATTICE, lattice_size)?;
        let lattice = Lattice::decode(&bytes[lattice_at..lattice_at + lattice_size])?;
        if lattice.num_elements() != num_elements {
            return Err(SimError::malformed(
                RECORD,
                format!("header says {num_elements} elements, lattice has {}", lattice.num_elements()),
            ));
        }

        let state_size = read_len(RECORD, bytes, offset::STATE_SIZE, "state size")?;
        let state_at = resolve_offset(RECORD, bytes, offset::STATE, state_size)?;
        if state_at + state_size != bytes.len() {
            return Err(SimError::malformed(RECORD, "initial state is not the last section"));
        }
        let initial_state = SimulationState::decode(&bytes[state_at..])?;

        let input = Self {
            num_turns,
            ele_start,
            ele_stop,
            checkpoint_every,
            monitors,
            lattice,
            initial_state,
        };
        input.check_monitors()?;
        if input.initial_state.current_turn() > num_turns {
            return Err(SimError::malformed(RECORD, "initial state is past num_turns"));
        }
        Ok(input)
    }

    /// Monitor lists, lattice and state must describe the same monitors.
    fn check_monitors(&self) -> SimResult<()> {
        let metadata = self.initial_state.monitor_metadata();
        if metadata.len() != self.monitors.len() {
            return Err(SimError::malformed(
                RECORD,
                format!("{} monitors listed, state carries {}", self.monitors.len(), metadata.len()),
            ));
        }
        for (m, (element, spec)) in self.monitors.iter().zip(&metadata) {
            let kind = self.lattice.element(m.element_index).map(|e| e.kind);
            if kind != Some(ElementKind::MONITOR) {
                return Err(SimError::malformed(
                    RECORD,
                    format!("element {} is not a monitor", m.element_index),
                ));
            }
            if *element != m.element_index || spec.record_size()? != m.size {
                return Err(SimError::malformed(
                    RECORD,
                    format!("monitor at element {} disagrees with the state", m.element_index),
                ));
            }
        }
        Ok(())
    }

    pub fn read_from(path: &Path) -> SimResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| SimError::storage(path, e))?;
        Self::decode(&bytes)
    }

    pub fn write_to(&self, path: &Path) -> SimResult<()> {
        write_atomically(path, &self.encode())
    }
}

/// Builds a `RunInput` from a lattice and an ensemble, applying the
/// tracking-range normalisation.
#[derive(Debug, Clone)]
pub struct RunInputBuilder {
    lattice:          Lattice,
    particles:        Vec<Particle>,
    capacity:         Option<usize>,
    num_turns:        Turn,
    ele_start:        ElementIndex,
    ele_stop:         Option<ElementIndex>,
    checkpoint_every: Option<Turn>,
    supported_kinds:  Option<Vec<ElementKind>>,
}

impl RunInputBuilder {
    pub fn new(lattice: Lattice, particles: Vec<Particle>, num_turns: Turn) -> Self {
        Self {
            lattice,
            particles,
            capacity: None,
            num_turns,
            ele_start: 0,
            ele_stop: None,
            checkpoint_every: None,
            supported_kinds: None,
        }
    }

    /// Slot capacity; defaults to the ensemble size.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn ele_start(mut self, index: ElementIndex) -> Self {
        self.ele_start = index;
        self
    }

    pub fn ele_stop(mut self, index: ElementIndex) -> Self {
        self.ele_stop = Some(index);
        self
    }

    pub fn ele_start_at(self, name: &str) -> SimResult<Self> {
        let index = self.named(name)?;
        Ok(self.ele_start(index))
    }

    pub fn ele_stop_at(self, name: &str) -> SimResult<Self> {
        let index = self.named(name)?;
        Ok(self.ele_stop(index))
    }

    /// Checkpoint interval in turns; 0 disables interval checkpoints.
    pub fn checkpoint_every(mut self, turns: Turn) -> Self {
        self.checkpoint_every = (turns > 0).then_some(turns);
        self
    }

    /// Refuse to build when the lattice holds an element of any other
    /// kind. Monitors are always accepted.
    pub fn supported_kinds(mut self, kinds: &[ElementKind]) -> Self {
        self.supported_kinds = Some(kinds.to_vec());
        self
    }

    fn named(&self, name: &str) -> SimResult<ElementIndex> {
        self.lattice
            .position(name)
            .ok_or_else(|| SimError::InvalidInput(format!("no element named {name:?}")))
    }

    pub fn build(self) -> SimResult<RunInput> {
        let num_elements = self.lattice.num_elements();
        if self.num_turns == 0 {
            return Err(SimError::InvalidInput("num_turns must be positive".into()));
        }
        if self.ele_start > num_elements {
            return Err(SimError::InvalidInput(format!(
                "ele_start {} beyond {num_elements} elements",
                self.ele_start
            )));
        }

        if let Some(kinds) = &self.supported_kinds {
            if let Some((index, kind)) = self.lattice.first_unsupported(|k| kinds.contains(&k)) {
                return Err(SimError::InvalidInput(format!(
                    "element {index} ({}) has unsupported {kind}",
                    self.lattice.name(index).unwrap_or("unnamed")
                )));
            }
        }

        let mut num_turns = self.num_turns;
        let ele_stop = match self.ele_stop {
            None => num_elements,
            Some(stop) if stop > num_elements => {
                return Err(SimError::InvalidInput(format!(
                    "ele_stop {stop} beyond {num_elements} elements"
                )));
            }
            Some(stop) => {
                // Stopping before the start point means wrapping once more
                // around the ring.
                if stop <= self.ele_start {
                    num_turns += 1;
                }
                stop
            }
        };

        let mut discovered = Vec::new();
        for index in 0..num_elements {
            if let Some(element) = self.lattice.element(index) {
                if element.kind == ElementKind::MONITOR {
                    discovered.push((index, MonitorSpec::from_payload(element.payload)?));
                }
            }
        }
        let monitors = discovered
            .iter()
            .map(|(element_index, spec)| {
                Ok(MonitorRef {
                    element_index: *element_index,
                    size:          spec.record_size()?,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;

        let capacity = self.capacity.unwrap_or(self.particles.len());
        let initial_state = SimulationState::new(&self.particles, capacity, &discovered)?;

        Ok(RunInput {
            num_turns,
            ele_start: self.ele_start,
            ele_stop,
            checkpoint_every: self.checkpoint_every,
            monitors,
            lattice: self.lattice,
            initial_state,
        })
    }
}
