//! Tracking kernel contract.
//!
//! RULE: The kernel is opaque to the runner. It receives one turn segment
//! at a time and mutates the particle and monitor regions in place.
//! It never sees the checkpoint store, the ledger or the clock.

use crate::{
    error::{SimError, SimResult},
    layout::{ElementKind, Lattice, MonitorsMut, ParticleStatus, ParticlesMut},
    types::{ElementIndex, Turn},
};
use std::any::Any;
use thiserror::Error;

/// The contract every tracking kernel must fulfill.
pub trait TrackKernel: Send {
    /// Stable name, recorded in the run ledger.
    fn name(&self) -> &'static str;

    /// Track every alive particle through elements `[ele_start, ele_stop)`.
    ///
    /// When `end_of_turn` is set the kernel must also close the turn for
    /// each alive particle (see [`finish_turn`]).
    fn track_line(&mut self, request: TrackRequest<'_>) -> Result<(), KernelFault>;

    /// Whether the kernel can track elements of `kind`. Never asked about
    /// monitors; the runner resolves those itself.
    fn supports(&self, kind: ElementKind) -> bool;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

/// One turn segment, with every element reference already resolved.
#[derive(Debug)]
pub struct TrackRequest<'a> {
    pub elements:    &'a ElementTable<'a>,
    pub particles:   ParticlesMut<'a>,
    pub monitors:    MonitorsMut<'a>,
    pub turn:        Turn,
    pub ele_start:   ElementIndex,
    pub ele_stop:    ElementIndex,
    pub end_of_turn: bool,
}

/// A lattice element after offset resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedElement<'a> {
    /// Element body inside the lattice record.
    Body {
        kind:    ElementKind,
        payload: &'a [u8],
    },
    /// Beam monitor; `slot` indexes the monitor table in the state.
    Monitor { slot: usize },
}

#[derive(Debug, Clone, Default)]
pub struct ElementTable<'a> {
    elements: Vec<ResolvedElement<'a>>,
}

impl<'a> ElementTable<'a> {
    pub(crate) fn new(elements: Vec<ResolvedElement<'a>>) -> Self {
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: ElementIndex) -> Option<&ResolvedElement<'a>> {
        self.elements.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedElement<'a>> {
        self.elements.iter()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelFault {
    #[error("element {index}: unsupported {kind}")]
    UnsupportedElement { index: ElementIndex, kind: ElementKind },

    #[error("element {index}: bad payload: {reason}")]
    BadPayload { index: ElementIndex, reason: String },

    #[error("element index {index} outside the lattice")]
    OutOfRange { index: ElementIndex },

    #[error("{0}")]
    Aborted(String),
}

/// Refuse a lattice containing an element kind the kernel cannot track.
pub fn check_supported(lattice: &Lattice, kernel: &dyn TrackKernel) -> SimResult<()> {
    match lattice.first_unsupported(|kind| kernel.supports(kind)) {
        None => Ok(()),
        Some((index, kind)) => Err(SimError::InvalidInput(format!(
            "element {index} ({}) has {kind}, not supported by the {} kernel",
            lattice.name(index).unwrap_or("unnamed"),
            kernel.name()
        ))),
    }
}

/// Close the turn for every alive particle: next turn, back at element 0.
pub fn finish_turn(particles: &mut ParticlesMut<'_>) {
    for slot in 0..particles.capacity() {
        if particles.status(slot) == ParticleStatus::Alive {
            let mut p = particles.get(slot);
            p.at_turn += 1;
            p.at_element = 0;
            p.s = 0.0;
            particles.set(slot, &p);
        }
    }
}
