//! Host/kernel boundary shim.
//!
//! Resolves every element of the lattice once per run (element body in the
//! lattice record, or monitor slot in the state), then hands the kernel one
//! turn segment per call with the state regions borrowed in place.

use crate::{
    error::{SimError, SimResult},
    kernel::{ElementTable, ResolvedElement, TrackKernel, TrackRequest},
    layout::{ElementKind, RunInput, SimulationState, StatusCounts},
    types::{ElementIndex, Turn},
};

/// Element range tracked on one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSegment {
    pub turn:        Turn,
    pub ele_start:   ElementIndex,
    pub ele_stop:    ElementIndex,
    pub end_of_turn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnReport {
    /// The state's `current_turn` after the call.
    pub turn:   Turn,
    pub counts: StatusCounts,
}

pub struct KernelShim<'a> {
    input:    &'a RunInput,
    elements: ElementTable<'a>,
}

impl<'a> KernelShim<'a> {
    pub fn new(input: &'a RunInput) -> SimResult<Self> {
        let lattice = input.lattice();
        let mut elements = Vec::with_capacity(lattice.num_elements());
        for index in 0..lattice.num_elements() {
            let element = lattice
                .element(index)
                .ok_or_else(|| SimError::malformed("lattice", format!("element {index} unreadable")))?;
            let resolved = if element.kind == ElementKind::MONITOR {
                let slot = input
                    .monitors()
                    .iter()
                    .position(|m| m.element_index == index)
                    .ok_or_else(|| {
                        SimError::malformed("run input", format!("monitor element {index} has no slot"))
                    })?;
                ResolvedElement::Monitor { slot }
            } else {
                ResolvedElement::Body { kind: element.kind, payload: element.payload }
            };
            elements.push(resolved);
        }
        Ok(Self { input, elements: ElementTable::new(elements) })
    }

    pub fn elements(&self) -> &ElementTable<'a> {
        &self.elements
    }

    /// The first turn of a run starts at `ele_start`, the last stops at
    /// `ele_stop`; every other turn covers the whole lattice.
    pub fn segment(&self, turn: Turn) -> TurnSegment {
        let num_elements = self.input.num_elements();
        let ele_start = if turn == 0 { self.input.ele_start() } else { 0 };
        let ele_stop = if turn + 1 >= self.input.num_turns() {
            self.input.ele_stop()
        } else {
            num_elements
        };
        TurnSegment {
            turn,
            ele_start,
            ele_stop,
            end_of_turn: ele_stop == num_elements,
        }
    }

    /// Advance `state` by exactly one turn.
    pub fn advance_one_turn(
        &self,
        kernel: &mut dyn TrackKernel,
        state: &mut SimulationState,
    ) -> SimResult<TurnReport> {
        let turn = state.current_turn();
        if turn >= self.input.num_turns() {
            return Err(SimError::InvalidResumeState {
                reason: format!("turn {turn} is past the last turn {}", self.input.num_turns()),
            });
        }
        let segment = self.segment(turn);

        {
            let (particles, monitors) = state.split_mut();
            kernel
                .track_line(TrackRequest {
                    elements:    &self.elements,
                    particles,
                    monitors,
                    turn,
                    ele_start:   segment.ele_start,
                    ele_stop:    segment.ele_stop,
                    end_of_turn: segment.end_of_turn,
                })
                .map_err(|fault| SimError::TrackerFault { turn, reason: fault.to_string() })?;
        }

        if let Some(p) = state
            .particles()
            .iter()
            .find(|p| p.is_alive() && !p.coordinates_finite())
        {
            return Err(SimError::TrackerFault {
                turn,
                reason: format!("particle {} left with non-finite coordinates", p.particle_id),
            });
        }

        state.set_current_turn(turn + 1);
        let counts = state.status_counts();
        log::trace!("Turn {turn} done: {} alive, {} lost", counts.alive, counts.lost);
        Ok(TurnReport { turn: turn + 1, counts })
    }
}
