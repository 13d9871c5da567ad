//! Particle slots.
//!
//! The ensemble is a fixed number of slots of `PARTICLE_STRIDE` bytes each.
//! The kernel mutates slots in place; nothing is copied on the hot path.

use super::{read_f64, read_i64, write_f64, write_i64, WORD};
use serde::{Deserialize, Serialize};

/// Word offsets of each field inside a slot.
pub mod field {
    use super::WORD;

    pub const PARTICLE_ID: usize = 0;
    pub const STATE:       usize = WORD;
    pub const AT_TURN:     usize = 2 * WORD;
    pub const AT_ELEMENT:  usize = 3 * WORD;
    pub const S:           usize = 4 * WORD;
    pub const X:           usize = 5 * WORD;
    pub const PX:          usize = 6 * WORD;
    pub const Y:           usize = 7 * WORD;
    pub const PY:          usize = 8 * WORD;
    pub const ZETA:        usize = 9 * WORD;
    pub const DELTA:       usize = 10 * WORD;
}

pub const PARTICLE_STRIDE: usize = 11 * WORD;

/// State code of a slot that holds no particle.
pub const INVALID_STATE: i64 = -999_999_999;

/// State code written by kernels for a particle lost on an aperture.
pub const LOST_STATE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleStatus {
    Alive,
    Lost,
    Invalid,
}

impl ParticleStatus {
    pub fn from_code(code: i64) -> Self {
        if code > 0 {
            Self::Alive
        } else if code == INVALID_STATE {
            Self::Invalid
        } else {
            Self::Lost
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub particle_id: i64,
    pub state:       i64,
    pub at_turn:     i64,
    pub at_element:  i64,
    pub s:           f64,
    pub x:           f64,
    pub px:          f64,
    pub y:           f64,
    pub py:          f64,
    pub zeta:        f64,
    pub delta:       f64,
}

impl Particle {
    /// A fresh alive particle at the given phase-space coordinates.
    pub fn alive(particle_id: i64, x: f64, px: f64, y: f64, py: f64) -> Self {
        Self {
            particle_id,
            state: 1,
            at_turn: 0,
            at_element: 0,
            s: 0.0,
            x,
            px,
            y,
            py,
            zeta: 0.0,
            delta: 0.0,
        }
    }

    pub fn invalid_slot() -> Self {
        Self {
            particle_id: -1,
            state: INVALID_STATE,
            at_turn: 0,
            at_element: 0,
            s: 0.0,
            x: 0.0,
            px: 0.0,
            y: 0.0,
            py: 0.0,
            zeta: 0.0,
            delta: 0.0,
        }
    }

    pub fn status(&self) -> ParticleStatus {
        ParticleStatus::from_code(self.state)
    }

    pub fn is_alive(&self) -> bool {
        self.state > 0
    }

    pub fn coordinates_finite(&self) -> bool {
        [self.s, self.x, self.px, self.y, self.py, self.zeta, self.delta]
            .iter()
            .all(|v| v.is_finite())
    }

    fn read(slot: &[u8]) -> Self {
        Self {
            particle_id: read_i64(slot, field::PARTICLE_ID),
            state:       read_i64(slot, field::STATE),
            at_turn:     read_i64(slot, field::AT_TURN),
            at_element:  read_i64(slot, field::AT_ELEMENT),
            s:           read_f64(slot, field::S),
            x:           read_f64(slot, field::X),
            px:          read_f64(slot, field::PX),
            y:           read_f64(slot, field::Y),
            py:          read_f64(slot, field::PY),
            zeta:        read_f64(slot, field::ZETA),
            delta:       read_f64(slot, field::DELTA),
        }
    }

    fn write(&self, slot: &mut [u8]) {
        write_i64(slot, field::PARTICLE_ID, self.particle_id);
        write_i64(slot, field::STATE, self.state);
        write_i64(slot, field::AT_TURN, self.at_turn);
        write_i64(slot, field::AT_ELEMENT, self.at_element);
        write_f64(slot, field::S, self.s);
        write_f64(slot, field::X, self.x);
        write_f64(slot, field::PX, self.px);
        write_f64(slot, field::Y, self.y);
        write_f64(slot, field::PY, self.py);
        write_f64(slot, field::ZETA, self.zeta);
        write_f64(slot, field::DELTA, self.delta);
    }
}

/// Encode `particles` into `capacity` slots; trailing slots are invalid.
pub(crate) fn encode_slots(particles: &[Particle], capacity: usize) -> Vec<u8> {
    let mut region = vec![0u8; capacity * PARTICLE_STRIDE];
    let filler = Particle::invalid_slot();
    for (index, slot) in region.chunks_exact_mut(PARTICLE_STRIDE).enumerate() {
        particles.get(index).unwrap_or(&filler).write(slot);
    }
    region
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub alive:   usize,
    pub lost:    usize,
    pub invalid: usize,
}

impl StatusCounts {
    fn tally(codes: impl Iterator<Item = i64>) -> Self {
        codes.fold(Self::default(), |mut counts, code| {
            match ParticleStatus::from_code(code) {
                ParticleStatus::Alive   => counts.alive += 1,
                ParticleStatus::Lost    => counts.lost += 1,
                ParticleStatus::Invalid => counts.invalid += 1,
            }
            counts
        })
    }
}

/// Read-only view over the particle region.
#[derive(Debug, Clone, Copy)]
pub struct Particles<'a> {
    region: &'a [u8],
}

impl<'a> Particles<'a> {
    pub(crate) fn new(region: &'a [u8]) -> Self {
        Self { region }
    }

    pub fn capacity(&self) -> usize {
        self.region.len() / PARTICLE_STRIDE
    }

    pub fn get(&self, slot: usize) -> Option<Particle> {
        self.region
            .chunks_exact(PARTICLE_STRIDE)
            .nth(slot)
            .map(Particle::read)
    }

    pub fn iter(&self) -> impl Iterator<Item = Particle> + 'a {
        let region: &'a [u8] = self.region;
        region.chunks_exact(PARTICLE_STRIDE).map(Particle::read)
    }

    pub fn status_counts(&self) -> StatusCounts {
        StatusCounts::tally(
            self.region
                .chunks_exact(PARTICLE_STRIDE)
                .map(|slot| read_i64(slot, field::STATE)),
        )
    }
}

/// Mutable view over the particle region, handed to the kernel.
#[derive(Debug)]
pub struct ParticlesMut<'a> {
    region: &'a mut [u8],
}

impl<'a> ParticlesMut<'a> {
    pub(crate) fn new(region: &'a mut [u8]) -> Self {
        Self { region }
    }

    pub fn capacity(&self) -> usize {
        self.region.len() / PARTICLE_STRIDE
    }

    fn slot(&self, slot: usize) -> &[u8] {
        &self.region[slot * PARTICLE_STRIDE..(slot + 1) * PARTICLE_STRIDE]
    }

    fn slot_mut(&mut self, slot: usize) -> &mut [u8] {
        &mut self.region[slot * PARTICLE_STRIDE..(slot + 1) * PARTICLE_STRIDE]
    }

    /// Panics if `slot >= capacity()`.
    pub fn get(&self, slot: usize) -> Particle {
        Particle::read(self.slot(slot))
    }

    /// Panics if `slot >= capacity()`.
    pub fn set(&mut self, slot: usize, particle: &Particle) {
        particle.write(self.slot_mut(slot));
    }

    pub fn status(&self, slot: usize) -> ParticleStatus {
        ParticleStatus::from_code(read_i64(self.slot(slot), field::STATE))
    }

    pub fn set_state(&mut self, slot: usize, code: i64) {
        write_i64(self.slot_mut(slot), field::STATE, code);
    }

    pub fn as_view(&self) -> Particles<'_> {
        Particles::new(self.region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_slots_are_invalid() {
        let region = encode_slots(&[Particle::alive(0, 1e-3, 0.0, -1e-3, 0.0)], 3);
        let view = Particles::new(&region);
        assert_eq!(view.capacity(), 3);
        assert_eq!(
            view.status_counts(),
            StatusCounts { alive: 1, lost: 0, invalid: 2 }
        );
        assert_eq!(view.get(0).unwrap().x, 1e-3);
        assert_eq!(view.get(2).unwrap().status(), ParticleStatus::Invalid);
        assert!(view.get(3).is_none());
    }

    #[test]
    fn mutable_view_writes_in_place() {
        let mut region = encode_slots(&[Particle::alive(7, 0.0, 0.0, 0.0, 0.0)], 1);
        {
            let mut slots = ParticlesMut::new(&mut region);
            let mut p = slots.get(0);
            p.px = 0.5;
            slots.set(0, &p);
            slots.set_state(0, LOST_STATE);
        }
        let p = Particles::new(&region).get(0).unwrap();
        assert_eq!(p.px, 0.5);
        assert_eq!(p.particle_id, 7);
        assert_eq!(p.status(), ParticleStatus::Lost);
    }

    #[test]
    fn state_codes_classify() {
        assert_eq!(ParticleStatus::from_code(1), ParticleStatus::Alive);
        assert_eq!(ParticleStatus::from_code(0), ParticleStatus::Lost);
        assert_eq!(ParticleStatus::from_code(-2), ParticleStatus::Lost);
        assert_eq!(ParticleStatus::from_code(INVALID_STATE), ParticleStatus::Invalid);
    }
}
