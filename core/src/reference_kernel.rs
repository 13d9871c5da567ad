//! Reference tracking kernel.
//!
//! A small, conforming implementation of the kernel contract. It knows a
//! handful of element kinds with deliberately simple linear maps:
//!
//!   DRIFT        x += px·L, y += py·L, s += L
//!   THIN_QUAD    px -= k1l·x, py += k1l·y
//!   APERTURE     rectangular; outside → lost at this element
//!   RANDOM_KICK  gaussian px/py kick, seeded per (seed, turn, particle)
//!   MARKER       no-op
//!   MONITOR      records (x, px, y, py) into the state's monitor table
//!
//! Payloads are little-endian 8-byte words.

use crate::{
    kernel::{finish_turn, KernelFault, ResolvedElement, TrackKernel, TrackRequest},
    layout::{
        particles::LOST_STATE, read_f64, read_u64, ElementKind, Lattice, LatticeBuilder,
        MonitorSample, MonitorSpec, MonitorsMut, Particle, ParticleStatus, WORD,
    },
    rng::KernelRng,
    types::{ElementIndex, Turn},
};
use std::any::Any;

pub const DRIFT: ElementKind = ElementKind(10);
pub const THIN_QUAD: ElementKind = ElementKind(11);
pub const APERTURE: ElementKind = ElementKind(12);
pub const RANDOM_KICK: ElementKind = ElementKind(13);
pub const MARKER: ElementKind = ElementKind(14);

/// Every kind the reference kernel tracks, monitors included.
pub const SUPPORTED_KINDS: [ElementKind; 6] =
    [ElementKind::MONITOR, DRIFT, THIN_QUAD, APERTURE, RANDOM_KICK, MARKER];

/// Human-readable name of an element kind.
pub fn kind_label(kind: ElementKind) -> String {
    match kind {
        ElementKind::MONITOR => "monitor".into(),
        DRIFT                => "drift".into(),
        THIN_QUAD            => "thin_quad".into(),
        APERTURE             => "aperture".into(),
        RANDOM_KICK          => "random_kick".into(),
        MARKER               => "marker".into(),
        other                => other.to_string(),
    }
}

// ── Payload builders ───────────────────────────────────────────

fn words(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn drift(length: f64) -> Vec<u8> {
    words(&[length.to_bits()])
}

pub fn thin_quad(k1l: f64) -> Vec<u8> {
    words(&[k1l.to_bits()])
}

pub fn aperture(x_half: f64, y_half: f64) -> Vec<u8> {
    words(&[x_half.to_bits(), y_half.to_bits()])
}

pub fn random_kick(seed: u64, sigma: f64) -> Vec<u8> {
    words(&[seed, sigma.to_bits()])
}

pub fn marker() -> Vec<u8> {
    Vec::new()
}

// ── Element maps ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Map {
    Drift { length: f64 },
    ThinQuad { k1l: f64 },
    Aperture { x_half: f64, y_half: f64 },
    Kick { seed: u64, sigma: f64 },
    Marker,
    Monitor { slot: usize },
}

impl Map {
    fn decode(index: ElementIndex, element: &ResolvedElement<'_>) -> Result<Self, KernelFault> {
        let (kind, payload) = match *element {
            ResolvedElement::Monitor { slot } => return Ok(Map::Monitor { slot }),
            ResolvedElement::Body { kind, payload } => (kind, payload),
        };
        let need = |n: usize| {
            if payload.len() < n * WORD {
                Err(KernelFault::BadPayload {
                    index,
                    reason: format!("{} needs {n} words, got {} bytes", kind_label(kind), payload.len()),
                })
            } else {
                Ok(())
            }
        };
        match kind {
            DRIFT => {
                need(1)?;
                Ok(Map::Drift { length: read_f64(payload, 0) })
            }
            THIN_QUAD => {
                need(1)?;
                Ok(Map::ThinQuad { k1l: read_f64(payload, 0) })
            }
            APERTURE => {
                need(2)?;
                Ok(Map::Aperture { x_half: read_f64(payload, 0), y_half: read_f64(payload, WORD) })
            }
            RANDOM_KICK => {
                need(2)?;
                Ok(Map::Kick { seed: read_u64(payload, 0), sigma: read_f64(payload, WORD) })
            }
            MARKER => Ok(Map::Marker),
            other => Err(KernelFault::UnsupportedElement { index, kind: other }),
        }
    }

    fn apply(&self, p: &mut Particle, turn: Turn, monitors: &mut MonitorsMut<'_>) {
        match *self {
            Map::Drift { length } => {
                p.x += p.px * length;
                p.y += p.py * length;
                p.s += length;
            }
            Map::ThinQuad { k1l } => {
                p.px -= k1l * p.x;
                p.py += k1l * p.y;
            }
            Map::Aperture { x_half, y_half } => {
                if p.x.abs() > x_half || p.y.abs() > y_half || !p.coordinates_finite() {
                    p.state = LOST_STATE;
                }
            }
            Map::Kick { seed, sigma } => {
                let mut rng = KernelRng::for_particle(seed, turn, p.particle_id);
                p.px += sigma * rng.gaussian();
                p.py += sigma * rng.gaussian();
            }
            Map::Marker => {}
            Map::Monitor { slot } => {
                // Outside the monitor's windows the sample is simply not kept.
                let _ = monitors.record(slot, turn, p.particle_id, MonitorSample {
                    at_turn: turn as i64,
                    x:       p.x,
                    px:      p.px,
                    y:       p.y,
                    py:      p.py,
                });
            }
        }
    }
}

/// Particle-by-particle tracker over the maps above.
#[derive(Debug, Default)]
pub struct ReferenceKernel {
    segments: u64,
}

impl ReferenceKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments tracked by this instance.
    pub fn segments(&self) -> u64 {
        self.segments
    }
}

impl TrackKernel for ReferenceKernel {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn supports(&self, kind: ElementKind) -> bool {
        SUPPORTED_KINDS.contains(&kind)
    }

    fn track_line(&mut self, request: TrackRequest<'_>) -> Result<(), KernelFault> {
        let TrackRequest { elements, mut particles, mut monitors, turn, ele_start, ele_stop, end_of_turn } =
            request;
        if ele_stop > elements.len() {
            return Err(KernelFault::OutOfRange { index: ele_stop });
        }

        let maps = (ele_start..ele_stop)
            .map(|index| {
                let element = elements.get(index).ok_or(KernelFault::OutOfRange { index })?;
                Ok((index, Map::decode(index, element)?))
            })
            .collect::<Result<Vec<_>, KernelFault>>()?;

        for slot in 0..particles.capacity() {
            if particles.status(slot) != ParticleStatus::Alive {
                continue;
            }
            let mut p = particles.get(slot);
            for (index, map) in &maps {
                map.apply(&mut p, turn, &mut monitors);
                p.at_element = *index as i64;
                if !p.is_alive() {
                    break;
                }
            }
            particles.set(slot, &p);
        }

        if end_of_turn {
            finish_turn(&mut particles);
        }
        self.segments += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Demo lattice and ensemble ──────────────────────────────────

/// Turn window recorded by the demo ring's monitor.
pub const DEMO_MONITOR_TURNS: i64 = 100;

/// A thin-lens FODO ring of `cells` cells with an aperture per cell, one
/// seeded noise kick and a monitor on the first four particles.
pub fn fodo_ring(cells: usize, seed: u64) -> Lattice {
    let mut b = LatticeBuilder::new();
    b.push("start", MARKER, marker());
    for cell in 0..cells {
        b.push(format!("qf.{cell}"), THIN_QUAD, thin_quad(0.25));
        b.push(format!("d1.{cell}"), DRIFT, drift(1.0));
        b.push(format!("qd.{cell}"), THIN_QUAD, thin_quad(-0.25));
        b.push(format!("d2.{cell}"), DRIFT, drift(1.0));
        b.push(format!("ap.{cell}"), APERTURE, aperture(0.02, 0.02));
    }
    b.push("noise", RANDOM_KICK, random_kick(seed, 1e-6));
    let window = MonitorSpec {
        start_turn:    0,
        stop_turn:     DEMO_MONITOR_TURNS,
        part_id_start: 0,
        part_id_stop:  4,
    };
    b.push("mon", ElementKind::MONITOR, window.to_payload());
    b.push("end", MARKER, marker());
    b.build()
}

/// `n` particles with horizontal offsets spread evenly over
/// `[0, max_amplitude]` and a small fixed vertical offset.
pub fn linspace_ensemble(n: usize, max_amplitude: f64) -> Vec<Particle> {
    let step = if n > 1 { max_amplitude / (n - 1) as f64 } else { 0.0 };
    (0..n)
        .map(|i| Particle::alive(i as i64, step * i as f64, 0.0, 1e-4, 0.0))
        .collect()
}
