//! Binary layout: bit-exact encoding, version gate, truncation, and the
//! run-input normalisation rules.

mod common;

use beamrun_core::{
    error::SimError,
    layout::{
        lattice::{ELEMENT_STRIDE, LATTICE_HEADER},
        ElementKind, LatticeBuilder, MonitorSpec, Particle, RunInput, RunInputBuilder,
        SimulationState,
    },
    reference_kernel::{self, fodo_ring, linspace_ensemble, ReferenceKernel},
    shim::KernelShim,
    version::{LayoutVersion, LAYOUT_VERSION},
};
use common::ring_input;

/// A state that has been tracked for a while, so every region is non-trivial.
fn tracked_state() -> SimulationState {
    let input = RunInputBuilder::new(fodo_ring(2, 11), linspace_ensemble(6, 0.03), 20)
        .capacity(8)
        .build()
        .expect("input");
    let shim = KernelShim::new(&input).expect("shim");
    let mut kernel = ReferenceKernel::new();
    let mut state = input.initial_state().clone();
    for _ in 0..12 {
        shim.advance_one_turn(&mut kernel, &mut state).expect("turn");
    }
    state
}

#[test]
fn state_round_trip_is_bit_exact() {
    let state = tracked_state();
    let bytes = state.encode();
    let decoded = SimulationState::decode(&bytes).expect("decode");
    assert_eq!(decoded, state);
    assert_eq!(decoded.encode(), bytes, "re-encoding must reproduce every byte");
    assert_eq!(decoded.current_turn(), 12);
    assert_eq!(decoded.capacity(), 8);
    assert_eq!(decoded.status_counts().invalid, 2);
    assert!(decoded.status_counts().lost > 0, "the halo particles hit the aperture");
    assert!(!decoded.monitors().recorded(0).is_empty());
}

#[test]
fn equal_states_encode_identically() {
    assert_eq!(tracked_state().encode(), tracked_state().encode());
}

#[test]
fn every_truncation_is_rejected() {
    let bytes = tracked_state().encode();
    for len in 0..bytes.len() {
        match SimulationState::decode(&bytes[..len]) {
            Err(SimError::TruncatedData { .. }) | Err(SimError::MalformedLayout { .. }) => {}
            other => panic!("prefix of {len} bytes decoded as {other:?}"),
        }
    }
}

#[test]
fn short_buffers_are_truncated_data() {
    let bytes = tracked_state().encode();
    assert!(matches!(
        SimulationState::decode(&bytes[..bytes.len() - 8]),
        Err(SimError::TruncatedData { .. })
    ));
    assert!(matches!(SimulationState::decode(&bytes[..20]), Err(SimError::TruncatedData { .. })));
}

#[test]
fn foreign_version_is_rejected_before_anything_else() {
    let mut bytes = tracked_state().encode();
    let foreign = LayoutVersion::new(LAYOUT_VERSION.major + 1, 0, 0);
    bytes[..8].copy_from_slice(&foreign.tag().to_le_bytes());
    match SimulationState::decode(&bytes) {
        Err(SimError::LayoutVersionMismatch { expected, found }) => {
            assert_eq!(expected, LAYOUT_VERSION);
            assert_eq!(found, foreign);
        }
        other => panic!("expected a version mismatch, got {other:?}"),
    }

    // Truncated and foreign at once: the version wins.
    assert!(matches!(
        SimulationState::decode(&bytes[..16]),
        Err(SimError::LayoutVersionMismatch { .. })
    ));

    let mut input = ring_input(10, 0).encode();
    input[..8].copy_from_slice(&foreign.tag().to_le_bytes());
    assert!(matches!(RunInput::decode(&input), Err(SimError::LayoutVersionMismatch { .. })));
}

#[test]
fn input_round_trip_and_state_tail() {
    let input = ring_input(100, 10);
    let bytes = input.encode();
    let decoded = RunInput::decode(&bytes).expect("decode input");
    assert_eq!(decoded, input);
    assert_eq!(decoded.encode(), bytes);

    let state = input.initial_state().as_bytes();
    assert!(bytes.ends_with(state), "the initial state is the verbatim tail of the input");
    assert_eq!(
        SimulationState::decode(&bytes[bytes.len() - state.len()..]).expect("cut-out state"),
        *input.initial_state()
    );
    assert_eq!(decoded.lineage_id(), input.lineage_id());
}

#[test]
fn input_file_round_trip() {
    let dir = common::TempDir::new("codec");
    let path = dir.join("beamrun_input.bin");
    let input = ring_input(30, 5);
    input.write_to(&path).expect("write input");
    assert_eq!(RunInput::read_from(&path).expect("read input"), input);
}

#[test]
fn element_accessor_uses_header_stride_and_relative_offset() {
    let mut builder = LatticeBuilder::new();
    builder.push("d", reference_kernel::DRIFT, reference_kernel::drift(1.5));
    builder.push("q", reference_kernel::THIN_QUAD, reference_kernel::thin_quad(-0.3));
    let lattice = builder.build();
    let bytes = lattice.as_bytes();

    let entry = LATTICE_HEADER + ELEMENT_STRIDE;
    let rel = i64::from_le_bytes(bytes[entry + 8..entry + 16].try_into().unwrap()) as usize;
    let payload = lattice.element(1).expect("element 1").payload;
    assert_eq!(payload, &bytes[rel + 8..rel + 16]);
    assert_eq!(f64::from_le_bytes(payload.try_into().unwrap()), -0.3);
}

#[test]
fn ele_stop_defaults_to_the_full_lattice() {
    let input = ring_input(10, 0);
    assert_eq!(input.ele_start(), 0);
    assert_eq!(input.ele_stop(), input.num_elements());
    assert_eq!(input.num_turns(), 10);
}

#[test]
fn stopping_at_or_before_the_start_wraps_one_more_turn() {
    let base = || RunInputBuilder::new(fodo_ring(2, 7), linspace_ensemble(2, 0.0), 10);
    let same = base().ele_start(3).ele_stop(3).build().expect("input");
    assert_eq!(same.num_turns(), 11);
    let before = base().ele_start(5).ele_stop(2).build().expect("input");
    assert_eq!(before.num_turns(), 11);
    let after = base().ele_start(2).ele_stop(5).build().expect("input");
    assert_eq!(after.num_turns(), 10);
}

#[test]
fn named_range_bounds() {
    let input = RunInputBuilder::new(fodo_ring(3, 7), linspace_ensemble(2, 0.0), 4)
        .ele_start_at("qd.1")
        .expect("known start")
        .ele_stop_at("mon")
        .expect("known stop")
        .build()
        .expect("input");
    assert_eq!(input.lattice().name(input.ele_start()), Some("qd.1"));
    assert_eq!(input.lattice().name(input.ele_stop()), Some("mon"));

    let unknown = RunInputBuilder::new(fodo_ring(1, 7), Vec::new(), 4).ele_start_at("nope");
    assert!(matches!(unknown, Err(SimError::InvalidInput(_))));
}

#[test]
fn range_beyond_lattice_is_invalid() {
    let n = fodo_ring(1, 7).num_elements();
    let built = RunInputBuilder::new(fodo_ring(1, 7), Vec::new(), 4).ele_stop(n + 1).build();
    assert!(matches!(built, Err(SimError::InvalidInput(_))));
    let zero = RunInputBuilder::new(fodo_ring(1, 7), Vec::new(), 0).build();
    assert!(matches!(zero, Err(SimError::InvalidInput(_))));
}

#[test]
fn monitors_are_discovered_from_the_lattice() {
    let mut lattice = LatticeBuilder::new();
    let spec = MonitorSpec { start_turn: 0, stop_turn: 5, part_id_start: 0, part_id_stop: 3 };
    lattice.push("m0", ElementKind::MONITOR, spec.to_payload());
    lattice.push("d", reference_kernel::DRIFT, reference_kernel::drift(1.0));
    lattice.push("m1", ElementKind::MONITOR, MonitorSpec { stop_turn: 2, ..spec }.to_payload());
    let input = RunInputBuilder::new(lattice.build(), vec![Particle::alive(0, 0.0, 0.0, 0.0, 0.0)], 5)
        .build()
        .expect("input");

    let indices: Vec<_> = input.monitors().iter().map(|m| m.element_index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(input.monitors()[0].size, spec.record_size().expect("record size"));
    assert_eq!(input.initial_state().monitor_metadata()[1].1.stop_turn, 2);
}

#[test]
fn tampered_monitor_list_is_malformed() {
    let input = ring_input(10, 0);
    let mut bytes = input.encode();
    // num_monitors lives in the seventh header word.
    bytes[48..56].copy_from_slice(&0i64.to_le_bytes());
    assert!(matches!(RunInput::decode(&bytes), Err(SimError::MalformedLayout { .. })));
}

fn word(bytes: &[u8], at: usize) -> usize {
    i64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()) as usize
}

/// Byte offset of the first monitor's window inside a state record.
fn first_monitor_window(state: &[u8]) -> usize {
    let table = word(state, 40);
    table + word(state, table + 16)
}

fn patch_window(bytes: &mut [u8], at: usize, spec: MonitorSpec) {
    bytes[at..at + 32].copy_from_slice(&spec.to_payload());
}

#[test]
fn overflowing_monitor_window_in_a_state_is_malformed() {
    let windows = [
        MonitorSpec { start_turn: 0, stop_turn: i64::MAX, part_id_start: 0, part_id_stop: i64::MAX },
        MonitorSpec { start_turn: 0, stop_turn: 1, part_id_start: i64::MIN, part_id_stop: 0 },
    ];
    for window in windows {
        let mut bytes = ring_input(10, 0).initial_state().encode();
        let at = first_monitor_window(&bytes);
        patch_window(&mut bytes, at, window);
        assert!(
            matches!(SimulationState::decode(&bytes), Err(SimError::MalformedLayout { .. })),
            "{window:?} must not decode"
        );
    }
}

#[test]
fn overflowing_monitor_window_in_an_input_is_malformed() {
    let mut bytes = ring_input(10, 0).encode();
    let state_at = word(&bytes, 88);
    let at = state_at + first_monitor_window(&bytes[state_at..]);
    let window = MonitorSpec { start_turn: 0, stop_turn: i64::MAX, part_id_start: 0, part_id_stop: i64::MAX };
    patch_window(&mut bytes, at, window);
    assert!(matches!(RunInput::decode(&bytes), Err(SimError::MalformedLayout { .. })));
}

#[test]
fn overflowing_monitor_payload_is_refused_at_build() {
    let mut lattice = LatticeBuilder::new();
    let window = MonitorSpec { start_turn: 0, stop_turn: 1, part_id_start: i64::MIN, part_id_stop: 0 };
    lattice.push("m", ElementKind::MONITOR, window.to_payload());
    let built = RunInputBuilder::new(lattice.build(), vec![Particle::alive(0, 0.0, 0.0, 0.0, 0.0)], 5).build();
    assert!(matches!(built, Err(SimError::MalformedLayout { .. })));
}
