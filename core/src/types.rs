//! Shared primitive types used across the runner.

/// A tracking turn. One turn = one pass of the ensemble around the lattice.
pub type Turn = u64;

/// Position of an element in the lattice.
pub type ElementIndex = usize;

/// Lineage identifier. Stable across every invocation of the same input.
pub type RunId = String;

/// Identifies a single process invocation within a lineage.
pub type InvocationId = String;
