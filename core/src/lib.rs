//! beamrun-core: checkpointed, resumable turn-by-turn particle tracking.
//!
//! Leaves first: `layout` (binary records), `checkpoint` (durable state),
//! `shim` + `kernel` (the tracking boundary), `engine` (the state machine).

pub mod checkpoint;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod event;
pub mod kernel;
pub mod layout;
pub mod ledger;
pub mod manifest;
pub mod outcome;
pub mod policy;
pub mod reference_kernel;
pub mod rng;
pub mod shim;
pub mod suspend;
pub mod types;
pub mod version;
