//! Per-group lifecycle
//!
//! A [`flock::Flock`] composes the causal store, the synced view and the
//! pairing handshake into one state machine:
//! `Booting → Opening → Active → Leaving → Closed`.

pub mod flock;
pub mod info;
pub mod types;

pub use flock::{Flock, FlockError};
pub use info::GroupInfo;
pub use types::{FlockEvent, FlockId, FlockState, GroupKeys};
