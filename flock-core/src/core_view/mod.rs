//! Materialized view over the merged operation history
//!
//! The view replays the deterministic linearization into an ordered,
//! range-queryable key-value structure, tracking writer-quorum membership
//! as it goes. Values are sealed with a per-key cipher before they enter
//! the log, so the materialized structure is encrypted at rest.

pub mod cipher;
pub mod quorum;
pub mod view;

pub use cipher::{CipherError, ValueCipher};
pub use quorum::WriterQuorum;
pub use view::{ApplyOutcome, SyncedView, INVITE_KEY, MEMBERS_PREFIX};
