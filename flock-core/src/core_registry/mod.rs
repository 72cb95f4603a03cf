//! Registry of many flocks
//!
//! Tracks every open [`crate::Flock`] in one process, keeps a durable
//! local index so known groups can be reopened after restart without
//! re-inviting, and owns the shared network resources handed to each
//! group.

pub mod local_store;
pub mod meta;
pub mod registry;

pub use local_store::{LocalStore, MemoryStore, SqliteStore, StoreError};
pub use meta::{MetaMap, MetaValue};
pub use registry::{FlockOptions, FlockRegistry, JoinOutcome, RegistryError};
