//! flock-core: decentralized peer-group synchronization
//!
//! A flock is a small peer group replicating a shared key-value view over
//! per-writer append-only signed logs. This crate provides the group
//! synchronization engine: the merged view ([`core_view`]), dynamic writer
//! quorum membership, blind-invite pairing ([`core_pairing`]), the group
//! lifecycle state machine ([`core_flock`]), a registry of many groups
//! ([`core_registry`]), and a seeded fault-injection harness ([`chaos`]).

pub mod chaos;
pub mod config;
pub mod core_causal;
pub mod core_flock;
pub mod core_net;
pub mod core_pairing;
pub mod core_registry;
pub mod core_view;
pub mod logging;
pub mod test_utils;

pub(crate) mod sync_ext;

pub use chaos::ChaosNet;
pub use config::{ChaosConfig, FlockConfig};
pub use core_causal::{Operation, WriterId};
pub use core_flock::flock::{Flock, FlockError};
pub use core_flock::info::GroupInfo;
pub use core_flock::types::{FlockEvent, FlockId, FlockState, GroupKeys};
pub use core_net::{DiscoveryId, MemorySwarm, Network};
pub use core_pairing::invite::{decode_invite, Invite, InviteDecode};
pub use core_pairing::PairingError;
pub use core_registry::registry::{FlockOptions, FlockRegistry, JoinOutcome, RegistryError};
pub use core_registry::{LocalStore, MemoryStore, MetaMap, MetaValue, SqliteStore, StoreError};
pub use logging::{init_logging, LogConfig, LogLevel};
