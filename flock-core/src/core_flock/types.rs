//! Flock identifiers, key material, lifecycle states and events

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const FLOCK_ID_CONTEXT: &str = "flock-core/1 flock id";

/// Stable identifier of one group, derived from its group key.
///
/// Safe to persist and display; it does not reveal the key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlockId(pub [u8; 32]);

impl FlockId {
    pub fn derive(group_key: &[u8; 32]) -> Self {
        FlockId(blake3::derive_key(FLOCK_ID_CONTEXT, group_key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(FlockId(arr))
    }
}

impl fmt::Display for FlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlockId({}..)", &self.to_hex()[..8])
    }
}

/// Secret material shared by all members of one flock
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct GroupKeys {
    /// Identifies the group; the discovery identifier derives from it
    pub group_key: [u8; 32],
    /// Seals values in the replicated view
    pub encryption_key: [u8; 32],
}

impl GroupKeys {
    /// Fresh random keys for a newly created group
    pub fn generate() -> Self {
        GroupKeys {
            group_key: rand::random(),
            encryption_key: rand::random(),
        }
    }
}

impl fmt::Debug for GroupKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GroupKeys(..)")
    }
}

/// Lifecycle states; linear, no cycles back
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlockState {
    Booting,
    Opening,
    Active,
    Leaving,
    Closed,
}

/// Events emitted by one flock.
///
/// Broadcast semantics: every subscriber sees every event (multi-consumer);
/// slow subscribers may observe lag and should re-check state, which all
/// in-crate waiters do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlockEvent {
    /// The merged history changed and the view was rebuilt
    Merged,
    /// Quorum membership changed; carries the new size
    QuorumChanged(usize),
    /// The local writer is now part of quorum
    Writable,
    /// Open completed and the initial state is in place
    AllDataPresent,
    /// The network session ended while the flock was still opening
    SessionClosed,
    /// The flock reached its terminal state
    Closed,
}
