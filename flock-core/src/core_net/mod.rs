//! In-process network collaborator
//!
//! Discovery topics and peer sessions for replication and pairing. The
//! engine treats this layer as a supplied transport: it only assumes a
//! topic can be joined and left, and that messages sent to a topic reach
//! its other members eventually.

pub mod message;
pub mod swarm;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use message::WireMessage;
pub use swarm::{Envelope, MemorySwarm, NetSession, Network, Outgoing, PeerId, SessionHandle};

/// Public rendezvous identifier for one group.
///
/// Derived from the group key, so members can find each other without
/// revealing group content to the discovery layer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscoveryId(pub [u8; 32]);

const DISCOVERY_CONTEXT: &str = "flock-core/1 discovery id";

impl DiscoveryId {
    /// Derive the rendezvous identifier for a group key
    pub fn derive(group_key: &[u8; 32]) -> Self {
        DiscoveryId(blake3::derive_key(DISCOVERY_CONTEXT, group_key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DiscoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DiscoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryId({}..)", &self.to_hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_stable_and_key_bound() {
        let a = DiscoveryId::derive(&[1u8; 32]);
        let b = DiscoveryId::derive(&[1u8; 32]);
        let c = DiscoveryId::derive(&[2u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.0, [1u8; 32]);
    }
}
