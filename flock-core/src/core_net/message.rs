//! Wire messages exchanged inside a discovery topic

use crate::core_causal::{Entry, Frontier};
use crate::core_pairing::session::{PairingRequest, PairingResponse};
use serde::{Deserialize, Serialize};

/// Everything that travels between peers of one topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Per-writer log lengths; triggers catch-up in both directions
    Announce(Frontier),
    /// A batch of contiguous log suffixes
    Entries(Vec<Entry>),
    /// Candidate side of the admission handshake
    PairingRequest(PairingRequest),
    /// Member reply carrying the sealed group credentials
    PairingResponse(PairingResponse),
}
