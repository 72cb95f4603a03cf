//! Invite issuance and token encoding
//!
//! The printable token carries everything a candidate needs: the invite
//! id, the group's discovery identifier, and the seed of the invite
//! keypair used to prove possession. The admission record stored in the
//! replicated view carries only the public half, so any current member
//! can validate a request without being able to mint tokens.

use crate::core_net::DiscoveryId;
use crate::core_pairing::PairingError;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TOKEN_VERSION: u8 = 1;

/// Result of decoding an untrusted token.
///
/// Malformed input is expected, not exceptional: it yields `Invalid`
/// rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteDecode {
    Valid { id: Uuid, discovery_id: DiscoveryId },
    Invalid,
}

/// Decode a token far enough to classify a join request
pub fn decode_invite(token: &str) -> InviteDecode {
    match decode_full(token) {
        Some(token) => InviteDecode::Valid {
            id: token.id,
            discovery_id: token.discovery,
        },
        None => InviteDecode::Invalid,
    }
}

/// Fully decoded token, including the possession seed
#[derive(Clone)]
pub(crate) struct InviteToken {
    pub id: Uuid,
    pub discovery: DiscoveryId,
    pub seed: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    version: u8,
    id: Uuid,
    discovery: [u8; 32],
    seed: [u8; 32],
}

pub(crate) fn decode_full(token: &str) -> Option<InviteToken> {
    let bytes = bs58::decode(token).into_vec().ok()?;
    let payload: TokenPayload = bincode::deserialize(&bytes).ok()?;
    if payload.version != TOKEN_VERSION {
        return None;
    }
    Some(InviteToken {
        id: payload.id,
        discovery: DiscoveryId(payload.discovery),
        seed: payload.seed,
    })
}

/// A freshly issued (or re-read) invite as handed to the application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub token: String,
    pub public_key: [u8; 32],
    /// Unix milliseconds
    pub expires_at: i64,
}

/// The admission record replicated in the view under
/// [`crate::core_view::INVITE_KEY`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRecord {
    pub id: Uuid,
    pub token: String,
    pub public_key: [u8; 32],
    /// Unix milliseconds
    pub expires_at: i64,
}

impl InviteRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    pub fn to_invite(&self) -> Invite {
        Invite {
            id: self.id,
            token: self.token.clone(),
            public_key: self.public_key,
            expires_at: self.expires_at,
        }
    }
}

/// Mint a new invite for a group
pub(crate) fn issue(
    discovery: DiscoveryId,
    now_ms: i64,
    ttl_ms: i64,
) -> Result<InviteRecord, PairingError> {
    let id = Uuid::new_v4();
    let seed: [u8; 32] = rand::random();
    let signing_key = SigningKey::from_bytes(&seed);

    let payload = TokenPayload {
        version: TOKEN_VERSION,
        id,
        discovery: discovery.0,
        seed,
    };
    let bytes = bincode::serialize(&payload).map_err(|e| PairingError::Encode(e.to_string()))?;

    Ok(InviteRecord {
        id,
        token: bs58::encode(bytes).into_string(),
        public_key: signing_key.verifying_key().to_bytes(),
        expires_at: now_ms + ttl_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery() -> DiscoveryId {
        DiscoveryId([9u8; 32])
    }

    #[test]
    fn test_issue_and_decode_round_trip() {
        let record = issue(discovery(), 1_000, 60_000).unwrap();

        match decode_invite(&record.token) {
            InviteDecode::Valid { id, discovery_id } => {
                assert_eq!(id, record.id);
                assert_eq!(discovery_id, discovery());
            }
            InviteDecode::Invalid => panic!("freshly issued token failed to decode"),
        }

        let full = decode_full(&record.token).unwrap();
        let derived = SigningKey::from_bytes(&full.seed).verifying_key().to_bytes();
        assert_eq!(derived, record.public_key);
    }

    #[test]
    fn test_malformed_tokens_are_invalid_not_errors() {
        assert_eq!(decode_invite(""), InviteDecode::Invalid);
        assert_eq!(decode_invite("not base58 ~~~"), InviteDecode::Invalid);
        assert_eq!(decode_invite("abcdef"), InviteDecode::Invalid);

        // Valid base58 of garbage bytes
        let garbage = bs58::encode(b"garbage bytes that are not a token").into_string();
        assert_eq!(decode_invite(&garbage), InviteDecode::Invalid);
    }

    #[test]
    fn test_wrong_version_is_invalid() {
        let payload = TokenPayload {
            version: TOKEN_VERSION + 1,
            id: Uuid::new_v4(),
            discovery: [0u8; 32],
            seed: [0u8; 32],
        };
        let token = bs58::encode(bincode::serialize(&payload).unwrap()).into_string();
        assert_eq!(decode_invite(&token), InviteDecode::Invalid);
    }

    #[test]
    fn test_expiry() {
        let record = issue(discovery(), 1_000, 500).unwrap();
        assert!(!record.is_expired(1_200));
        assert!(record.is_expired(1_501));
    }
}
