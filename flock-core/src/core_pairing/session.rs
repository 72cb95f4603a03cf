//! Admission handshake wire types and grant sealing
//!
//! The candidate proves possession of the invite by signing with the
//! invite keypair; the member seals the group credentials to the
//! candidate's DH key with an ephemeral x25519 exchange, so nothing
//! secret crosses the topic in the clear.

use crate::core_flock::types::GroupKeys;
use crate::core_pairing::PairingError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

const GRANT_CONTEXT: &str = "flock-core/1 pairing grant";
const NONCE_LEN: usize = 24;

/// Candidate → member: prove possession of the invite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub invite_id: Uuid,
    /// The candidate's writer key, to be admitted on success
    pub writer: [u8; 32],
    /// Candidate's x25519 public key for sealing the reply
    pub dh_public: [u8; 32],
    /// ed25519 signature by the invite keypair over the request fields
    pub proof: Vec<u8>,
}

/// Member → candidate: sealed group credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingResponse {
    pub invite_id: Uuid,
    pub eph_public: [u8; 32],
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Bytes the invite keypair signs to authenticate a request
pub(crate) fn proof_message(invite_id: &Uuid, writer: &[u8; 32], dh_public: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(16 + 32 + 32);
    message.extend_from_slice(invite_id.as_bytes());
    message.extend_from_slice(writer);
    message.extend_from_slice(dh_public);
    message
}

/// Seal the group credentials to a candidate's DH key
pub(crate) fn seal_grant(
    keys: &GroupKeys,
    invite_id: Uuid,
    candidate_dh: &[u8; 32],
) -> Result<PairingResponse, PairingError> {
    let eph_secret = StaticSecret::from(rand::random::<[u8; 32]>());
    let eph_public = PublicKey::from(&eph_secret);
    let shared = eph_secret.diffie_hellman(&PublicKey::from(*candidate_dh));
    let key = blake3::derive_key(GRANT_CONTEXT, shared.as_bytes());

    let nonce: [u8; NONCE_LEN] = rand::random();
    let payload = bincode::serialize(keys).map_err(|e| PairingError::Encode(e.to_string()))?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), payload.as_slice())
        .map_err(|_| PairingError::Encode("grant sealing failed".to_string()))?;

    Ok(PairingResponse {
        invite_id,
        eph_public: eph_public.to_bytes(),
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Open a sealed grant with the candidate's DH secret
pub(crate) fn open_grant(
    dh_secret: &StaticSecret,
    response: &PairingResponse,
) -> Result<GroupKeys, PairingError> {
    if response.nonce.len() != NONCE_LEN {
        return Err(PairingError::Sealed);
    }
    let shared = dh_secret.diffie_hellman(&PublicKey::from(response.eph_public));
    let key = blake3::derive_key(GRANT_CONTEXT, shared.as_bytes());
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let payload = cipher
        .decrypt(XNonce::from_slice(&response.nonce), response.ciphertext.as_slice())
        .map_err(|_| PairingError::Sealed)?;
    bincode::deserialize(&payload).map_err(|_| PairingError::Sealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> GroupKeys {
        GroupKeys {
            group_key: [3u8; 32],
            encryption_key: [4u8; 32],
        }
    }

    #[test]
    fn test_seal_open_grant_round_trip() {
        let dh_secret = StaticSecret::from([5u8; 32]);
        let dh_public = PublicKey::from(&dh_secret).to_bytes();
        let invite_id = Uuid::new_v4();

        let response = seal_grant(&keys(), invite_id, &dh_public).unwrap();
        let opened = open_grant(&dh_secret, &response).unwrap();

        assert_eq!(opened.group_key, [3u8; 32]);
        assert_eq!(opened.encryption_key, [4u8; 32]);
    }

    #[test]
    fn test_wrong_dh_secret_cannot_open() {
        let dh_secret = StaticSecret::from([5u8; 32]);
        let dh_public = PublicKey::from(&dh_secret).to_bytes();
        let response = seal_grant(&keys(), Uuid::new_v4(), &dh_public).unwrap();

        let wrong = StaticSecret::from([6u8; 32]);
        assert!(matches!(open_grant(&wrong, &response), Err(PairingError::Sealed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let dh_secret = StaticSecret::from([5u8; 32]);
        let dh_public = PublicKey::from(&dh_secret).to_bytes();
        let mut response = seal_grant(&keys(), Uuid::new_v4(), &dh_public).unwrap();
        response.ciphertext[0] ^= 0xff;

        assert!(matches!(open_grant(&dh_secret, &response), Err(PairingError::Sealed)));
    }
}
