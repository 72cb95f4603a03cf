//! Per-key value sealing
//!
//! Each key gets its own subkey derived from the group encryption key, so
//! a value is only readable (and only meaningfully writable) by holders of
//! that key. Nonces are derived from the authoring entry's position, which
//! keeps sealing deterministic: replaying the same history produces
//! bit-identical sealed bytes.

use crate::core_causal::WriterId;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

const SUBKEY_CONTEXT: &str = "flock-core/1 value subkey";
const NONCE_LEN: usize = 24;

/// Value sealing errors
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("value sealing failed")]
    Seal,
    #[error("sealed value is too short")]
    Truncated,
    #[error("sealed value failed to authenticate")]
    Open,
}

/// Seals and opens values with per-key derived subkeys
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ValueCipher {
    key: [u8; 32],
}

impl ValueCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn subkey(&self, key: &str) -> [u8; 32] {
        let mut material = Vec::with_capacity(32 + key.len());
        material.extend_from_slice(&self.key);
        material.extend_from_slice(key.as_bytes());
        blake3::derive_key(SUBKEY_CONTEXT, &material)
    }

    /// Seal a value authored at `(writer, seq)`.
    ///
    /// The nonce is bound to the entry position; one entry seals exactly
    /// one plaintext, so the derived nonce never repeats under a subkey.
    pub fn seal(
        &self,
        key: &str,
        writer: &WriterId,
        seq: u64,
        plain: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let subkey = self.subkey(key);

        let mut position = Vec::with_capacity(40);
        position.extend_from_slice(&writer.0);
        position.extend_from_slice(&seq.to_be_bytes());
        let nonce_hash = blake3::keyed_hash(&subkey, &position);
        let nonce = &nonce_hash.as_bytes()[..NONCE_LEN];

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&subkey));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(nonce), plain)
            .map_err(|_| CipherError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed value stored under `key`
    pub fn open(&self, key: &str, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let subkey = self.subkey(key);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&subkey));
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Open)
    }
}
