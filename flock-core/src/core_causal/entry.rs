//! Signed log entries and the operations they carry

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Public-key identity of one append-only log
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriterId(pub [u8; 32]);

impl WriterId {
    /// Identity of a local signing key
    pub fn from_signing_key(key: &SigningKey) -> Self {
        WriterId(key.verifying_key().to_bytes())
    }

    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        WriterId(key.to_bytes())
    }

    /// The verifying key, if the bytes are a valid curve point
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriterId({}..)", &self.to_hex()[..8])
    }
}

/// A single replicated operation
///
/// `Put`/`Del` mutate the key-value namespace; `AddWriter`/`RemoveWriter`
/// mutate quorum membership. Membership is versioned like data: it only
/// ever changes through entries in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Put { key: String, value: Vec<u8> },
    Del { key: String },
    AddWriter { writer: WriterId },
    RemoveWriter { writer: WriterId },
}

/// One immutable entry in a writer's log
///
/// `seq` is contiguous per writer starting at 1. `lamport` strictly
/// increases within one writer and dominates every entry the writer had
/// observed at append time, so sorting by `(lamport, writer, seq)` yields
/// a causality-respecting total order that is identical on every replica
/// holding the same entry set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub writer: WriterId,
    pub seq: u64,
    pub lamport: u64,
    pub op: Operation,
    /// ed25519 signature over the bincode encoding of (writer, seq, lamport, op)
    pub signature: Vec<u8>,
}

impl Entry {
    /// Build and sign a new entry
    pub fn sign(
        identity: &SigningKey,
        seq: u64,
        lamport: u64,
        op: Operation,
    ) -> Result<Entry, bincode::Error> {
        let writer = WriterId::from_signing_key(identity);
        let payload = signing_bytes(&writer, seq, lamport, &op)?;
        let signature = identity.sign(&payload);
        Ok(Entry {
            writer,
            seq,
            lamport,
            op,
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Verify the entry's signature against its claimed writer
    pub fn verify(&self) -> bool {
        let Some(key) = self.writer.verifying_key() else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };
        let Ok(payload) = signing_bytes(&self.writer, self.seq, self.lamport, &self.op) else {
            return false;
        };
        key.verify(&payload, &signature).is_ok()
    }
}

fn signing_bytes(
    writer: &WriterId,
    seq: u64,
    lamport: u64,
    op: &Operation,
) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(&(writer, seq, lamport, op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_signing_key;

    #[test]
    fn test_sign_and_verify() {
        let key = test_signing_key(1);
        let entry = Entry::sign(
            &key,
            1,
            1,
            Operation::Put {
                key: "a".to_string(),
                value: b"b".to_vec(),
            },
        )
        .unwrap();

        assert!(entry.verify());
        assert_eq!(entry.writer, WriterId::from_signing_key(&key));
    }

    #[test]
    fn test_tampered_entry_fails_verification() {
        let key = test_signing_key(1);
        let mut entry = Entry::sign(
            &key,
            1,
            1,
            Operation::Put {
                key: "a".to_string(),
                value: b"b".to_vec(),
            },
        )
        .unwrap();

        entry.op = Operation::Put {
            key: "a".to_string(),
            value: b"c".to_vec(),
        };
        assert!(!entry.verify());
    }

    #[test]
    fn test_wrong_writer_fails_verification() {
        let key = test_signing_key(1);
        let other = test_signing_key(2);
        let mut entry = Entry::sign(&key, 1, 1, Operation::Del { key: "x".to_string() }).unwrap();

        entry.writer = WriterId::from_signing_key(&other);
        assert!(!entry.verify());
    }

    #[test]
    fn test_writer_id_ordering_is_stable() {
        let a = WriterId([1u8; 32]);
        let b = WriterId([2u8; 32]);
        assert!(a < b);
        assert_eq!(a.to_hex().len(), 64);
    }
}
