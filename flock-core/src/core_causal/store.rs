//! Merged store of all known writer logs
//!
//! Holds one append-only log per writer, accepts verified suffixes from
//! peers, and produces the deterministic linearization the view replays.

use super::entry::{Entry, Operation, WriterId};
use super::frontier::Frontier;
use ed25519_dalek::SigningKey;
use std::collections::BTreeMap;
use tracing::warn;

/// Log access errors
#[derive(Debug, thiserror::Error)]
pub enum CausalError {
    #[error("failed to encode entry for signing: {0}")]
    Encode(String),
}

/// All writer logs known to one replica
#[derive(Debug, Default)]
pub struct CausalStore {
    logs: BTreeMap<WriterId, Vec<Entry>>,
    max_lamport: u64,
}

impl CausalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation to the local writer's own log.
    ///
    /// The entry is stamped with the next contiguous sequence number and a
    /// lamport value dominating everything this replica has observed, then
    /// signed. Returns the entry once it is recorded in the log.
    pub fn append_local(
        &mut self,
        identity: &SigningKey,
        op: Operation,
    ) -> Result<Entry, CausalError> {
        let writer = WriterId::from_signing_key(identity);
        let seq = self.writer_len(&writer) + 1;
        let lamport = self.max_lamport + 1;
        let entry = Entry::sign(identity, seq, lamport, op)
            .map_err(|e| CausalError::Encode(e.to_string()))?;

        self.max_lamport = lamport;
        self.logs.entry(writer).or_default().push(entry.clone());
        Ok(entry)
    }

    /// Ingest entries received from a peer.
    ///
    /// Entries are verified and appended in per-writer sequence order.
    /// Duplicates are skipped silently; gaps and bad signatures are skipped
    /// with a warning (a later announce round re-delivers the suffix).
    /// Returns how many entries were newly added.
    pub fn ingest(&mut self, mut batch: Vec<Entry>) -> usize {
        batch.sort_by(|a, b| (a.writer, a.seq).cmp(&(b.writer, b.seq)));

        let mut added = 0;
        for entry in batch {
            let len = self.writer_len(&entry.writer);
            if entry.seq <= len {
                continue;
            }
            if entry.seq != len + 1 {
                warn!(
                    writer = %entry.writer,
                    expected = len + 1,
                    got = entry.seq,
                    "skipping out-of-order entry"
                );
                continue;
            }
            if !entry.verify() {
                warn!(writer = %entry.writer, seq = entry.seq, "skipping entry with bad signature");
                continue;
            }

            self.max_lamport = self.max_lamport.max(entry.lamport);
            self.logs.entry(entry.writer).or_default().push(entry);
            added += 1;
        }
        added
    }

    /// Deterministic total order over every known entry.
    ///
    /// Sorted by `(lamport, writer, seq)`: per-writer append order is
    /// preserved and any entry appended after observing another sorts
    /// later, so replicas holding the same entry set order identically.
    pub fn linearize(&self) -> Vec<Entry> {
        let mut all: Vec<Entry> = self.logs.values().flatten().cloned().collect();
        all.sort_by(|a, b| {
            (a.lamport, a.writer, a.seq).cmp(&(b.lamport, b.writer, b.seq))
        });
        all
    }

    /// Current per-writer log lengths
    pub fn frontier(&self) -> Frontier {
        let mut frontier = Frontier::new();
        for (writer, log) in &self.logs {
            frontier.set(*writer, log.len() as u64);
        }
        frontier
    }

    /// Entries this replica holds beyond the given frontier
    pub fn missing_for(&self, frontier: &Frontier) -> Vec<Entry> {
        let mut missing = Vec::new();
        for (writer, log) in &self.logs {
            let have = frontier.get(writer) as usize;
            if have < log.len() {
                missing.extend(log[have..].iter().cloned());
            }
        }
        missing
    }

    pub fn writer_len(&self, writer: &WriterId) -> u64 {
        self.logs.get(writer).map(|l| l.len() as u64).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.logs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_signing_key;

    fn put(key: &str) -> Operation {
        Operation::Put {
            key: key.to_string(),
            value: b"v".to_vec(),
        }
    }

    #[test]
    fn test_append_local_stamps_contiguous_seqs() {
        let key = test_signing_key(1);
        let mut store = CausalStore::new();

        let first = store.append_local(&key, put("a")).unwrap();
        let second = store.append_local(&key, put("b")).unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert!(second.lamport > first.lamport);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_ingest_skips_duplicates() {
        let key = test_signing_key(1);
        let mut source = CausalStore::new();
        source.append_local(&key, put("a")).unwrap();
        source.append_local(&key, put("b")).unwrap();

        let mut sink = CausalStore::new();
        let batch = source.missing_for(&sink.frontier());
        assert_eq!(sink.ingest(batch.clone()), 2);
        assert_eq!(sink.ingest(batch), 0);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_ingest_rejects_bad_signature() {
        let key = test_signing_key(1);
        let mut source = CausalStore::new();
        let mut entry = source.append_local(&key, put("a")).unwrap();
        entry.signature[0] ^= 0xff;

        let mut sink = CausalStore::new();
        assert_eq!(sink.ingest(vec![entry]), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_ingest_skips_gapped_suffix() {
        let key = test_signing_key(1);
        let mut source = CausalStore::new();
        source.append_local(&key, put("a")).unwrap();
        let second = source.append_local(&key, put("b")).unwrap();

        let mut sink = CausalStore::new();
        assert_eq!(sink.ingest(vec![second]), 0);
    }

    #[test]
    fn test_linearize_is_deterministic_across_merge_orders() {
        let keys = [test_signing_key(1), test_signing_key(2), test_signing_key(3)];
        let mut replicas: Vec<CausalStore> = (0..3).map(|_| CausalStore::new()).collect();

        for (i, key) in keys.iter().enumerate() {
            replicas[i].append_local(key, put("shared")).unwrap();
            replicas[i].append_local(key, put(&format!("own-{i}"))).unwrap();
        }

        let batches: Vec<Vec<Entry>> =
            replicas.iter().map(|r| r.missing_for(&Frontier::new())).collect();

        // Deliver the same batches in different orders to each replica
        replicas[0].ingest(batches[1].clone());
        replicas[0].ingest(batches[2].clone());
        replicas[1].ingest(batches[2].clone());
        replicas[1].ingest(batches[0].clone());
        replicas[2].ingest(batches[0].clone());
        replicas[2].ingest(batches[1].clone());

        let orders: Vec<Vec<(WriterId, u64)>> = replicas
            .iter()
            .map(|r| r.linearize().iter().map(|e| (e.writer, e.seq)).collect())
            .collect();

        assert_eq!(orders[0], orders[1]);
        assert_eq!(orders[1], orders[2]);
        assert_eq!(orders[0].len(), 6);
    }

    #[test]
    fn test_causal_dependency_orders_after() {
        let alice = test_signing_key(1);
        let bob = test_signing_key(2);

        let mut a = CausalStore::new();
        let first = a.append_local(&alice, put("a")).unwrap();

        // Bob observes Alice's entry before appending his own
        let mut b = CausalStore::new();
        b.ingest(vec![first.clone()]);
        let second = b.append_local(&bob, put("b")).unwrap();
        assert!(second.lamport > first.lamport);

        a.ingest(vec![second.clone()]);
        let order = a.linearize();
        assert_eq!(order[0].writer, first.writer);
        assert_eq!(order[1].writer, second.writer);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ingest_order_never_changes_linearization(perm in proptest::collection::vec(0usize..3, 0..8)) {
                let keys = [test_signing_key(10), test_signing_key(11), test_signing_key(12)];
                let mut sources: Vec<CausalStore> = (0..3).map(|_| CausalStore::new()).collect();
                for (i, key) in keys.iter().enumerate() {
                    sources[i].append_local(key, put("k")).unwrap();
                }
                let batches: Vec<Vec<Entry>> =
                    sources.iter().map(|s| s.missing_for(&Frontier::new())).collect();

                let mut reference = CausalStore::new();
                for batch in &batches {
                    reference.ingest(batch.clone());
                }

                let mut shuffled = CausalStore::new();
                for &i in &perm {
                    shuffled.ingest(batches[i].clone());
                }
                for batch in &batches {
                    shuffled.ingest(batch.clone());
                }

                let lhs: Vec<_> = reference.linearize().iter().map(|e| (e.writer, e.seq)).collect();
                let rhs: Vec<_> = shuffled.linearize().iter().map(|e| (e.writer, e.seq)).collect();
                prop_assert_eq!(lhs, rhs);
            }
        }
    }
}
