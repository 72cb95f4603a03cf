//! Deterministic apply of the merged operation history

use super::quorum::WriterQuorum;
use crate::core_causal::{Entry, Operation};
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::debug;

/// Group-wide replicated state lives under this prefix
pub const GROUP_INFO_PREFIX: &str = "groupInfo/";

/// Per-writer profile entries: `groupInfo/members/<writerId>`
pub const MEMBERS_PREFIX: &str = "groupInfo/members/";

/// The current admission record, readable by every member
pub const INVITE_KEY: &str = "groupInfo/invite";

/// Result of one rebuild pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Key-value operations committed
    pub applied: usize,
    /// Operations skipped because the author lacked authorization at that
    /// point in the history
    pub skipped: usize,
    /// Whether the committed quorum differs from the previous rebuild
    pub quorum_changed: bool,
}

/// Materialized key-value state of one replica.
///
/// Rebuilt by replaying an ordered batch of causal entries: mutations are
/// staged into an uncommitted batch and flushed atomically at the end, so
/// readers never observe a partial batch. Replaying the same ordered
/// history twice yields bit-identical state.
#[derive(Debug, Default)]
pub struct SyncedView {
    committed: BTreeMap<String, Vec<u8>>,
    quorum: WriterQuorum,
}

impl SyncedView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay an ordered history from scratch.
    ///
    /// `AddWriter`/`RemoveWriter` mutate the working quorum, never the
    /// namespace. `Put`/`Del` are staged, then flushed in one swap. A
    /// writer's key-value operations only apply while it is in quorum at
    /// that point in the order, and `groupInfo/members/<id>` keys apply
    /// only when authored by `<id>` — an unauthorized attempt leaves the
    /// existing value unchanged on every replica alike.
    pub fn rebuild(&mut self, ordered: &[Entry]) -> ApplyOutcome {
        let mut quorum = WriterQuorum::new();
        let mut staged: Vec<(&str, Option<&[u8]>)> = Vec::new();
        let mut outcome = ApplyOutcome::default();

        for entry in ordered {
            match &entry.op {
                Operation::AddWriter { writer } => {
                    // Genesis: the first membership entry admits its own
                    // author; afterwards only members may admit.
                    let authorized =
                        quorum.contains(&entry.writer) || (quorum.is_empty() && *writer == entry.writer);
                    if authorized {
                        quorum.insert(*writer);
                    } else {
                        outcome.skipped += 1;
                    }
                }
                Operation::RemoveWriter { writer } => {
                    if quorum.contains(&entry.writer) {
                        quorum.remove(writer);
                    } else {
                        outcome.skipped += 1;
                    }
                }
                Operation::Put { key, value } => {
                    if Self::authorized(entry, &quorum, key) {
                        staged.push((key, Some(value)));
                        outcome.applied += 1;
                    } else {
                        debug!(writer = %entry.writer, %key, "skipping unauthorized put");
                        outcome.skipped += 1;
                    }
                }
                Operation::Del { key } => {
                    if Self::authorized(entry, &quorum, key) {
                        staged.push((key, None));
                        outcome.applied += 1;
                    } else {
                        debug!(writer = %entry.writer, %key, "skipping unauthorized del");
                        outcome.skipped += 1;
                    }
                }
            }
        }

        // Flush: the staged batch becomes visible in a single swap
        let mut next = BTreeMap::new();
        for (key, value) in staged {
            match value {
                Some(value) => {
                    next.insert(key.to_string(), value.to_vec());
                }
                None => {
                    next.remove(key);
                }
            }
        }

        outcome.quorum_changed = quorum != self.quorum;
        self.committed = next;
        self.quorum = quorum;
        outcome
    }

    fn authorized(entry: &Entry, quorum: &WriterQuorum, key: &str) -> bool {
        if !quorum.contains(&entry.writer) {
            return false;
        }
        match key.strip_prefix(MEMBERS_PREFIX) {
            Some(owner) => owner == entry.writer.to_hex(),
            None => true,
        }
    }

    /// Read one key from the last flushed batch
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.committed.get(key).cloned()
    }

    /// All keys sharing a prefix, in key order
    pub fn get_by_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.committed
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Half-open range scan `[start, end)`
    pub fn range(&self, start: &str, end: &str) -> Vec<(String, Vec<u8>)> {
        self.committed
            .range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn quorum(&self) -> &WriterQuorum {
        &self.quorum
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}
