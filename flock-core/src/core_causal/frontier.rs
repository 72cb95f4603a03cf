//! Replication frontiers
//!
//! A frontier maps each known writer to the length of its log, the
//! version-vector analog used by the announce/catch-up exchange.

use super::entry::WriterId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-writer log lengths observed by one replica
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier(pub BTreeMap<WriterId, u64>);

impl Frontier {
    pub fn new() -> Self {
        Frontier(BTreeMap::new())
    }

    /// Observed length of one writer's log (0 when unknown)
    pub fn get(&self, writer: &WriterId) -> u64 {
        self.0.get(writer).copied().unwrap_or(0)
    }

    pub fn set(&mut self, writer: WriterId, len: u64) {
        self.0.insert(writer, len);
    }

    /// Whether this frontier includes `seq` from `writer`
    pub fn covers(&self, writer: &WriterId, seq: u64) -> bool {
        self.get(writer) >= seq
    }

    /// Whether `self` holds any entry the other frontier lacks
    pub fn is_ahead_of(&self, other: &Frontier) -> bool {
        self.0.iter().any(|(writer, &len)| len > other.get(writer))
    }

    /// Take the per-writer maximum
    pub fn merge(&mut self, other: &Frontier) {
        for (writer, &len) in &other.0 {
            let current = self.0.entry(*writer).or_insert(0);
            *current = (*current).max(len);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(n: u8) -> WriterId {
        WriterId([n; 32])
    }

    #[test]
    fn test_get_unknown_writer() {
        let frontier = Frontier::new();
        assert_eq!(frontier.get(&writer(1)), 0);
        assert!(!frontier.covers(&writer(1), 1));
    }

    #[test]
    fn test_covers() {
        let mut frontier = Frontier::new();
        frontier.set(writer(1), 3);
        assert!(frontier.covers(&writer(1), 3));
        assert!(frontier.covers(&writer(1), 1));
        assert!(!frontier.covers(&writer(1), 4));
    }

    #[test]
    fn test_is_ahead_of() {
        let mut a = Frontier::new();
        a.set(writer(1), 2);
        let mut b = Frontier::new();
        b.set(writer(1), 1);
        b.set(writer(2), 5);

        assert!(a.is_ahead_of(&b));
        assert!(b.is_ahead_of(&a));

        let mut c = b.clone();
        c.merge(&a);
        assert!(!a.is_ahead_of(&c));
        assert_eq!(c.get(&writer(1)), 2);
        assert_eq!(c.get(&writer(2)), 5);
    }
}
