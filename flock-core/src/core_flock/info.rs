//! Cached group-info projection
//!
//! Every merge event schedules a recompute of the projection. Recomputes
//! are coalesced with a depth-one queue: while one run is in flight at
//! most one follow-up is queued, and further requests fold into it.

use crate::sync_ext::{MutexExt, RwLockExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

/// Synchronously readable projection of a flock's replicated state
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupInfo {
    /// Current writer-quorum size
    pub quorum_size: usize,
    /// Whether the local writer is part of quorum
    pub writable: bool,
    /// Writer id (hex) → decoded member profile
    pub members: BTreeMap<String, serde_json::Value>,
}

#[derive(Default)]
struct RecomputeFlags {
    running: bool,
    pending: bool,
}

/// Cache plus the depth-one recompute queue
pub(crate) struct InfoCell {
    cache: RwLock<GroupInfo>,
    flags: Mutex<RecomputeFlags>,
}

impl InfoCell {
    pub(crate) fn new() -> Self {
        Self {
            cache: RwLock::new(GroupInfo::default()),
            flags: Mutex::new(RecomputeFlags::default()),
        }
    }

    pub(crate) fn snapshot(&self) -> GroupInfo {
        self.cache.read_guard().clone()
    }

    pub(crate) fn store(&self, info: GroupInfo) {
        *self.cache.write_guard() = info;
    }

    /// Request a recompute. Returns true if the caller should start a
    /// worker; false if one is already running and the request was queued
    /// (or folded into the queued one).
    pub(crate) fn try_begin(&self) -> bool {
        let mut flags = self.flags.guard();
        if flags.running {
            flags.pending = true;
            false
        } else {
            flags.running = true;
            true
        }
    }

    /// Called by the worker after each run. Returns true if a queued
    /// request should be served with another run.
    pub(crate) fn finish_round(&self) -> bool {
        let mut flags = self.flags.guard();
        if flags.pending {
            flags.pending = false;
            true
        } else {
            flags.running = false;
            false
        }
    }

    /// Release the running slot without a run (worker could not start)
    pub(crate) fn abandon(&self) {
        let mut flags = self.flags.guard();
        flags.running = false;
        flags.pending = false;
    }
}
