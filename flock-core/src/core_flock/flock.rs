//! The per-group state machine
//!
//! A flock owns one local writer identity, the merged causal store, the
//! materialized view and (while online) one network session on the
//! group's discovery topic. All shared resources are injected by the
//! registry that opened it.

use super::info::{GroupInfo, InfoCell};
use super::types::{FlockEvent, FlockId, FlockState, GroupKeys};
use crate::config::FlockConfig;
use crate::core_causal::{CausalError, CausalStore, Entry, Frontier, Operation, WriterId};
use crate::core_net::{
    DiscoveryId, Envelope, NetSession, Network, PeerId, SessionHandle, WireMessage,
};
use crate::core_pairing::invite::{self, Invite, InviteRecord};
use crate::core_pairing::{member, PairingError, PairingGrant};
use crate::core_view::{CipherError, SyncedView, ValueCipher, INVITE_KEY, MEMBERS_PREFIX};
use crate::sync_ext::{MutexExt, RwLockExt};
use ed25519_dalek::SigningKey;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Flock operation errors
#[derive(Debug, thiserror::Error)]
pub enum FlockError {
    #[error("flock is not open for writes")]
    NotActive,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Causal(#[from] CausalError),

    #[error(transparent)]
    Pairing(#[from] PairingError),
}

/// Handle to one open group
#[derive(Clone)]
pub struct Flock {
    inner: Arc<FlockInner>,
}

pub(crate) struct FlockInner {
    self_ref: Weak<FlockInner>,
    id: FlockId,
    discovery: DiscoveryId,
    keys: GroupKeys,
    cipher: ValueCipher,
    identity: SigningKey,
    writer: WriterId,
    cfg: FlockConfig,
    net: Arc<dyn Network>,
    store: RwLock<CausalStore>,
    view: RwLock<SyncedView>,
    state_tx: watch::Sender<FlockState>,
    events_tx: broadcast::Sender<FlockEvent>,
    session: Mutex<Option<SessionHandle>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    info: InfoCell,
    /// Latest frontier announced by each peer; doubles as the leave
    /// confirmation signal
    peer_frontiers: Mutex<HashMap<PeerId, Frontier>>,
    leave_error: Mutex<Option<String>>,
    on_leave: Mutex<Option<Box<dyn FnOnce(&FlockId) + Send>>>,
}

/// How a flock comes into existence
pub(crate) enum OpenRole {
    /// Creating the group: write the genesis membership entry and publish
    /// the local profile
    Creator { profile: Option<serde_json::Value> },
    /// Admitted through pairing: the session was handed over by the
    /// candidate session and the flock must observe its own admission
    Joiner,
    /// Reopened from persisted key material; state arrives via merge
    Saved,
}

impl Flock {
    pub(crate) async fn open(
        net: Arc<dyn Network>,
        cfg: FlockConfig,
        keys: GroupKeys,
        identity: SigningKey,
        role: OpenRole,
        session: Option<NetSession>,
    ) -> Result<Flock, FlockError> {
        let writer = WriterId::from_signing_key(&identity);
        let id = FlockId::derive(&keys.group_key);
        let discovery = DiscoveryId::derive(&keys.group_key);
        let cipher = ValueCipher::new(keys.encryption_key);
        let (state_tx, _) = watch::channel(FlockState::Booting);
        let (events_tx, _) = broadcast::channel(cfg.event_capacity.max(1));

        let inner = Arc::new_cyclic(|self_ref| FlockInner {
            self_ref: self_ref.clone(),
            id,
            discovery,
            keys,
            cipher,
            identity,
            writer,
            cfg,
            net,
            store: RwLock::new(CausalStore::new()),
            view: RwLock::new(SyncedView::new()),
            state_tx,
            events_tx,
            session: Mutex::new(None),
            recv_task: Mutex::new(None),
            info: InfoCell::new(),
            peer_frontiers: Mutex::new(HashMap::new()),
            leave_error: Mutex::new(None),
            on_leave: Mutex::new(None),
        });
        let flock = Flock { inner: Arc::clone(&inner) };

        inner.set_state(FlockState::Opening);
        match role {
            OpenRole::Creator { profile } => {
                inner.append(Operation::AddWriter { writer })?;
                inner.attach_session(inner.net.join_topic(discovery));
                if let Some(profile) = profile {
                    if let Err(error) = flock.set_user_profile(&profile) {
                        flock.close().await;
                        return Err(error);
                    }
                }
            }
            OpenRole::Joiner => {
                let session = session.ok_or(PairingError::Closed)?;
                inner.attach_session(session);
                // Pairing finishes only once this replica has observed its
                // own writer key in the merged quorum.
                if let Err(error) = inner.wait_writable().await {
                    flock.close().await;
                    return Err(error);
                }
            }
            OpenRole::Saved => {
                inner.attach_session(inner.net.join_topic(discovery));
            }
        }

        inner.set_state(FlockState::Active);
        inner.emit(FlockEvent::AllDataPresent);
        metrics::counter!("flock_opened_total").increment(1);
        info!(flock = %id, writer = %writer, "flock open");
        Ok(flock)
    }

    /// Open a joined group from a completed pairing handshake
    pub(crate) async fn open_joined(
        net: Arc<dyn Network>,
        cfg: FlockConfig,
        grant: PairingGrant,
    ) -> Result<Flock, FlockError> {
        let PairingGrant {
            keys,
            session,
            identity,
        } = grant;
        Flock::open(net, cfg, keys, identity, OpenRole::Joiner, Some(session)).await
    }

    pub fn id(&self) -> FlockId {
        self.inner.id
    }

    pub fn discovery_id(&self) -> DiscoveryId {
        self.inner.discovery
    }

    pub fn writer_id(&self) -> WriterId {
        self.inner.writer
    }

    pub fn state(&self) -> FlockState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FlockState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FlockEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Cached projection; recomputed (coalesced) after every merge
    pub fn group_info(&self) -> GroupInfo {
        self.inner.info.snapshot()
    }

    pub fn quorum_size(&self) -> usize {
        self.inner.view.read_guard().quorum().len()
    }

    pub fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    /// Store a value under a replicated key.
    ///
    /// Returns once the operation is durably recorded in the local
    /// writer's log; global merge happens asynchronously.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), FlockError> {
        self.inner.ensure_open()?;
        self.inner.append_put(key, value)?;
        Ok(())
    }

    /// Read one key from the latest flushed view state
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FlockError> {
        let sealed = self.inner.view.read_guard().get(key);
        match sealed {
            Some(sealed) => Ok(Some(self.inner.cipher.open(key, &sealed)?)),
            None => Ok(None),
        }
    }

    pub fn del(&self, key: &str) -> Result<(), FlockError> {
        self.inner.ensure_open()?;
        self.inner.append(Operation::Del { key: key.to_string() })?;
        Ok(())
    }

    /// All keys under a prefix, decrypted, in key order
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, FlockError> {
        let sealed = self.inner.view.read_guard().get_by_prefix(prefix);
        self.inner.open_all(sealed)
    }

    /// Half-open range scan `[start, end)`, decrypted
    pub fn range(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>, FlockError> {
        let sealed = self.inner.view.read_guard().range(start, end);
        self.inner.open_all(sealed)
    }

    /// Publish (or re-publish) the local writer's profile.
    ///
    /// Stored under `groupInfo/members/<writerId>`, which only this writer
    /// may overwrite.
    pub fn set_user_profile(&self, profile: &serde_json::Value) -> Result<(), FlockError> {
        if !profile.is_object() {
            return Err(FlockError::Validation(
                "user profile must be a JSON object".to_string(),
            ));
        }
        let bytes = serde_json::to_vec(profile)
            .map_err(|e| FlockError::Validation(e.to_string()))?;
        let key = self.user_profile_key();
        self.inner.ensure_open()?;
        self.inner.append_put(&key, &bytes)?;
        Ok(())
    }

    pub fn user_profile_key(&self) -> String {
        format!("{}{}", MEMBERS_PREFIX, self.inner.writer.to_hex())
    }

    /// Issue the group's invite, or return the existing one unchanged
    pub fn create_invite(&self) -> Result<Invite, FlockError> {
        if let Some(record) = self.inner.invite_record() {
            return Ok(record.to_invite());
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let ttl_ms = self.inner.cfg.invite_ttl.as_millis() as i64;
        let record = invite::issue(self.inner.discovery, now_ms, ttl_ms)?;
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| FlockError::Validation(e.to_string()))?;
        self.inner.ensure_open()?;
        self.inner.append_put(INVITE_KEY, &bytes)?;
        Ok(record.to_invite())
    }

    /// Gracefully remove the local writer from quorum, then tear down.
    ///
    /// The wait for removal confirmation is bounded by the configured
    /// grace period; when it elapses teardown proceeds best-effort. An
    /// append failure is recorded (see [`Flock::leave_error`]) and never
    /// blocks teardown.
    pub async fn leave(&self) -> Result<(), FlockError> {
        let inner = &self.inner;
        if self.state() >= FlockState::Leaving {
            return Ok(());
        }
        inner.set_state(FlockState::Leaving);

        let (in_quorum, quorum_size) = {
            let view = inner.view.read_guard();
            (view.quorum().contains(&inner.writer), view.quorum().len())
        };

        // A solo group keeps its last writer; removal applies only when
        // someone else remains to carry the group.
        if in_quorum && quorum_size > 1 {
            match inner.append(Operation::RemoveWriter { writer: inner.writer }) {
                Ok(entry) => {
                    if !inner.wait_removal_confirmed(&entry).await {
                        warn!(
                            flock = %inner.id,
                            "leave grace period elapsed without confirmation; proceeding"
                        );
                    }
                }
                Err(error) => {
                    warn!(flock = %inner.id, %error, "failed to append writer removal");
                    *inner.leave_error.guard() = Some(error.to_string());
                }
            }
        }

        if let Some(hook) = inner.on_leave.guard().take() {
            hook(&inner.id);
        }
        self.close().await;
        Ok(())
    }

    /// Error recorded during a best-effort leave, if any
    pub fn leave_error(&self) -> Option<String> {
        self.inner.leave_error.guard().clone()
    }

    /// Leave the discovery topic, stop replication and seal the flock.
    /// Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        let changed = inner.state_tx.send_if_modified(|state| {
            if *state == FlockState::Closed {
                false
            } else {
                *state = FlockState::Closed;
                true
            }
        });
        if !changed {
            return;
        }
        inner.detach_session();
        inner.emit(FlockEvent::Closed);
        metrics::counter!("flock_closed_total").increment(1);
        info!(flock = %inner.id, "flock closed");
    }

    /// Leave the discovery topic while keeping local state; offline writes
    /// keep committing to the local log
    pub fn go_offline(&self) {
        self.inner.detach_session();
        debug!(flock = %self.inner.id, "offline");
    }

    /// Rejoin the discovery topic and catch up via announce exchange
    pub fn go_online(&self) {
        let inner = &self.inner;
        if self.state() >= FlockState::Leaving {
            return;
        }
        if inner.session.guard().is_some() {
            return;
        }
        inner.attach_session(inner.net.join_topic(inner.discovery));
        debug!(flock = %inner.id, "online");
    }

    pub(crate) fn set_on_leave(&self, hook: Box<dyn FnOnce(&FlockId) + Send>) {
        *self.inner.on_leave.guard() = Some(hook);
    }
}

impl FlockInner {
    fn set_state(&self, state: FlockState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: FlockEvent) {
        let _ = self.events_tx.send(event);
    }

    fn ensure_open(&self) -> Result<(), FlockError> {
        if *self.state_tx.borrow() >= FlockState::Leaving {
            return Err(FlockError::NotActive);
        }
        Ok(())
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.view.read_guard().quorum().contains(&self.writer)
    }

    pub(crate) fn keys(&self) -> &GroupKeys {
        &self.keys
    }

    /// Seal and append a put in one log step, so the sealing nonce is
    /// bound to the entry's final sequence number
    fn append_put(&self, key: &str, value: &[u8]) -> Result<Entry, FlockError> {
        let entry = {
            let mut store = self.store.write_guard();
            let seq = store.writer_len(&self.writer) + 1;
            let sealed = self.cipher.seal(key, &self.writer, seq, value)?;
            store.append_local(
                &self.identity,
                Operation::Put {
                    key: key.to_string(),
                    value: sealed,
                },
            )?
        };
        self.after_append(&entry);
        Ok(entry)
    }

    pub(crate) fn append(&self, op: Operation) -> Result<Entry, FlockError> {
        let entry = self.store.write_guard().append_local(&self.identity, op)?;
        self.after_append(&entry);
        Ok(entry)
    }

    fn after_append(&self, entry: &Entry) {
        self.rebuild();
        if let Some(handle) = self.session.guard().clone() {
            handle.broadcast(WireMessage::Entries(vec![entry.clone()]));
        }
    }

    /// Replay the merged history into the view and surface what changed
    fn rebuild(&self) {
        let was_writable = self.is_writable();
        let outcome = {
            let ordered = self.store.read_guard().linearize();
            self.view.write_guard().rebuild(&ordered)
        };
        self.emit(FlockEvent::Merged);
        if outcome.quorum_changed {
            let size = self.view.read_guard().quorum().len();
            self.emit(FlockEvent::QuorumChanged(size));
        }
        if !was_writable && self.is_writable() {
            self.emit(FlockEvent::Writable);
        }
        self.schedule_info_recompute();
    }

    fn schedule_info_recompute(&self) {
        if !self.info.try_begin() {
            return;
        }
        let Some(this) = self.self_ref.upgrade() else {
            self.info.abandon();
            return;
        };
        tokio::spawn(async move {
            loop {
                let info = this.compute_info();
                this.info.store(info);
                if !this.info.finish_round() {
                    break;
                }
            }
        });
    }

    fn compute_info(&self) -> GroupInfo {
        let (quorum_size, writable, sealed) = {
            let view = self.view.read_guard();
            (
                view.quorum().len(),
                view.quorum().contains(&self.writer),
                view.get_by_prefix(MEMBERS_PREFIX),
            )
        };
        let mut members = BTreeMap::new();
        for (key, value) in sealed {
            let decoded = self
                .cipher
                .open(&key, &value)
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok());
            match decoded {
                Some(profile) => {
                    members.insert(key[MEMBERS_PREFIX.len()..].to_string(), profile);
                }
                None => debug!(%key, "skipping undecodable member profile"),
            }
        }
        GroupInfo {
            quorum_size,
            writable,
            members,
        }
    }

    fn attach_session(&self, session: NetSession) {
        let handle = session.handle();
        handle.broadcast(WireMessage::Announce(self.store.read_guard().frontier()));
        *self.session.guard() = Some(handle);

        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move { this.run_session(session).await });
        if let Some(previous) = self.recv_task.guard().replace(task) {
            previous.abort();
        }
    }

    fn detach_session(&self) {
        self.session.guard().take();
        if let Some(task) = self.recv_task.guard().take() {
            task.abort();
        }
        self.peer_frontiers.guard().clear();
    }

    async fn run_session(self: Arc<Self>, mut session: NetSession) {
        let handle = session.handle();
        let mut resync = tokio::time::interval(self.cfg.resync_interval);
        loop {
            tokio::select! {
                received = session.recv() => match received {
                    Some(envelope) => self.on_message(envelope),
                    None => break,
                },
                _ = resync.tick() => {
                    let frontier = self.store.read_guard().frontier();
                    handle.broadcast(WireMessage::Announce(frontier));
                }
            }
        }
        if *self.state_tx.borrow() == FlockState::Opening {
            self.emit(FlockEvent::SessionClosed);
        }
    }

    fn on_message(&self, envelope: Envelope) {
        match envelope.msg {
            WireMessage::Announce(frontier) => {
                self.peer_frontiers
                    .guard()
                    .insert(envelope.from, frontier.clone());
                let (missing, behind) = {
                    let store = self.store.read_guard();
                    (
                        store.missing_for(&frontier),
                        frontier.is_ahead_of(&store.frontier()),
                    )
                };
                if let Some(handle) = self.session.guard().clone() {
                    if !missing.is_empty() {
                        handle.send_to(envelope.from, WireMessage::Entries(missing));
                    }
                    if behind {
                        let ours = self.store.read_guard().frontier();
                        handle.send_to(envelope.from, WireMessage::Announce(ours));
                    }
                }
            }
            WireMessage::Entries(batch) => {
                let added = self.store.write_guard().ingest(batch);
                if added > 0 {
                    metrics::counter!("flock_entries_ingested_total").increment(added as u64);
                    self.rebuild();
                    let frontier = self.store.read_guard().frontier();
                    if let Some(handle) = self.session.guard().clone() {
                        handle.broadcast(WireMessage::Announce(frontier));
                    }
                }
            }
            WireMessage::PairingRequest(request) => {
                if *self.state_tx.borrow() == FlockState::Active {
                    member::handle_request(self, envelope.from, &request);
                }
            }
            // Responses are consumed by candidate sessions before a flock
            // exists; an open flock has nothing to do with them.
            WireMessage::PairingResponse(_) => {}
        }
    }

    pub(crate) fn send_to(&self, peer: PeerId, msg: WireMessage) {
        if let Some(handle) = self.session.guard().clone() {
            handle.send_to(peer, msg);
        }
    }

    pub(crate) fn invite_record(&self) -> Option<InviteRecord> {
        let sealed = self.view.read_guard().get(INVITE_KEY)?;
        let bytes = self.cipher.open(INVITE_KEY, &sealed).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn open_all(
        &self,
        sealed: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<(String, Vec<u8>)>, FlockError> {
        sealed
            .into_iter()
            .map(|(key, value)| {
                let plain = self.cipher.open(&key, &value)?;
                Ok((key, plain))
            })
            .collect()
    }

    /// Wait until the local writer's removal is out of quorum and some
    /// peer has announced a frontier covering the removal entry. Bounded
    /// by the grace period; returns false on timeout.
    async fn wait_removal_confirmed(&self, entry: &Entry) -> bool {
        let deadline = tokio::time::Instant::now() + self.cfg.grace_period;
        loop {
            let acked = self
                .peer_frontiers
                .guard()
                .values()
                .any(|frontier| frontier.covers(&entry.writer, entry.seq));
            let removed = !self.is_writable();
            if acked && removed {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until this replica observes its own admission. Used by the
    /// joiner path to finish pairing; bounded by the pairing timeout.
    async fn wait_writable(&self) -> Result<(), FlockError> {
        let mut events = self.events_tx.subscribe();
        let deadline = tokio::time::Instant::now() + self.cfg.pairing_timeout;
        loop {
            if self.is_writable() {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(FlockError::Pairing(PairingError::Timeout));
                }
                event = events.recv() => match event {
                    Ok(FlockEvent::SessionClosed) => {
                        return Err(FlockError::Pairing(PairingError::Closed));
                    }
                    // Any other event (or lag) re-checks the quorum
                    _ => {}
                }
            }
        }
    }
}
