//! The flock registry
//!
//! One registry per process: it owns the shared swarm handle and local
//! store, classifies join requests, recreates saved groups and tears
//! everything down on shutdown.

use super::local_store::{LocalStore, StoreError};
use super::meta::{decode_meta, encode_meta, MetaMap, MetaValue};
use crate::config::FlockConfig;
use crate::core_flock::flock::{Flock, FlockError, OpenRole};
use crate::core_flock::types::{FlockId, GroupKeys};
use crate::core_net::{DiscoveryId, Network};
use crate::core_pairing::invite::decode_full;
use crate::core_pairing::{CandidateSession, PairingError};
use crate::sync_ext::RwLockExt;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{info, warn};

/// Registry operation errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry is shutting down")]
    Closed,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Flock(#[from] FlockError),

    #[error(transparent)]
    Pairing(#[from] PairingError),
}

/// Per-open options
#[derive(Default)]
pub struct FlockOptions {
    /// Profile published for the local writer on open
    pub profile: Option<serde_json::Value>,
    /// Application metadata persisted in the local index
    pub metadata: MetaMap,
}

/// Classification of one `create` call
pub enum JoinOutcome {
    /// A brand new group was created locally
    Created(Flock),
    /// Pairing completed and the group is writable
    Joined(Flock),
    /// The token points at a group this registry already has open
    AlreadyJoined(Flock),
    /// The token failed to decode; no group object was created
    InvalidInvite,
}

/// Persisted key material for one group
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    group_key: [u8; 32],
    encryption_key: [u8; 32],
    identity_seed: [u8; 32],
}

/// Registry of all flocks known to this process
#[derive(Clone)]
pub struct FlockRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    net: Arc<dyn Network>,
    store: Arc<dyn LocalStore>,
    cfg: FlockConfig,
    flocks: RwLock<HashMap<FlockId, Flock>>,
    joined: RwLock<HashMap<DiscoveryId, FlockId>>,
    persists_in_flight: AtomicUsize,
    closing: AtomicBool,
}

impl FlockRegistry {
    /// Shared resources are injected here and handed explicitly to every
    /// group this registry opens.
    pub fn new(net: Arc<dyn Network>, store: Arc<dyn LocalStore>, cfg: FlockConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                net,
                store,
                cfg,
                flocks: RwLock::new(HashMap::new()),
                joined: RwLock::new(HashMap::new()),
                persists_in_flight: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Create or join a group.
    ///
    /// `is_new` creates; otherwise the invite token is classified into an
    /// invalid token, an already-joined group, or a fresh join that runs
    /// the pairing handshake.
    pub async fn create(
        &self,
        invite: Option<&str>,
        options: FlockOptions,
        is_new: bool,
    ) -> Result<JoinOutcome, RegistryError> {
        self.inner.ensure_open()?;
        if is_new {
            return Ok(JoinOutcome::Created(self.create_flock(options).await?));
        }
        match invite {
            Some(token) => self.join(token, options).await,
            None => Err(RegistryError::Validation(
                "joining an existing group requires an invite token".to_string(),
            )),
        }
    }

    /// Found a new group with a fresh identity and key material
    pub async fn create_flock(&self, options: FlockOptions) -> Result<Flock, RegistryError> {
        self.inner.ensure_open()?;
        let keys = GroupKeys::generate();
        let identity = SigningKey::from_bytes(&rand::random());
        let flock = Flock::open(
            Arc::clone(&self.inner.net),
            self.inner.cfg.clone(),
            keys.clone(),
            identity.clone(),
            OpenRole::Creator {
                profile: options.profile,
            },
            None,
        )
        .await?;
        self.inner
            .persist_flock(&flock.id(), &keys, &identity, options.metadata)?;
        self.register(&flock);
        Ok(flock)
    }

    /// Join a group through an invite token
    pub async fn join(
        &self,
        token: &str,
        options: FlockOptions,
    ) -> Result<JoinOutcome, RegistryError> {
        self.inner.ensure_open()?;
        let Some(decoded) = decode_full(token) else {
            return Ok(JoinOutcome::InvalidInvite);
        };
        if let Some(existing) = self.find(&decoded.discovery) {
            info!(flock = %existing.id(), "join short-circuited to existing group");
            return Ok(JoinOutcome::AlreadyJoined(existing));
        }

        let identity = SigningKey::from_bytes(&rand::random());
        let session = self.inner.net.join_topic(decoded.discovery);
        let candidate = CandidateSession::new(session, decoded, identity);
        let grant = candidate
            .run(self.inner.cfg.pairing_timeout, self.inner.cfg.pairing_retry)
            .await?;

        let keys = grant.keys.clone();
        let identity = grant.identity.clone();
        let flock =
            Flock::open_joined(Arc::clone(&self.inner.net), self.inner.cfg.clone(), grant).await?;
        self.inner
            .persist_flock(&flock.id(), &keys, &identity, options.metadata)?;
        self.register(&flock);
        if let Some(profile) = options.profile {
            flock.set_user_profile(&profile)?;
        }
        Ok(JoinOutcome::Joined(flock))
    }

    /// Reopen a previously known group from persisted key material,
    /// without re-inviting
    pub async fn open_saved(&self, id: &FlockId) -> Result<Flock, RegistryError> {
        self.inner.ensure_open()?;
        if let Some(flock) = self.get(id) {
            return Ok(flock);
        }
        let record = self.inner.read_key_record(id)?;
        let keys = GroupKeys {
            group_key: record.group_key,
            encryption_key: record.encryption_key,
        };
        let identity = SigningKey::from_bytes(&record.identity_seed);
        let flock = Flock::open(
            Arc::clone(&self.inner.net),
            self.inner.cfg.clone(),
            keys,
            identity,
            OpenRole::Saved,
            None,
        )
        .await?;
        self.register(&flock);
        Ok(flock)
    }

    /// Groups recorded in the durable index
    pub fn list_saved(&self) -> Result<Vec<(FlockId, MetaMap)>, RegistryError> {
        let mut saved = Vec::new();
        for key in self.inner.store.list_prefix("flock/")? {
            let Some(id) = key
                .strip_prefix("flock/")
                .and_then(|rest| rest.strip_suffix("/meta"))
                .and_then(FlockId::from_hex)
            else {
                continue;
            };
            if let Some(bytes) = self.inner.store.get(&key)? {
                saved.push((id, decode_meta(&bytes)?));
            }
        }
        Ok(saved)
    }

    /// Open group for a discovery identifier, if any
    pub fn find(&self, discovery: &DiscoveryId) -> Option<Flock> {
        let joined = self.inner.joined.read_guard();
        let id = joined.get(discovery)?;
        self.inner.flocks.read_guard().get(id).cloned()
    }

    pub fn get(&self, id: &FlockId) -> Option<Flock> {
        self.inner.flocks.read_guard().get(id).cloned()
    }

    /// Registry-local (non-replicated) value
    pub fn local_get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        Ok(self.inner.store.get(&format!("local/{key}"))?)
    }

    /// Registry-local (non-replicated) value
    pub fn local_set(&self, key: &str, value: &[u8]) -> Result<(), RegistryError> {
        Ok(self.inner.store.put(&format!("local/{key}"), value)?)
    }

    /// Close a group and purge its storage segments.
    ///
    /// Purging is best-effort: individual failures are logged and never
    /// block removal from the index.
    pub async fn delete_flock(&self, id: &FlockId) -> Result<(), RegistryError> {
        let flock = self.inner.flocks.write_guard().remove(id);
        if let Some(flock) = &flock {
            self.inner.joined.write_guard().remove(&flock.discovery_id());
            flock.close().await;
        }
        self.inner.purge_segments(id);
        Ok(())
    }

    /// Shut the registry down: waits (bounded) for in-flight persists,
    /// tears down all groups concurrently and releases shared resources.
    /// Idempotent; concurrent calls return immediately.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut budget = self.inner.cfg.close_poll_budget;
        while self.inner.persists_in_flight.load(Ordering::SeqCst) > 0 && budget > 0 {
            tokio::time::sleep(self.inner.cfg.close_poll_interval).await;
            budget -= 1;
        }
        if self.inner.persists_in_flight.load(Ordering::SeqCst) > 0 {
            warn!("registry closing with persists still in flight");
        }

        let flocks: Vec<Flock> = self
            .inner
            .flocks
            .write_guard()
            .drain()
            .map(|(_, flock)| flock)
            .collect();
        futures::future::join_all(flocks.iter().map(|flock| flock.close())).await;
        self.inner.joined.write_guard().clear();
        info!("registry closed");
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    fn register(&self, flock: &Flock) {
        let id = flock.id();
        self.inner.joined.write_guard().insert(flock.discovery_id(), id);
        self.inner.flocks.write_guard().insert(id, flock.clone());

        // Leaving a group forgets it locally: metadata is purged and the
        // registry stops tracking it. A plain close keeps both.
        let registry = Arc::downgrade(&self.inner);
        flock.set_on_leave(Box::new(move |flock_id| {
            if let Some(inner) = Weak::upgrade(&registry) {
                inner.forget(flock_id);
            }
        }));
    }
}

impl RegistryInner {
    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        Ok(())
    }

    fn keys_key(id: &FlockId) -> String {
        format!("flock/{}/keys", id.to_hex())
    }

    fn meta_key(id: &FlockId) -> String {
        format!("flock/{}/meta", id.to_hex())
    }

    /// Persist key material and metadata for a newly opened group.
    /// Tracked by the in-flight counter that shutdown waits on.
    fn persist_flock(
        &self,
        id: &FlockId,
        keys: &GroupKeys,
        identity: &SigningKey,
        mut metadata: MetaMap,
    ) -> Result<(), StoreError> {
        self.persists_in_flight.fetch_add(1, Ordering::SeqCst);
        let result = (|| {
            let record = KeyRecord {
                group_key: keys.group_key,
                encryption_key: keys.encryption_key,
                identity_seed: identity.to_bytes(),
            };
            let bytes = bincode::serialize(&record)
                .map_err(|e| StoreError::Codec(e.to_string()))?;
            self.store.put(&Self::keys_key(id), &bytes)?;

            if !metadata.iter().any(|(key, _)| key == "createdAt") {
                metadata.insert(0, ("createdAt".to_string(), MetaValue::Date(chrono::Utc::now())));
            }
            self.store.put(&Self::meta_key(id), &encode_meta(&metadata)?)
        })();
        self.persists_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn read_key_record(&self, id: &FlockId) -> Result<KeyRecord, RegistryError> {
        let bytes = self
            .store
            .get(&Self::keys_key(id))?
            .ok_or_else(|| RegistryError::Validation(format!("unknown group {id}")))?;
        bincode::deserialize(&bytes)
            .map_err(|e| RegistryError::Store(StoreError::Codec(e.to_string())))
    }

    /// Enumerate and purge a group's storage segments, best-effort
    fn purge_segments(&self, id: &FlockId) {
        let prefix = format!("flock/{}/", id.to_hex());
        let segments = match self.store.list_prefix(&prefix) {
            Ok(segments) => segments,
            Err(error) => {
                warn!(%error, "failed to enumerate storage segments; purging known keys");
                vec![Self::keys_key(id), Self::meta_key(id)]
            }
        };
        for segment in segments {
            if let Err(error) = self.store.delete(&segment) {
                warn!(key = %segment, %error, "purge failed; continuing");
            }
        }
    }

    fn forget(&self, id: &FlockId) {
        if let Some(flock) = self.flocks.write_guard().remove(id) {
            self.joined.write_guard().remove(&flock.discovery_id());
        }
        self.purge_segments(id);
    }
}
