//! Registry behavior: classification, persistence, deletion, shutdown

use flock_core::test_utils::{memory_registry, memory_registry_with_store, test_config};
use flock_core::{
    FlockOptions, FlockRegistry, FlockState, JoinOutcome, MemorySwarm, MemoryStore, MetaValue,
    Network, RegistryError,
};
use std::sync::Arc;

#[tokio::test]
async fn test_create_dispatches_on_is_new() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);

    let created = registry
        .create(None, FlockOptions::default(), true)
        .await
        .unwrap();
    assert!(matches!(created, JoinOutcome::Created(_)));

    // Joining without a token is a validation error, not a panic
    let missing = registry.create(None, FlockOptions::default(), false).await;
    assert!(matches!(missing, Err(RegistryError::Validation(_))));

    registry.close().await;
}

#[tokio::test]
async fn test_find_by_discovery_id() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);
    let flock = registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();

    let found = registry.find(&flock.discovery_id()).unwrap();
    assert_eq!(found.id(), flock.id());

    let other = flock_core::DiscoveryId([0xAA; 32]);
    assert!(registry.find(&other).is_none());

    registry.close().await;
}

#[tokio::test]
async fn test_metadata_round_trips_through_the_index() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);

    let options = FlockOptions {
        profile: None,
        metadata: vec![
            ("label".to_string(), MetaValue::Str("ops flock".to_string())),
            (
                "settings".to_string(),
                MetaValue::Map(vec![("pinned".to_string(), MetaValue::Bool(true))]),
            ),
        ],
    };
    let flock = registry.create_flock(options).await.unwrap();

    let saved = registry.list_saved().unwrap();
    assert_eq!(saved.len(), 1);
    let (id, metadata) = &saved[0];
    assert_eq!(*id, flock.id());

    // The registry stamps a creation date, then keeps caller fields in order
    assert_eq!(metadata[0].0, "createdAt");
    assert!(matches!(metadata[0].1, MetaValue::Date(_)));
    assert_eq!(metadata[1].0, "label");
    assert_eq!(metadata[2].0, "settings");

    registry.close().await;
}

#[tokio::test]
async fn test_local_get_set_round_trip() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);

    assert_eq!(registry.local_get("cursor").unwrap(), None);
    registry.local_set("cursor", b"42").unwrap();
    assert_eq!(registry.local_get("cursor").unwrap(), Some(b"42".to_vec()));

    registry.close().await;
}

#[tokio::test]
async fn test_delete_purges_best_effort() {
    let swarm = Arc::new(MemorySwarm::new());
    let store = Arc::new(MemoryStore::new());
    let registry = memory_registry_with_store(&swarm, Arc::clone(&store));

    let flock = registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();
    let id = flock.id();

    // Purge failures are logged and must not block removal from the index
    store.set_fail_deletes(true);
    registry.delete_flock(&id).await.unwrap();
    assert!(registry.get(&id).is_none());
    assert_eq!(flock.state(), FlockState::Closed);

    // Once storage recovers, a second delete clears the segments
    store.set_fail_deletes(false);
    registry.delete_flock(&id).await.unwrap();
    assert!(registry.list_saved().unwrap().is_empty());

    registry.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_concurrent_safe() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);
    let flock = registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();

    let first = registry.clone();
    let second = registry.clone();
    tokio::join!(first.close(), second.close());

    assert_eq!(flock.state(), FlockState::Closed);
    assert!(registry.is_closing());

    // Further calls are no-ops, and new work is refused
    registry.close().await;
    let result = registry.create_flock(FlockOptions::default()).await;
    assert!(matches!(result, Err(RegistryError::Closed)));
}

#[tokio::test]
async fn test_one_groups_failure_does_not_affect_siblings() {
    let swarm = Arc::new(MemorySwarm::new());
    let founder_registry = memory_registry(&swarm);
    let joiner_registry = memory_registry(&swarm);

    let healthy = founder_registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();
    healthy.set("k", b"v").unwrap();

    // A failed pairing in the same registry leaves the healthy group alone
    let lonely_registry = FlockRegistry::new(
        Arc::clone(&swarm) as Arc<dyn Network>,
        Arc::new(MemoryStore::new()),
        test_config(),
    );
    let lonely = lonely_registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();
    let unanswerable = lonely.create_invite().unwrap();
    // With the only member offline there is nobody to answer the handshake
    lonely.go_offline();

    let failed = joiner_registry
        .join(&unanswerable.token, FlockOptions::default())
        .await;
    assert!(failed.is_err(), "pairing with an absent member must fail");

    assert_eq!(healthy.get("k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(healthy.state(), FlockState::Active);

    founder_registry.close().await;
    joiner_registry.close().await;
    lonely_registry.close().await;
}
