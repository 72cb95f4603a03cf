//! End-to-end pairing flows: create, invite, join, reject

mod common;

use common::{expect_joined, founder_and_joiner};
use flock_core::test_utils::{memory_registry, wait_for_sync};
use flock_core::{FlockOptions, JoinOutcome, MemorySwarm};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_created_group_reads_its_own_writes() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);

    let flock = registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();
    flock.set("a", b"b").unwrap();

    assert_eq!(flock.get("a").unwrap(), Some(b"b".to_vec()));
    assert_eq!(flock.quorum_size(), 1);
    assert!(flock.is_writable());

    registry.close().await;
}

#[tokio::test]
async fn test_join_replicates_founder_profile() {
    let swarm = Arc::new(MemorySwarm::new());
    let (founder_registry, joiner_registry, founder, joiner) = founder_and_joiner(&swarm).await;

    // Both sides observe two writers in quorum
    wait_for_sync("both replicas see two writers", || {
        founder.quorum_size() == 2 && joiner.quorum_size() == 2
    })
    .await;

    // The founder publishes a profile update; it appears on the joiner
    // under the founder's namespaced member key
    founder
        .set_user_profile(&json!({ "name": "founder", "bio": "first" }))
        .unwrap();

    let profile_key = founder.user_profile_key();
    assert!(profile_key.starts_with("groupInfo/members/"));
    wait_for_sync("founder profile replicated to joiner", || {
        matches!(joiner.get(&profile_key), Ok(Some(_)))
    })
    .await;

    let raw = joiner.get(&profile_key).unwrap().unwrap();
    let profile: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(profile["name"], "founder");

    // The cached group-info projection catches up as well
    wait_for_sync("group info projection includes the founder", || {
        joiner
            .group_info()
            .members
            .contains_key(&founder.writer_id().to_hex())
    })
    .await;

    founder_registry.close().await;
    joiner_registry.close().await;
}

#[tokio::test]
async fn test_malformed_invite_yields_invalid_and_no_group() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);

    let outcome = registry
        .join("definitely-not-a-token", FlockOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, JoinOutcome::InvalidInvite));

    let outcome = registry
        .create(Some(""), FlockOptions::default(), false)
        .await
        .unwrap();
    assert!(matches!(outcome, JoinOutcome::InvalidInvite));

    assert!(registry.list_saved().unwrap().is_empty());
    registry.close().await;
}

#[tokio::test]
async fn test_rejoining_same_invite_returns_existing_group() {
    let swarm = Arc::new(MemorySwarm::new());
    let founder_registry = memory_registry(&swarm);
    let joiner_registry = memory_registry(&swarm);

    let founder = founder_registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();
    let invite = founder.create_invite().unwrap();

    let first = expect_joined(
        joiner_registry
            .join(&invite.token, FlockOptions::default())
            .await
            .unwrap(),
    );

    // Same token again: the join short-circuits to the open group
    let second = joiner_registry
        .join(&invite.token, FlockOptions::default())
        .await
        .unwrap();
    match second {
        JoinOutcome::AlreadyJoined(flock) => assert_eq!(flock.id(), first.id()),
        _ => panic!("expected AlreadyJoined"),
    }

    founder_registry.close().await;
    joiner_registry.close().await;
}

#[tokio::test]
async fn test_create_invite_is_idempotent_until_consumed() {
    let swarm = Arc::new(MemorySwarm::new());
    let registry = memory_registry(&swarm);
    let flock = registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();

    let first = flock.create_invite().unwrap();
    let second = flock.create_invite().unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.token, second.token);

    registry.close().await;
}

#[tokio::test]
async fn test_consumed_invite_admits_no_second_candidate() {
    let swarm = Arc::new(MemorySwarm::new());
    let founder_registry = memory_registry(&swarm);
    let joiner_registry = memory_registry(&swarm);

    let founder = founder_registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();
    let invite = founder.create_invite().unwrap();

    let joiner = expect_joined(
        joiner_registry
            .join(&invite.token, FlockOptions::default())
            .await
            .unwrap(),
    );
    wait_for_sync("quorum reaches two", || founder.quorum_size() == 2).await;

    // Admission consumed the record, so issuing again mints a fresh invite
    let fresh = founder.create_invite().unwrap();
    assert_ne!(fresh.id, invite.id);

    // A third instance presenting the consumed token is never admitted;
    // pairing fails without creating a group or growing the quorum
    let third_registry = memory_registry(&swarm);
    let result = third_registry
        .join(&invite.token, FlockOptions::default())
        .await;
    assert!(result.is_err(), "consumed invite must not admit");
    assert_eq!(founder.quorum_size(), 2);
    assert_eq!(joiner.quorum_size(), 2);

    founder_registry.close().await;
    joiner_registry.close().await;
    third_registry.close().await;
}

#[tokio::test]
async fn test_quorum_grows_by_one_per_admission() {
    let swarm = Arc::new(MemorySwarm::new());
    let founder_registry = memory_registry(&swarm);

    let founder = founder_registry
        .create_flock(FlockOptions::default())
        .await
        .unwrap();
    assert_eq!(founder.quorum_size(), 1);

    let mut registries = Vec::new();
    for expected in 2usize..=3 {
        let invite = founder.create_invite().unwrap();
        let registry = memory_registry(&swarm);
        let joined = expect_joined(
            registry
                .join(&invite.token, FlockOptions::default())
                .await
                .unwrap(),
        );
        assert!(joined.is_writable());
        wait_for_sync("founder observes the admission", || {
            founder.quorum_size() == expected
        })
        .await;
        registries.push(registry);
    }

    founder_registry.close().await;
    for registry in registries {
        registry.close().await;
    }
}
