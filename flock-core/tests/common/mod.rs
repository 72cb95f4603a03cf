//! Shared fixtures for integration tests
#![allow(dead_code)]

use flock_core::test_utils::memory_registry;
use flock_core::{Flock, FlockOptions, FlockRegistry, JoinOutcome, MemorySwarm};
use std::sync::Arc;

/// Unwrap a join outcome that must be a fresh join
pub fn expect_joined(outcome: JoinOutcome) -> Flock {
    match outcome {
        JoinOutcome::Joined(flock) => flock,
        JoinOutcome::Created(_) => panic!("expected Joined, got Created"),
        JoinOutcome::AlreadyJoined(_) => panic!("expected Joined, got AlreadyJoined"),
        JoinOutcome::InvalidInvite => panic!("expected Joined, got InvalidInvite"),
    }
}

/// Two registries on one swarm: a founder with a fresh group and a joiner
/// admitted through an invite
pub async fn founder_and_joiner(
    swarm: &Arc<MemorySwarm>,
) -> (FlockRegistry, FlockRegistry, Flock, Flock) {
    let founder_registry = memory_registry(swarm);
    let joiner_registry = memory_registry(swarm);

    let founder = founder_registry
        .create_flock(FlockOptions::default())
        .await
        .expect("founder should create group");
    let invite = founder.create_invite().expect("founder should issue invite");

    let outcome = joiner_registry
        .join(&invite.token, FlockOptions::default())
        .await
        .expect("joiner should pair");
    let joiner = expect_joined(outcome);

    (founder_registry, joiner_registry, founder, joiner)
}
