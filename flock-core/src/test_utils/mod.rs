//! Deterministic helpers and fixtures for tests

use crate::config::FlockConfig;
use crate::core_net::{MemorySwarm, Network};
use crate::core_registry::{FlockRegistry, MemoryStore};
use ed25519_dalek::SigningKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default seed for deterministic tests
pub const DEFAULT_TEST_SEED: u64 = 42;

/// Create a deterministic RNG with the default seed
pub fn test_rng() -> StdRng {
    test_rng_with_seed(DEFAULT_TEST_SEED)
}

/// Create a deterministic RNG with a custom seed
pub fn test_rng_with_seed(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Deterministic signing key: the same `n` always yields the same key
pub fn test_signing_key(n: u64) -> SigningKey {
    let seed: [u8; 32] = test_rng_with_seed(n).random();
    SigningKey::from_bytes(&seed)
}

/// A flock config with short timeouts suited to in-process tests
pub fn test_config() -> FlockConfig {
    FlockConfig {
        grace_period: Duration::from_millis(500),
        pairing_timeout: Duration::from_secs(3),
        pairing_retry: Duration::from_millis(50),
        resync_interval: Duration::from_millis(50),
        close_poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Registry over a shared swarm with in-memory persistence
pub fn memory_registry(swarm: &Arc<MemorySwarm>) -> FlockRegistry {
    let net: Arc<dyn Network> = Arc::clone(swarm) as Arc<dyn Network>;
    FlockRegistry::new(net, Arc::new(MemoryStore::new()), test_config())
}

/// Registry over a shared swarm with a caller-supplied store
pub fn memory_registry_with_store(
    swarm: &Arc<MemorySwarm>,
    store: Arc<MemoryStore>,
) -> FlockRegistry {
    let net: Arc<dyn Network> = Arc::clone(swarm) as Arc<dyn Network>;
    FlockRegistry::new(net, store, test_config())
}

/// Poll a condition until it holds or the timeout elapses.
///
/// Panics on timeout with the given description, which is the right
/// failure mode inside tests.
pub async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Synchronous-condition variant of [`wait_for`]
pub async fn wait_for_sync<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    wait_for(what, move || {
        let holds = condition();
        async move { holds }
    })
    .await
}
