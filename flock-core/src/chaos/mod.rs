//! Fault-injection harness (test support)
//!
//! Wraps session creation of an underlying [`Network`] and any registered
//! flocks. A seeded generator drives connect/read/write delays, message
//! drops and per-group partitions (leave then rejoin the discovery
//! topic). Chaos is inert until [`ChaosNet::enable`] is called; once
//! enabled it applies to the sessions and flocks already wrapped as well
//! as everything created afterwards, until [`ChaosNet::teardown`] clears
//! all pending timers and resets state. The seed is always logged so a
//! failing run can be reproduced.

use crate::config::ChaosConfig;
use crate::core_flock::types::FlockState;
use crate::core_flock::Flock;
use crate::core_net::{DiscoveryId, NetSession, Network, Outgoing};
use crate::sync_ext::MutexExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Chaos wrapper around a network
#[derive(Clone)]
pub struct ChaosNet {
    inner: Arc<ChaosInner>,
}

struct ChaosInner {
    net: Arc<dyn Network>,
    cfg: ChaosConfig,
    rng: Mutex<StdRng>,
    enabled: AtomicBool,
    enabled_at: Mutex<Option<tokio::time::Instant>>,
    flocks: Mutex<Vec<Flock>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChaosNet {
    pub fn new(net: Arc<dyn Network>, cfg: ChaosConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            inner: Arc::new(ChaosInner {
                net,
                cfg,
                rng: Mutex::new(rng),
                enabled: AtomicBool::new(false),
                enabled_at: Mutex::new(None),
                flocks: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn seed(&self) -> u64 {
        self.inner.cfg.seed
    }

    /// Register a flock for partition chaos
    pub fn register_flock(&self, flock: &Flock) {
        self.inner.flocks.guard().push(flock.clone());
    }

    /// Switch chaos on. Already-wrapped sessions and registered flocks
    /// are affected retroactively; drop/partition faults start after the
    /// configured grace window.
    pub fn enable(&self) {
        if !self.inner.cfg.enabled {
            warn!("chaos config has enabled=false; enable() ignored");
            return;
        }
        if self.inner.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.enabled_at.guard() = Some(tokio::time::Instant::now());
        info!(seed = self.inner.cfg.seed, "chaos enabled");

        let inner = Arc::clone(&self.inner);
        let scheduler = tokio::spawn(async move { inner.partition_loop().await });
        self.inner.tasks.guard().push(scheduler);
    }

    /// Stop injecting faults, clear all pending timers and reset state
    pub fn teardown(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        *self.inner.enabled_at.guard() = None;
        for task in self.inner.tasks.guard().drain(..) {
            task.abort();
        }
        self.inner.flocks.guard().clear();
        info!("chaos torn down");
    }
}

impl Network for ChaosNet {
    fn join_topic(&self, topic: DiscoveryId) -> NetSession {
        let session = self.inner.net.join_topic(topic);
        let peer = session.peer();
        let (handle, mut inner_rx) = session.into_parts();

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();

        // Outbound: per-write delay
        let chaos = Arc::clone(&self.inner);
        let outbound = tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                if chaos.delays_active() {
                    tokio::time::sleep(chaos.delay(chaos.cfg.max_write_delay)).await;
                }
                handle.send_raw(out);
            }
        });

        // Inbound: connect delay, random drop (with stall), per-read delay
        let chaos = Arc::clone(&self.inner);
        let inbound = tokio::spawn(async move {
            if chaos.delays_active() {
                tokio::time::sleep(chaos.delay(chaos.cfg.max_connect_delay)).await;
            }
            while let Some(envelope) = inner_rx.recv().await {
                if chaos.chaos_active() && chaos.roll(chaos.cfg.drop_probability) {
                    debug!(peer, "chaos dropped a message");
                    tokio::time::sleep(chaos.delay(chaos.cfg.max_drop_delay)).await;
                    continue;
                }
                if chaos.delays_active() {
                    tokio::time::sleep(chaos.delay(chaos.cfg.max_read_delay)).await;
                }
                if in_tx.send(envelope).is_err() {
                    break;
                }
            }
        });

        self.inner.tasks.guard().extend([outbound, inbound]);
        NetSession::from_parts(peer, topic, in_rx, out_tx)
    }
}

impl ChaosInner {
    /// Delays apply as soon as chaos is enabled
    fn delays_active(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Drop/partition faults wait out the grace window
    fn chaos_active(&self) -> bool {
        if !self.enabled.load(Ordering::SeqCst) {
            return false;
        }
        let enabled_at = *self.enabled_at.guard();
        enabled_at
            .map(|at| at.elapsed() >= self.cfg.grace)
            .unwrap_or(false)
    }

    fn delay(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.guard().random_range(0..=max_ms))
    }

    fn roll(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        self.rng.guard().random_bool(probability.min(1.0))
    }

    fn partition_duration(&self) -> Duration {
        let min_ms = self.cfg.min_partition.as_millis() as u64;
        let max_ms = (self.cfg.max_partition.as_millis() as u64).max(min_ms);
        Duration::from_millis(self.rng.guard().random_range(min_ms..=max_ms))
    }

    async fn partition_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.cfg.tick);
        loop {
            tick.tick().await;
            if !self.chaos_active() {
                continue;
            }
            let flocks = self.flocks.guard().clone();
            for flock in flocks {
                if flock.state() != FlockState::Active {
                    continue;
                }
                if self.roll(self.cfg.partition_probability) {
                    let duration = self.partition_duration();
                    info!(flock = %flock.id(), ?duration, "chaos partition");
                    flock.go_offline();
                    let rejoin = tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        flock.go_online();
                        debug!(flock = %flock.id(), "chaos partition healed");
                    });
                    self.tasks.guard().push(rejoin);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_net::MemorySwarm;

    #[tokio::test]
    async fn test_inert_until_enabled_and_after_teardown() {
        let swarm = Arc::new(MemorySwarm::new());
        let chaos = ChaosNet::new(swarm, ChaosConfig { enabled: true, ..Default::default() });

        assert!(!chaos.inner.delays_active());
        chaos.enable();
        assert!(chaos.inner.delays_active());
        // Grace window still suppresses drop/partition chaos
        assert!(!chaos.inner.chaos_active());

        chaos.teardown();
        assert!(!chaos.inner.delays_active());
        assert!(chaos.inner.tasks.guard().is_empty());
    }

    #[tokio::test]
    async fn test_enable_respects_config_flag() {
        let swarm = Arc::new(MemorySwarm::new());
        let chaos = ChaosNet::new(swarm, ChaosConfig::default());
        chaos.enable();
        assert!(!chaos.inner.delays_active());
    }

    #[test]
    fn test_same_seed_same_decisions() {
        let make = |seed| {
            let swarm = Arc::new(MemorySwarm::new());
            ChaosNet::new(
                swarm as Arc<dyn Network>,
                ChaosConfig { enabled: true, seed, ..Default::default() },
            )
        };
        let a = make(7);
        let b = make(7);
        let decisions_a: Vec<bool> = (0..64).map(|_| a.inner.roll(0.5)).collect();
        let decisions_b: Vec<bool> = (0..64).map(|_| b.inner.roll(0.5)).collect();
        assert_eq!(decisions_a, decisions_b);
    }
}
