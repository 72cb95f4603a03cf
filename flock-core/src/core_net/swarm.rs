//! Topic-based in-memory swarm
//!
//! Peers join a discovery topic and exchange [`WireMessage`]s. Sessions
//! unregister themselves once every sender handle is gone, which is how
//! a flock leaves a topic: drop the session and its handles.

use super::message::WireMessage;
use super::DiscoveryId;
use crate::sync_ext::MutexExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Transport-level peer identifier, unique per swarm
pub type PeerId = u64;

/// A message as delivered to one peer
#[derive(Debug)]
pub struct Envelope {
    pub from: PeerId,
    pub msg: WireMessage,
}

/// Outbound routing choice
#[derive(Debug)]
pub enum Outgoing {
    Broadcast(WireMessage),
    To(PeerId, WireMessage),
}

/// Anything sessions can be created from.
///
/// Implemented by [`MemorySwarm`] directly and by the chaos harness, which
/// wraps the sessions it hands out. Always passed explicitly into the
/// registry and each flock; there is no ambient singleton.
pub trait Network: Send + Sync {
    fn join_topic(&self, topic: DiscoveryId) -> NetSession;
}

/// Shared in-process swarm
#[derive(Clone, Default)]
pub struct MemorySwarm {
    inner: Arc<SwarmInner>,
}

#[derive(Default)]
struct SwarmInner {
    topics: Mutex<HashMap<DiscoveryId, HashMap<PeerId, mpsc::UnboundedSender<Envelope>>>>,
    next_peer: AtomicU64,
}

impl MemorySwarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers currently registered under a topic
    pub fn topic_size(&self, topic: &DiscoveryId) -> usize {
        self.inner
            .topics
            .guard()
            .get(topic)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

impl Network for MemorySwarm {
    fn join_topic(&self, topic: DiscoveryId) -> NetSession {
        let peer = self.inner.next_peer.fetch_add(1, Ordering::Relaxed) + 1;
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();

        self.inner
            .topics
            .guard()
            .entry(topic)
            .or_default()
            .insert(peer, in_tx);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                inner.dispatch(&topic, peer, out);
            }
            inner.leave(&topic, peer);
        });

        NetSession {
            peer,
            topic,
            incoming: in_rx,
            outgoing: out_tx,
        }
    }
}

impl SwarmInner {
    fn dispatch(&self, topic: &DiscoveryId, from: PeerId, out: Outgoing) {
        let topics = self.topics.guard();
        let Some(peers) = topics.get(topic) else {
            return;
        };
        match out {
            Outgoing::Broadcast(msg) => {
                for (peer, tx) in peers {
                    if *peer != from {
                        let _ = tx.send(Envelope {
                            from,
                            msg: msg.clone(),
                        });
                    }
                }
            }
            Outgoing::To(target, msg) => {
                if let Some(tx) = peers.get(&target) {
                    let _ = tx.send(Envelope { from, msg });
                }
            }
        }
    }

    fn leave(&self, topic: &DiscoveryId, peer: PeerId) {
        let mut topics = self.topics.guard();
        if let Some(peers) = topics.get_mut(topic) {
            peers.remove(&peer);
            if peers.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// One peer's membership in one topic
pub struct NetSession {
    peer: PeerId,
    topic: DiscoveryId,
    incoming: mpsc::UnboundedReceiver<Envelope>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl NetSession {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn topic(&self) -> DiscoveryId {
        self.topic
    }

    /// A cloneable sending half; the session unregisters once the session
    /// and every handle are dropped
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            peer: self.peer,
            outgoing: self.outgoing.clone(),
        }
    }

    /// Next inbound message, or `None` once the session is unregistered
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.incoming.recv().await
    }

    pub(crate) fn from_parts(
        peer: PeerId,
        topic: DiscoveryId,
        incoming: mpsc::UnboundedReceiver<Envelope>,
        outgoing: mpsc::UnboundedSender<Outgoing>,
    ) -> Self {
        Self {
            peer,
            topic,
            incoming,
            outgoing,
        }
    }

    pub(crate) fn into_parts(self) -> (SessionHandle, mpsc::UnboundedReceiver<Envelope>) {
        (
            SessionHandle {
                peer: self.peer,
                outgoing: self.outgoing,
            },
            self.incoming,
        )
    }
}

/// Sending half of a session
#[derive(Clone)]
pub struct SessionHandle {
    peer: PeerId,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl SessionHandle {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn broadcast(&self, msg: WireMessage) {
        let _ = self.outgoing.send(Outgoing::Broadcast(msg));
    }

    pub fn send_to(&self, peer: PeerId, msg: WireMessage) {
        let _ = self.outgoing.send(Outgoing::To(peer, msg));
    }

    pub(crate) fn send_raw(&self, out: Outgoing) {
        let _ = self.outgoing.send(out);
    }
}
