//! The transport facade (§4.4): `broadcast` to every peer (including a local enqueue on self),
//! and single-peer `send`. Abstract over any FIFO per-link channel; this crate's one
//! implementation is a thin wrapper over `tokio::sync::mpsc` unbounded channels, matching the
//! `futures`/`tokio` channel stack the teacher crate already depends on.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::{ConsensusError, ConsensusResult};
use crate::types::{Event, ReplicaId};

/// Per-replica outbound sink. `broadcast` MAY silently drop a peer it cannot reach; Byzantine or
/// crashed peers are the protocol's problem, not the transport's (§4.4, §7).
pub trait Transport: Send + Sync {
    /// Deliver `event` to every peer, including this replica's own queue.
    fn broadcast(&self, event: Event) -> ConsensusResult<()>;

    /// Deliver `event` to a single peer (or to self, if `to` is this replica's id).
    fn send(&self, to: ReplicaId, event: Event) -> ConsensusResult<()>;
}

/// A [`Transport`] backed by one `tokio::sync::mpsc` unbounded sender per peer (the sender for
/// this replica's own id is its own inbound queue).
pub struct ChannelTransport {
    id: ReplicaId,
    peers: HashMap<ReplicaId, UnboundedSender<Event>>,
}

impl ChannelTransport {
    /// Build a transport for replica `id` given every replica's inbound sender, including its
    /// own.
    pub fn new(id: ReplicaId, peers: HashMap<ReplicaId, UnboundedSender<Event>>) -> Self {
        ChannelTransport { id, peers }
    }
}

impl Transport for ChannelTransport {
    fn broadcast(&self, event: Event) -> ConsensusResult<()> {
        for (&peer, tx) in self.peers.iter() {
            if tx.send(event.clone()).is_err() {
                if peer == self.id {
                    return Err(ConsensusError::QueueClosed(
                        "own event queue is closed".to_string(),
                    ));
                }
                log::warn!(
                    "replica {} - transport: peer {} seems down, dropping {}",
                    self.id,
                    peer,
                    event
                );
            }
        }
        Ok(())
    }

    fn send(&self, to: ReplicaId, event: Event) -> ConsensusResult<()> {
        match self.peers.get(&to) {
            Some(tx) => tx.send(event).map_err(|_| {
                if to == self.id {
                    ConsensusError::QueueClosed("own event queue is closed".to_string())
                } else {
                    log::warn!("replica {} - transport: peer {} seems down, dropping", self.id, to);
                    ConsensusError::TransportErr(format!("peer {} unreachable", to))
                }
            }),
            None => {
                log::warn!("replica {} - transport: unknown peer {}, dropping", self.id, to);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{Prevote, INIT_HEIGHT, INIT_ROUND};

    fn prevote_event(from: ReplicaId) -> Event {
        Prevote {
            height: INIT_HEIGHT,
            round: INIT_ROUND,
            id: None,
            from,
        }
        .into()
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer_including_self() {
        let (tx0, mut rx0) = tokio::sync::mpsc::unbounded_channel();
        let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
        let mut peers = HashMap::new();
        peers.insert(0, tx0);
        peers.insert(1, tx1);

        let transport = ChannelTransport::new(0, peers);
        transport.broadcast(prevote_event(0)).unwrap();

        assert!(rx0.try_recv().is_ok());
        assert!(rx1.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_silently_dropped() {
        let mut peers = HashMap::new();
        let (tx0, _rx0) = tokio::sync::mpsc::unbounded_channel();
        peers.insert(0, tx0);
        let transport = ChannelTransport::new(0, peers);

        assert!(transport.send(99, prevote_event(0)).is_ok());
    }

    #[tokio::test]
    async fn broadcast_to_closed_peer_is_dropped_but_self_failure_errors() {
        let (tx0, rx0) = tokio::sync::mpsc::unbounded_channel();
        let (tx1, rx1) = tokio::sync::mpsc::unbounded_channel();
        drop(rx1); // peer 1 crashed
        let mut peers = HashMap::new();
        peers.insert(0, tx0);
        peers.insert(1, tx1);
        let transport = ChannelTransport::new(0, peers);

        // Peer 1 is down but that's tolerated; our own queue (0) is still open.
        assert!(transport.broadcast(prevote_event(0)).is_ok());
        drop(rx0);
        assert!(transport.broadcast(prevote_event(0)).is_err());
    }
}
