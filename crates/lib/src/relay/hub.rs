//! Peer bookkeeping shared by the bundled relays.
//!
//! The hub owns the peer table and the status channel, spawns one reader task per
//! peer and implements fan-out. Relays wrap it and only decide how peer links are
//! created.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{mpsc, oneshot, watch};

use super::{PeerId, PeerLink, Relay, RelayError, RelayStatus};
use crate::{
    Result,
    engine::{Origin, WeakRuntime},
    operation::Operation,
};

struct Peer {
    label: String,
    outbound: mpsc::UnboundedSender<String>,
    // Dropping this stops the reader task.
    _shutdown: oneshot::Sender<()>,
}

pub(crate) struct Hub {
    name: String,
    peers: Mutex<HashMap<PeerId, Peer>>,
    next_peer: AtomicU64,
    status: watch::Sender<RelayStatus>,
}

impl Hub {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let (status, _) = watch::channel(RelayStatus::Closed);
        Self {
            name: name.into(),
            peers: Mutex::new(HashMap::new()),
            next_peer: AtomicU64::new(1),
            status,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn peers_lock(&self) -> MutexGuard<'_, HashMap<PeerId, Peer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn open(&self) {
        if self.status.send_replace(RelayStatus::Open) != RelayStatus::Open {
            tracing::info!(relay = %self.name, "Relay open");
        }
    }

    pub(crate) fn close(&self) {
        let dropped = {
            let mut peers = self.peers_lock();
            let count = peers.len();
            peers.clear();
            count
        };
        if self.status.send_replace(RelayStatus::Closed) != RelayStatus::Closed {
            tracing::info!(relay = %self.name, dropped, "Relay closed");
        }
    }

    pub(crate) fn status(&self) -> RelayStatus {
        *self.status.borrow()
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<RelayStatus> {
        self.status.subscribe()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.status() {
            RelayStatus::Open => Ok(()),
            RelayStatus::Closed => Err(RelayError::BackendUnavailable {
                relay: self.name.clone(),
                reason: "relay is closed".to_string(),
            }
            .into()),
        }
    }

    /// Register a peer and spawn its reader, which forwards each message to
    /// `relay.message_receiver` and disconnects the peer when its stream ends.
    pub(crate) fn attach(&self, link: PeerLink, relay: Weak<dyn Relay>) -> Result<PeerId> {
        self.ensure_open()?;
        let peer = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let PeerLink {
            outbound,
            inbound,
            label,
        } = link;

        tracing::debug!(relay = %self.name, peer, label = %label, "Peer connected");
        self.peers_lock().insert(
            peer,
            Peer {
                label,
                outbound,
                _shutdown: shutdown_tx,
            },
        );
        spawn_reader(relay, peer, inbound, shutdown_rx);
        Ok(peer)
    }

    pub(crate) fn detach(&self, peer: PeerId) -> Result<()> {
        match self.peers_lock().remove(&peer) {
            Some(removed) => {
                tracing::debug!(relay = %self.name, peer, label = %removed.label, "Peer disconnected");
                Ok(())
            }
            None => Err(RelayError::PeerNotFound {
                relay: self.name.clone(),
                peer,
            }
            .into()),
        }
    }

    pub(crate) fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers_lock().keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    /// Send to every peer but `skip`. Peers whose channel is gone are dropped.
    pub(crate) fn publish(&self, operation: &Operation, skip: Option<PeerId>) -> Result<()> {
        self.ensure_open()?;
        let wire = operation.to_wire();
        let mut peers = self.peers_lock();
        let dead: Vec<PeerId> = peers
            .iter()
            .filter(|(id, _)| Some(**id) != skip)
            .filter(|(_, peer)| peer.outbound.send(wire.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        for peer in dead {
            tracing::warn!(relay = %self.name, peer, "Dropping dead peer");
            peers.remove(&peer);
        }
        tracing::trace!(relay = %self.name, operation = %wire, skip = ?skip, "Published operation");
        Ok(())
    }

    pub(crate) fn send_to(&self, peer: PeerId, operation: &Operation) -> Result<()> {
        self.ensure_open()?;
        let mut peers = self.peers_lock();
        let Some(target) = peers.get(&peer) else {
            return Err(RelayError::PeerNotFound {
                relay: self.name.clone(),
                peer,
            }
            .into());
        };
        if target.outbound.send(operation.to_wire()).is_err() {
            tracing::warn!(relay = %self.name, peer, "Dropping dead peer");
            peers.remove(&peer);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("peers", &self.peers())
            .finish()
    }
}

fn spawn_reader(
    relay: Weak<dyn Relay>,
    peer: PeerId,
    mut inbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = inbound.recv() => {
                    let Some(relay) = relay.upgrade() else { break };
                    match message {
                        Some(raw) => {
                            if let Err(e) = relay.message_receiver(&raw, peer).await {
                                tracing::warn!(relay = relay.name(), peer, error = %e, "Inbound operation failed");
                            }
                        }
                        None => {
                            // Already gone when the relay dropped the peer itself.
                            let _ = relay.disconnect(peer).await;
                            break;
                        }
                    }
                }
            }
        }
    });
}

/// Parse one inbound message and hand it to the runtime.
///
/// Malformed text is logged and dropped.
pub(crate) async fn route(
    runtime: &WeakRuntime,
    relay: Arc<dyn Relay>,
    raw: &str,
    from: PeerId,
) -> Result<()> {
    let operation = match Operation::parse(raw) {
        Ok(operation) => operation,
        Err(e) => {
            tracing::warn!(relay = relay.name(), peer = from, error = %e, "Dropping malformed message");
            return Ok(());
        }
    };
    let Some(runtime) = runtime.upgrade() else {
        tracing::debug!(relay = relay.name(), "Runtime gone, dropping message");
        return Ok(());
    };
    runtime
        .receive(
            operation,
            Origin::Relay {
                relay,
                peer: Some(from),
            },
        )
        .await
}
