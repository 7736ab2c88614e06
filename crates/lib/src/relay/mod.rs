//! Transport collaborators for entity operations.
//!
//! A [`Relay`] carries serialized operations between runtimes. One relay multiplexes
//! any number of peers: a server relay typically has one peer per connected client,
//! a client relay has a single upstream peer. Peers are plain text channels
//! ([`PeerLink`]) carrying one wire-format operation per message, so the same relay
//! logic works over in-process channels ([`MemoryRelay`]) and sockets ([`TcpRelay`]).
//!
//! Inbound messages are parsed and handed to the runtime, which routes them to the
//! addressed entity. Malformed messages and dead peers are logged and dropped; they
//! never fail the relay.

use std::fmt::{self, Debug};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{Result, engine::Origin, operation::Operation};

mod errors;
mod hub;
pub mod memory;
pub mod tcp;

pub use errors::RelayError;
pub(crate) use hub::Hub;
pub use memory::MemoryRelay;
pub use tcp::TcpRelay;

/// Identifier of a peer, unique within one relay.
pub type PeerId = u64;

/// Connection state of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    /// Not accepting or sending operations.
    Closed,
    /// Connected and relaying.
    Open,
}

/// A bidirectional text channel to one peer.
///
/// `outbound` carries messages to the peer and `inbound` yields messages from it. The
/// peer is considered gone once `inbound` ends.
pub struct PeerLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub label: String,
}

impl PeerLink {
    /// Two links wired to each other.
    pub fn pair(a_label: impl Into<String>, b_label: impl Into<String>) -> (PeerLink, PeerLink) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            PeerLink {
                outbound: b_tx,
                inbound: a_rx,
                label: b_label.into(),
            },
            PeerLink {
                outbound: a_tx,
                inbound: b_rx,
                label: a_label.into(),
            },
        )
    }
}

impl Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("label", &self.label)
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

/// Peer-to-peer transport of serialized operations.
#[async_trait]
pub trait Relay: Send + Sync + Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Start relaying and notify status listeners. Idempotent.
    async fn open(&self) -> Result<()>;

    /// Stop relaying, drop every peer and notify status listeners.
    async fn close(&self) -> Result<()>;

    fn status(&self) -> RelayStatus;

    /// Subscribe to status changes.
    fn watch_status(&self) -> watch::Receiver<RelayStatus>;

    /// Register a peer connection and start reading from it.
    async fn connect(&self, link: PeerLink) -> Result<PeerId>;

    /// Forget a peer. Returns `PeerNotFound` for an unknown id.
    async fn disconnect(&self, peer: PeerId) -> Result<()>;

    /// Currently connected peers.
    fn peers(&self) -> Vec<PeerId>;

    /// Send an operation to every peer except the one it arrived from.
    ///
    /// Fails with `BackendUnavailable` when the relay is closed.
    async fn publish(&self, operation: &Operation, origin: &Origin) -> Result<()>;

    /// Send an operation to a single peer, used for acknowledgments and sync answers.
    async fn send_to(&self, peer: PeerId, operation: &Operation) -> Result<()>;

    /// Handle one raw inbound message from `from`.
    async fn message_receiver(&self, raw: &str, from: PeerId) -> Result<()>;
}
