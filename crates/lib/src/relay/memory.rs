//! In-process relay.
//!
//! Links runtimes living in the same process through channels. Used by the test
//! suite to exercise multi-replica convergence without sockets.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Hub, PeerId, PeerLink, Relay, RelayStatus, hub};
use crate::{
    Result,
    engine::{Origin, Runtime, WeakRuntime},
    operation::Operation,
};

/// Relay whose peers are other in-process relays.
#[derive(Debug)]
pub struct MemoryRelay {
    hub: Hub,
    runtime: WeakRuntime,
    this: Weak<MemoryRelay>,
}

impl MemoryRelay {
    /// Create a closed relay that routes inbound operations into `runtime`.
    pub fn new(runtime: &Runtime, name: impl Into<String>) -> Arc<Self> {
        let runtime = runtime.downgrade();
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            hub: Hub::new(name),
            runtime,
            this: this.clone(),
        })
    }

    /// Connect two open relays to each other, returning the peer id each one assigned.
    pub async fn link(a: &Arc<MemoryRelay>, b: &Arc<MemoryRelay>) -> Result<(PeerId, PeerId)> {
        let (for_a, for_b) = PeerLink::pair(a.name(), b.name());
        let peer_on_a = a.connect(for_a).await?;
        let peer_on_b = b.connect(for_b).await?;
        Ok((peer_on_a, peer_on_b))
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    fn name(&self) -> &str {
        self.hub.name()
    }

    async fn open(&self) -> Result<()> {
        self.hub.open();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.hub.close();
        Ok(())
    }

    fn status(&self) -> RelayStatus {
        self.hub.status()
    }

    fn watch_status(&self) -> watch::Receiver<RelayStatus> {
        self.hub.watch_status()
    }

    async fn connect(&self, link: PeerLink) -> Result<PeerId> {
        let this: Weak<dyn Relay> = self.this.clone();
        self.hub.attach(link, this)
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.hub.detach(peer)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.hub.peers()
    }

    async fn publish(&self, operation: &Operation, origin: &Origin) -> Result<()> {
        let skip = if origin.is_from(self) { origin.peer() } else { None };
        self.hub.publish(operation, skip)
    }

    async fn send_to(&self, peer: PeerId, operation: &Operation) -> Result<()> {
        self.hub.send_to(peer, operation)
    }

    async fn message_receiver(&self, raw: &str, from: PeerId) -> Result<()> {
        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };
        hub::route(&self.runtime, this, raw, from).await
    }
}
