//! TCP relay.
//!
//! Each message is one wire-format operation terminated by `\n`. A relay can listen
//! for incoming connections (server fan-in, one peer per client) and dial out to an
//! upstream relay; both sides end up as ordinary peers of the same relay.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::{mpsc, watch},
    task::JoinHandle,
};

use super::{Hub, PeerId, PeerLink, Relay, RelayError, RelayStatus, hub};
use crate::{
    Result,
    engine::{Origin, Runtime, WeakRuntime},
    operation::Operation,
};

const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Relay speaking newline-delimited wire text over TCP.
#[derive(Debug)]
pub struct TcpRelay {
    hub: Hub,
    runtime: WeakRuntime,
    this: Weak<TcpRelay>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TcpRelay {
    /// Create a closed relay that routes inbound operations into `runtime`.
    pub fn new(runtime: &Runtime, name: impl Into<String>) -> Arc<Self> {
        let runtime = runtime.downgrade();
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            hub: Hub::new(name),
            runtime,
            this: this.clone(),
            listener: Mutex::new(None),
        })
    }

    /// Accept connections on `addr`, each becoming a peer. Returns the bound address.
    ///
    /// The relay must be open.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        if self.status() != RelayStatus::Open {
            return Err(self.unavailable("relay is closed"));
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Io { source: e })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RelayError::Io { source: e })?;
        tracing::info!(relay = self.name(), %local_addr, "Listening for peers");

        let this = self.this.clone();
        let task = tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(accepted) => {
                        failures = 0;
                        accepted
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let delay = accept_backoff(failures);
                        tracing::warn!(error = %e, failures, delay_ms = delay.as_millis() as u64, "Failed to accept connection");
                        // Errors such as EMFILE persist; retrying at once would spin.
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };
                let Some(relay) = this.upgrade() else { break };
                let link = stream_link(stream, remote.to_string());
                if let Err(e) = relay.connect(link).await {
                    tracing::warn!(relay = relay.name(), %remote, error = %e, "Rejected peer");
                }
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(local_addr)
    }

    /// Connect to a listening relay. The remote becomes a peer of this relay.
    ///
    /// Returns `BackendUnavailable` when the remote cannot be reached.
    pub async fn dial(&self, addr: impl ToSocketAddrs) -> Result<PeerId> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| self.unavailable(&e.to_string()))?;
        let label = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "upstream".to_string());
        tracing::info!(relay = self.name(), remote = %label, "Dialed upstream");
        self.connect(stream_link(stream, label)).await
    }

    fn unavailable(&self, reason: &str) -> crate::Error {
        RelayError::BackendUnavailable {
            relay: self.name().to_string(),
            reason: reason.to_string(),
        }
        .into()
    }
}

/// Delay before retrying after the `failures`-th consecutive accept error: 10ms,
/// doubling up to one second.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(7);
    Duration::from_millis(10u64 << exponent).min(ACCEPT_BACKOFF_MAX)
}

/// Turn a socket into a [`PeerLink`], with one task per direction.
fn stream_link(stream: TcpStream, label: String) -> PeerLink {
    let (read_half, mut write_half) = stream.into_split();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => {
                    if inbound_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Peer read failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(mut message) = outbound_rx.recv().await {
            message.push('\n');
            if let Err(e) = write_half.write_all(message.as_bytes()).await {
                tracing::debug!(error = %e, "Peer write failed");
                break;
            }
        }
    });

    PeerLink {
        outbound: outbound_tx,
        inbound: inbound_rx,
        label,
    }
}

#[async_trait]
impl Relay for TcpRelay {
    fn name(&self) -> &str {
        self.hub.name()
    }

    async fn open(&self) -> Result<()> {
        self.hub.open();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
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
