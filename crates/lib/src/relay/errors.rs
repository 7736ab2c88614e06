//! Error types for relays.

use thiserror::Error;

use super::PeerId;

/// Errors raised by [`Relay`](super::Relay) implementations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay is closed or its remote end could not be reached.
    #[error("Relay {relay} unavailable: {reason}")]
    BackendUnavailable {
        /// Name of the relay
        relay: String,
        /// Why it is unavailable
        reason: String,
    },

    /// No peer with this id is connected.
    #[error("Relay {relay} has no peer {peer}")]
    PeerNotFound {
        /// Name of the relay
        relay: String,
        /// The unknown peer
        peer: PeerId,
    },

    /// Network I/O failed.
    #[error("Relay I/O error")]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl RelayError {
    /// Check if the relay or its remote could not be reached.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, RelayError::BackendUnavailable { .. })
    }

    /// Check if a peer was unknown.
    pub fn is_peer_not_found(&self) -> bool {
        matches!(self, RelayError::PeerNotFound { .. })
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, RelayError::Io { .. })
    }
}

impl From<RelayError> for crate::Error {
    fn from(err: RelayError) -> Self {
        crate::Error::Relay(err)
    }
}
