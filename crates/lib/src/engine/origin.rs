//! Where an operation came from.

use std::fmt;
use std::sync::Arc;

use crate::{relay::PeerId, relay::Relay, source::Source};

/// The delivering party of an operation.
///
/// Dispatch uses it to avoid echoing an operation back to where it came from and to
/// decide whether an acknowledgment or a sync answer is owed.
#[derive(Clone)]
pub enum Origin {
    /// Invoked by local code on this runtime.
    Local,
    /// Pushed by a storage source.
    Source(Arc<dyn Source>),
    /// Received through a relay, from `peer` when known.
    Relay {
        relay: Arc<dyn Relay>,
        peer: Option<PeerId>,
    },
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }

    pub fn is_relay(&self) -> bool {
        matches!(self, Origin::Relay { .. })
    }

    /// Peer the operation arrived from, for relay origins.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Origin::Relay { peer, .. } => *peer,
            _ => None,
        }
    }

    /// Whether this origin is the given collaborator object.
    pub fn is_from<T: ?Sized>(&self, candidate: &T) -> bool {
        let candidate = candidate as *const T;
        match self {
            Origin::Local => false,
            Origin::Source(source) => std::ptr::addr_eq(Arc::as_ptr(source), candidate),
            Origin::Relay { relay, .. } => std::ptr::addr_eq(Arc::as_ptr(relay), candidate),
        }
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "Local"),
            Origin::Source(source) => write!(f, "Source({})", source.name()),
            Origin::Relay { relay, peer } => match peer {
                Some(peer) => write!(f, "Relay({}, peer {peer})", relay.name()),
                None => write!(f, "Relay({})", relay.name()),
            },
        }
    }
}
