//! Pending acknowledgments of locally produced operations.
//!
//! A continuation is a one-shot completion handle keyed by the operation's
//! continuation hash. It resolves when a relay echoes the operation back and fails
//! when the window closes first. Either way the entry leaves the map, so no
//! listener outlives its operation.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::oneshot;

use super::EngineError;
use crate::Result;

#[derive(Debug, Default)]
pub(crate) struct Continuations {
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

/// Receiving half of one registered continuation.
#[derive(Debug)]
pub(crate) struct Continuation {
    hash: String,
    receiver: oneshot::Receiver<()>,
}

impl Continuations {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a continuation. A second registration for the same hash replaces the
    /// first, whose waiter then sees a cancellation.
    pub(crate) fn register(&self, hash: String) -> Continuation {
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(hash.clone(), sender);
        Continuation { hash, receiver }
    }

    /// Resolve the continuation for `hash`. Returns false when none is pending.
    pub(crate) fn resolve(&self, hash: &str) -> bool {
        match self.lock().remove(hash) {
            Some(sender) => {
                // The waiter may have timed out in the meantime.
                let _ = sender.send(());
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel(&self, hash: &str) {
        self.lock().remove(hash);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Wait for `continuation`, removing its entry if the window closes.
    pub(crate) async fn wait(&self, continuation: Continuation, timeout: Duration) -> Result<()> {
        let Continuation { hash, receiver } = continuation;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EngineError::ContinuationCancelled { hash }.into()),
            Err(_) => {
                self.cancel(&hash);
                tracing::warn!(%hash, timeout_ms = timeout.as_millis() as u64, "Continuation timed out");
                Err(EngineError::ContinuationTimeout {
                    hash,
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }
}
