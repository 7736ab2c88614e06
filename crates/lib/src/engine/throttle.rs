//! Named debounce timers.
//!
//! The first request for a name arms a timer `min` from now. Requests that arrive
//! while it is armed are absorbed and push the deadline out to `min` after
//! themselves, but never past `max` after the first request. When the deadline
//! passes the slot is cleared and the first request's callback runs once.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::time::Instant;

use super::DelayWindow;

pub(crate) type Fire = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Slot {
    first: Instant,
    deadline: Instant,
    max: std::time::Duration,
}

#[derive(Default)]
pub(crate) struct Throttle {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Throttle {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a run of `fire` under `name`. Returns false when the request was
    /// absorbed by a pending one, in which case `fire` is dropped unpolled.
    pub(crate) fn request(self: &Arc<Self>, name: &str, window: DelayWindow, fire: Fire) -> bool {
        let now = Instant::now();
        {
            let mut slots = self.lock();
            if let Some(slot) = slots.get_mut(name) {
                slot.deadline = (now + window.min).min(slot.first + slot.max);
                tracing::trace!(throttle = name, "Absorbed throttled request");
                return false;
            }
            slots.insert(
                name.to_string(),
                Slot {
                    first: now,
                    deadline: now + window.min,
                    max: window.max,
                },
            );
        }

        let throttle = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                let Some(deadline) = throttle.lock().get(&name).map(|slot| slot.deadline) else {
                    return;
                };
                tokio::time::sleep_until(deadline).await;
                if throttle.take_if_due(&name) {
                    break;
                }
            }
            tracing::trace!(throttle = %name, "Throttled callback firing");
            fire.await;
        });
        true
    }

    fn take_if_due(&self, name: &str) -> bool {
        let mut slots = self.lock();
        match slots.get(name) {
            Some(slot) if slot.deadline <= Instant::now() => {
                slots.remove(name);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.lock();
        let mut names: Vec<&String> = slots.keys().collect();
        names.sort();
        f.debug_struct("Throttle").field("pending", &names).finish()
    }
}
