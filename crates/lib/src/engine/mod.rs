//! The entity engine.
//!
//! A [`Runtime`] owns the registered [`Variant`]s and caches one [`Entity`] per
//! `(variant, id)`. Invoking an operation on an entity runs the variant's behavior
//! against the entity state, records the operation in the entity log and in every
//! attached source, publishes it on every attached relay, and waits until a relay
//! acknowledges it.
//!
//! Operations that arrive too far out of order trigger a replay of the whole log,
//! sorted by time, which is what lets independent operations commute.

use std::{future::Future, pin::Pin};

mod config;
mod continuation;
mod dispatch;
mod entity;
mod errors;
mod merge;
mod origin;
mod runtime;
mod throttle;
mod variant;

pub use config::{DelayWindow, EngineConfig};
pub use entity::{Entity, EntityEvent, Lifecycle};
pub use errors::EngineError;
pub use merge::{ArrayLookup, merge_state, merge_state_with};
pub use origin::Origin;
pub use runtime::{EntityOptions, Runtime, WeakRuntime};
pub use variant::{Behavior, Call, Outcome, Variant};

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
