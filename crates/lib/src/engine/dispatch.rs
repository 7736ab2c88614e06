//! Operation dispatch.
//!
//! Every operation an entity handles goes through [`dispatch`]: local calls,
//! operations pushed by sources and relays, and stored history being restored. The
//! entity lock is held only while the operation is applied; storage and network
//! steps run after it is released, so other operations may interleave with them.
//!
//! Steps, in order:
//!
//! 1. Tombstoned entities ignore everything.
//! 2. Local calls get a fresh operation stamped with the next version and the clock.
//! 3. Operations already in the log are dropped. When one arrives from a relay it is
//!    an acknowledgment and resolves the matching continuation.
//! 4. A local operation that will be published registers a continuation.
//! 5. The behavior runs and may rewrite the params of an operation produced here.
//! 6. The operation is logged and an [`EntityEvent`] is emitted. An operation older
//!    than the newest applied one (minus the stale tolerance) schedules a replay.
//! 7. Unless local-only, the operation is appended to every source but the one it came
//!    from, delivered to every source, published on every relay and, when it came
//!    from a relay peer, echoed back to that peer as an acknowledgment.
//! 8. The behavior task and the continuation are awaited. Failures are collected;
//!    nothing already applied or stored is rolled back.

use std::sync::Arc;

use serde_json::Value;

use super::{
    BoxFuture, Entity, EngineError, EntityEvent, Origin, Variant,
    entity::EntityState,
    merge,
    variant::{Call, Handler},
};
use crate::{
    Result,
    operation::{Operation, SYNC},
    relay::Relay,
    source::Source,
};

/// What to dispatch.
pub(crate) enum Input {
    /// A local call; the operation is built here.
    New { method: String, params: Value },
    /// An operation that already exists.
    Existing(Operation),
}

/// Side effects of applying one operation, run after the lock is released.
#[derive(Default)]
pub(crate) struct Effects {
    pub(crate) task: Option<BoxFuture<'static, Result<()>>>,
    pub(crate) rewrite: Option<Value>,
    /// Answer the relay that asked for state.
    pub(crate) respond: bool,
    pub(crate) compress: bool,
    pub(crate) deleted: bool,
}

/// Apply one operation to the locked state.
///
/// Shared by dispatch and replay. Never touches the log.
pub(crate) fn apply(
    variant: &Variant,
    st: &mut EntityState,
    operation: &Operation,
    origin: &Origin,
) -> Result<Effects> {
    let handler = variant
        .handler(operation.method())
        .cloned()
        .ok_or_else(|| EngineError::InvalidOperation {
            reason: format!("{} has no operation {}", variant.name(), operation.method()),
        })?;

    let mut effects = Effects::default();
    match handler {
        Handler::Sync => {
            let params = operation.params();
            if let Some(state) = params.get("state") {
                if params.get("merge").and_then(Value::as_bool) == Some(true) {
                    merge::merge_state(&mut st.state, state);
                } else {
                    st.state = state.clone();
                }
                if let Some(version) = params.get("version").and_then(Value::as_i64) {
                    st.version = st.version.max(version);
                }
                effects.compress = true;
            } else if operation.is_sync_request() && origin.is_relay() && st.sources.is_empty() {
                // With sources attached, each source answers after restoring.
                effects.respond = true;
            }
        }
        Handler::Delete => {
            st.tombstone = true;
            effects.deleted = true;
        }
        Handler::Custom(behavior) => {
            let mut call = Call {
                operation,
                origin,
                state: &mut st.state,
                author: &st.author,
            };
            let outcome = behavior(&mut call)?;
            effects.task = outcome.task;
            effects.rewrite = outcome.params;
        }
    }
    if !operation.is_sync_request() {
        st.version = st.version.max(operation.version());
    }
    Ok(effects)
}

/// Everything the unlocked half of a dispatch needs.
struct Prepared {
    operation: Operation,
    effects: Effects,
    stale: bool,
    local_only: bool,
    continuation: Option<super::continuation::Continuation>,
    sources: Vec<Arc<dyn Source>>,
    relays: Vec<Arc<dyn Relay>>,
}

pub(crate) fn dispatch<'a>(
    entity: &'a Entity,
    input: Input,
    origin: Origin,
    local_only: bool,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(run(entity, input, origin, local_only))
}

async fn run(entity: &Entity, input: Input, origin: Origin, local_only: bool) -> Result<()> {
    let Some(prepared) = prepare(entity, input, &origin, local_only)? else {
        return Ok(());
    };
    let Prepared {
        operation,
        effects,
        stale,
        local_only,
        continuation,
        sources,
        relays,
    } = prepared;
    let inner = &entity.inner;
    let method = operation.method().to_string();
    let hash = operation.continuation_hash();
    let is_request = operation.is_sync_request();

    if stale {
        tracing::debug!(kind = %inner.kind, id = %inner.id, %hash, "Stale operation, scheduling replay");
        entity.resolve_state();
    }

    let mut failures: Vec<crate::Error> = Vec::new();
    if !local_only {
        if !is_request {
            for source in &sources {
                if origin.is_from(&**source) {
                    continue;
                }
                if let Err(e) = source.append(&operation, &origin).await {
                    tracing::warn!(source = source.name(), %hash, error = %e, "Append failed");
                    failures.push(e);
                }
            }
        }
        for source in &sources {
            if let Err(e) = source.deliver(&operation, &origin, entity).await {
                tracing::warn!(source = source.name(), %hash, error = %e, "Delivery failed");
                failures.push(e);
            }
        }
        // Requests for state stop at the first hop.
        if !(is_request && origin.is_relay()) {
            for relay in &relays {
                if let Err(e) = relay.publish(&operation, &origin).await {
                    tracing::warn!(relay = relay.name(), %hash, error = %e, "Publish failed");
                    failures.push(e);
                }
            }
        }
        if effects.respond {
            if let Err(e) = entity.respond_sync(&operation, &origin).await {
                failures.push(e);
            }
        }
        if let Origin::Relay {
            relay,
            peer: Some(peer),
        } = &origin
        {
            if !is_request {
                tracing::trace!(relay = relay.name(), peer, %hash, "Acknowledging operation");
                if let Err(e) = relay.send_to(*peer, &operation).await {
                    failures.push(e);
                }
            }
        }
    }

    if effects.compress {
        entity.compress();
    }
    if let Some(task) = effects.task {
        if let Err(e) = task.await {
            failures.push(e);
        }
    }
    if let Some(continuation) = continuation {
        if failures.is_empty() {
            if let Err(e) = inner
                .continuations
                .wait(continuation, inner.config.continuation_timeout())
                .await
            {
                failures.push(e);
            }
        } else {
            inner.continuations.cancel(&hash);
        }
        inner.lock().sync_requests.remove(&hash);
    }
    if effects.deleted {
        entity.free(inner.config.free_delay());
    }

    match failures.len() {
        0 => {
            tracing::trace!(kind = %inner.kind, id = %inner.id, %method, %hash, "Dispatched operation");
            Ok(())
        }
        1 => Err(failures.remove(0)),
        _ => Err(EngineError::DispatchFailed { method, failures }.into()),
    }
}

/// The locked half: build, deduplicate and apply. `None` means nothing else to do.
fn prepare(
    entity: &Entity,
    input: Input,
    origin: &Origin,
    mut local_only: bool,
) -> Result<Option<Prepared>> {
    let inner = &entity.inner;
    let mut st = inner.lock();
    if st.tombstone {
        // The echo of our own delete still settles its continuation.
        if let (Input::Existing(operation), true) = (&input, origin.is_relay()) {
            if inner.continuations.resolve(&operation.continuation_hash()) {
                tracing::debug!(kind = %inner.kind, id = %inner.id, "Delete acknowledged");
                return Ok(None);
            }
        }
        tracing::trace!(kind = %inner.kind, id = %inner.id, "Entity is tombstoned, ignoring operation");
        return Ok(None);
    }

    let (mut operation, produced) = match input {
        Input::New { method, params } => {
            // A request for state does not change anything, so it takes no version.
            let version = if method == SYNC && params.is_null() {
                st.version
            } else {
                st.version + 1
            };
            let operation = Operation::builder(inner.kind.as_str(), inner.id.as_str())
                .version(version)
                .time(inner.clock.now_millis())
                .author(st.author.as_str())
                .method(method)
                .params(params)
                .build()?;
            (operation, true)
        }
        Input::Existing(operation) => (operation, false),
    };
    let hash = operation.continuation_hash();
    let is_request = operation.is_sync_request();

    if st.seen.contains(&operation.to_wire()) {
        if origin.is_relay() && inner.continuations.resolve(&hash) {
            tracing::debug!(kind = %inner.kind, id = %inner.id, %hash, "Operation acknowledged");
        } else {
            tracing::trace!(kind = %inner.kind, id = %inner.id, %hash, "Dropping duplicate operation");
        }
        return Ok(None);
    }

    // An answer to one of our sync requests reuses the request's identity.
    let answer = origin.is_relay()
        && operation.method() == SYNC
        && operation.has_params()
        && st.sync_requests.contains(&hash);
    if answer {
        local_only = true;
    }

    let stale = !is_request
        && operation.time().saturating_add(inner.config.stale_tolerance_ms) < st.last_operation_time;
    if !is_request {
        st.last_operation_time = st.last_operation_time.max(operation.time());
    }

    let continuation = if origin.is_local() && !local_only && !st.relays.is_empty() {
        if is_request {
            st.sync_requests.insert(hash.clone());
        }
        Some(inner.continuations.register(hash.clone()))
    } else {
        None
    };

    let effects = match apply(&inner.variant, &mut st, &operation, origin) {
        Ok(effects) => effects,
        Err(e) => {
            if continuation.is_some() {
                inner.continuations.cancel(&hash);
                st.sync_requests.remove(&hash);
            }
            tracing::debug!(kind = %inner.kind, id = %inner.id, %hash, error = %e, "Behavior failed");
            return Err(e);
        }
    };
    if let Some(params) = effects.rewrite.clone() {
        if produced {
            operation.set_params(params);
        }
    }

    if !is_request {
        st.seen.insert(operation.to_wire());
        st.log.push(operation.clone());
    }
    if answer {
        st.sync_requests.remove(&hash);
        inner.continuations.resolve(&hash);
        tracing::debug!(kind = %inner.kind, id = %inner.id, %hash, "Applied sync answer");
    }
    let _ = inner.events.send(EntityEvent {
        method: operation.method().to_string(),
        params: operation.params().clone(),
        operation: operation.clone(),
        origin: origin.clone(),
    });

    Ok(Some(Prepared {
        operation,
        effects,
        stale,
        local_only,
        continuation,
        sources: st.sources.clone(),
        relays: st.relays.clone(),
    }))
}
