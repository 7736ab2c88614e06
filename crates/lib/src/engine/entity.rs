//! Replicated entities.

use std::{
    collections::HashSet,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use handle_trait::Handle;
use serde_json::{Map, Value, json};
use tokio::{sync::broadcast, task::JoinHandle};

use super::{
    DelayWindow, EngineConfig, EngineError, Origin, Runtime, Variant, WeakRuntime,
    continuation::Continuations,
    dispatch::{self, Input},
    merge::{self, ArrayLookup},
    throttle::Throttle,
    variant::push_unique,
};
use crate::{
    Clock, Result,
    operation::{DELETE, INIT_VERSION, Operation, SYNC},
    relay::Relay,
    source::Source,
};

const EVENT_CAPACITY: usize = 256;

/// Lifecycle of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No operation applied yet.
    Uninitialized,
    Active,
    /// Replaying the log.
    Resolving,
    /// Deleted. Terminal.
    Tombstoned,
}

/// Notification emitted for every operation an entity applies.
///
/// `method` doubles as the event name; subscribers interested in one operation
/// filter on it.
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub method: String,
    pub params: Value,
    pub operation: Operation,
    pub origin: Origin,
}

pub(crate) struct EntityState {
    pub(crate) author: String,
    pub(crate) state: Value,
    pub(crate) version: i64,
    pub(crate) last_operation_time: u64,
    pub(crate) tombstone: bool,
    pub(crate) resolving: bool,
    pub(crate) log: Vec<Operation>,
    /// Wire text of every logged operation.
    pub(crate) seen: HashSet<String>,
    pub(crate) sources: Vec<Arc<dyn Source>>,
    pub(crate) relays: Vec<Arc<dyn Relay>>,
    pub(crate) synced: bool,
    /// Hashes of our own pending sync requests.
    pub(crate) sync_requests: HashSet<String>,
    /// Hashes of remote sync requests already answered.
    pub(crate) answered: HashSet<String>,
    pub(crate) freed: bool,
}

pub(crate) struct EntityInner {
    pub(crate) kind: String,
    pub(crate) id: String,
    pub(crate) variant: Arc<Variant>,
    pub(crate) runtime: WeakRuntime,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<EntityState>,
    pub(crate) continuations: Continuations,
    pub(crate) events: broadcast::Sender<EntityEvent>,
    pub(crate) throttle: Arc<Throttle>,
    free_task: Mutex<Option<JoinHandle<()>>>,
}

impl EntityInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, EntityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A replicated value of a registered variant.
///
/// Obtained from [`Runtime::entity`]; clones are handles to the same entity. State is
/// only ever changed by operations, invoked locally with [`call`](Self::call) or
/// delivered by sources and relays through [`invoke`](Self::invoke).
///
/// Behaviors run with the entity locked and must not call back into the entity.
#[derive(Clone, Handle)]
pub struct Entity {
    pub(crate) inner: Arc<EntityInner>,
}

impl Entity {
    pub(crate) fn new(
        runtime: &Runtime,
        variant: Arc<Variant>,
        id: &str,
        author: String,
        sources: Vec<Arc<dyn Source>>,
        relays: Vec<Arc<dyn Relay>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(EntityInner {
                kind: variant.name().to_string(),
                id: id.to_string(),
                variant,
                runtime: runtime.downgrade(),
                clock: Arc::clone(runtime.clock()),
                config: runtime.config().clone(),
                state: Mutex::new(EntityState {
                    author,
                    state: Value::Object(Map::new()),
                    version: INIT_VERSION,
                    last_operation_time: 0,
                    tombstone: false,
                    resolving: false,
                    log: Vec::new(),
                    seen: HashSet::new(),
                    sources,
                    relays,
                    synced: false,
                    sync_requests: HashSet::new(),
                    answered: HashSet::new(),
                    freed: false,
                }),
                continuations: Continuations::default(),
                events,
                throttle: Arc::new(Throttle::default()),
                free_task: Mutex::new(None),
            }),
        }
    }

    /// Detached stand-in for an entity that was deleted and freed.
    pub(crate) fn tombstone(runtime: &Runtime, variant: Arc<Variant>, id: &str) -> Self {
        let entity = Self::new(
            runtime,
            variant,
            id,
            runtime.author().to_string(),
            Vec::new(),
            Vec::new(),
        );
        {
            let mut st = entity.inner.lock();
            st.tombstone = true;
            st.freed = true;
        }
        entity
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Variant name.
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn variant(&self) -> &Variant {
        &self.inner.variant
    }

    pub fn author(&self) -> String {
        self.inner.lock().author.clone()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> Value {
        self.inner.lock().state.clone()
    }

    pub fn version(&self) -> i64 {
        self.inner.lock().version
    }

    pub fn last_operation_time(&self) -> u64 {
        self.inner.lock().last_operation_time
    }

    pub fn is_tombstoned(&self) -> bool {
        self.inner.lock().tombstone
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let st = self.inner.lock();
        if st.tombstone {
            Lifecycle::Tombstoned
        } else if st.resolving {
            Lifecycle::Resolving
        } else if st.version == INIT_VERSION && st.log.is_empty() {
            Lifecycle::Uninitialized
        } else {
            Lifecycle::Active
        }
    }

    /// Every applied operation, in arrival order.
    pub fn log(&self) -> Vec<Operation> {
        self.inner.lock().log.clone()
    }

    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.inner.lock().sources.clone()
    }

    pub fn relays(&self) -> Vec<Arc<dyn Relay>> {
        self.inner.lock().relays.clone()
    }

    /// Attach a source. Returns false when it was already attached.
    pub fn add_source(&self, source: Arc<dyn Source>) -> bool {
        push_unique(&mut self.inner.lock().sources, source)
    }

    pub fn remove_source(&self, source: &Arc<dyn Source>) -> bool {
        let mut st = self.inner.lock();
        let before = st.sources.len();
        st.sources.retain(|existing| !Arc::ptr_eq(existing, source));
        st.sources.len() != before
    }

    /// Attach a relay. Returns false when it was already attached.
    pub fn add_relay(&self, relay: Arc<dyn Relay>) -> bool {
        push_unique(&mut self.inner.lock().relays, relay)
    }

    pub fn remove_relay(&self, relay: &Arc<dyn Relay>) -> bool {
        let mut st = self.inner.lock();
        let before = st.relays.len();
        st.relays.retain(|existing| !Arc::ptr_eq(existing, relay));
        st.relays.len() != before
    }

    /// Whether both handles point at the same entity.
    pub fn same_instance(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribe to the operations this entity applies.
    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.inner.events.subscribe()
    }

    /// Continuations still waiting for an acknowledgment.
    pub fn pending_continuations(&self) -> usize {
        self.inner.continuations.len()
    }

    /// Invoke a registered operation locally.
    ///
    /// Resolves once the behavior task finished, every attached source stored the
    /// operation and, when relays are attached, one of them acknowledged it.
    pub async fn call(&self, method: &str, params: Value) -> Result<()> {
        if !self.inner.variant.has_operation(method) {
            return Err(EngineError::InvalidOperation {
                reason: format!("{} has no operation {method}", self.inner.kind),
            }
            .into());
        }
        dispatch::dispatch(
            self,
            Input::New {
                method: method.to_string(),
                params,
            },
            Origin::Local,
            false,
        )
        .await
    }

    /// Apply an existing operation delivered by `origin`.
    pub async fn invoke(&self, operation: Operation, origin: Origin) -> Result<()> {
        self.check(&operation)?;
        dispatch::dispatch(self, Input::Existing(operation), origin, false).await
    }

    fn check(&self, operation: &Operation) -> Result<()> {
        if operation.kind() != self.inner.kind {
            return Err(EngineError::MismatchedOperation {
                field: "type",
                expected: self.inner.kind.clone(),
                actual: operation.kind().to_string(),
            }
            .into());
        }
        if operation.id() != self.inner.id {
            return Err(EngineError::MismatchedOperation {
                field: "id",
                expected: self.inner.id.clone(),
                actual: operation.id().to_string(),
            }
            .into());
        }
        if !self.inner.variant.has_operation(operation.method()) {
            return Err(EngineError::InvalidOperation {
                reason: format!("{} has no operation {}", self.inner.kind, operation.method()),
            }
            .into());
        }
        Ok(())
    }

    /// Restore from the attached sources and ask the relays for their state.
    ///
    /// With relays attached this waits for an answer, so it times out when no peer
    /// knows the entity yet.
    pub async fn sync(&self) -> Result<()> {
        self.inner.lock().synced = true;
        self.call(SYNC, Value::Null).await
    }

    /// [`sync`](Self::sync), unless this entity synced before.
    pub async fn sync_once(&self) -> Result<()> {
        if self.inner.lock().synced {
            return Ok(());
        }
        self.sync().await
    }

    /// Declare a state to every replica, the current one when `state` is `None`.
    pub async fn sync_state(&self, state: Option<Value>) -> Result<()> {
        let state = match state {
            Some(state) => state,
            None => self.state(),
        };
        self.call(SYNC, json!({ "state": state })).await
    }

    /// Delete the entity everywhere. Terminal.
    pub async fn delete(&self) -> Result<()> {
        self.call(DELETE, Value::Null).await
    }

    /// Replace the local state without producing an operation.
    pub fn replace_state(&self, state: Value) {
        self.inner.lock().state = state;
    }

    /// Merge into the local state without producing an operation.
    pub fn merge_state(&self, incoming: &Value) {
        merge::merge_state(&mut self.inner.lock().state, incoming);
    }

    pub fn merge_state_with(&self, incoming: &Value, lookup: ArrayLookup<'_>) {
        merge::merge_state_with(&mut self.inner.lock().state, incoming, lookup);
    }

    /// Apply stored operations without storing or broadcasting them again.
    ///
    /// Operations already in the log are skipped. Operations this variant cannot
    /// handle are logged and skipped.
    pub async fn restore(&self, history: Vec<Operation>) -> Result<()> {
        for operation in history {
            if let Err(e) = self.check(&operation) {
                tracing::warn!(kind = self.kind(), id = self.id(), error = %e, "Skipping stored operation");
                continue;
            }
            dispatch::dispatch(self, Input::Existing(operation), Origin::Local, true).await?;
        }
        Ok(())
    }

    /// Answer a sync request from a relay peer with the current state.
    ///
    /// Nothing is sent while the entity is uninitialized, or when this request was
    /// already answered.
    pub async fn respond_sync(&self, request: &Operation, origin: &Origin) -> Result<()> {
        let Origin::Relay {
            relay,
            peer: Some(peer),
        } = origin
        else {
            return Ok(());
        };
        let answer = {
            let mut st = self.inner.lock();
            if st.tombstone || st.version <= INIT_VERSION {
                tracing::debug!(kind = self.kind(), id = self.id(), "Not answering sync, entity uninitialized");
                return Ok(());
            }
            if !st.answered.insert(request.continuation_hash()) {
                return Ok(());
            }
            request
                .clone()
                .with_params(json!({ "state": st.state, "version": st.version }))
        };
        tracing::debug!(kind = self.kind(), id = self.id(), peer, "Answering sync request");
        relay.send_to(*peer, &answer).await
    }

    /// Schedule a replay of the log. Bursts of requests collapse into one replay.
    ///
    /// Returns false when the request was absorbed by a pending one.
    pub fn resolve_state(&self) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let window = self.inner.config.resolve_window();
        self.throttle("resolve", window, async move {
            let Some(inner) = weak.upgrade() else { return };
            let entity = Entity { inner };
            if let Err(e) = entity.resolve_state_now().await {
                tracing::warn!(kind = entity.kind(), id = entity.id(), error = %e, "State resolution failed");
            }
        })
    }

    /// Rebuild the state by replaying the whole log sorted by time.
    ///
    /// Operations sorted after a delete are not applied. A call made while a replay
    /// is running, or after the entity was freed, returns immediately.
    pub async fn resolve_state_now(&self) -> Result<()> {
        let (tasks, events, replayed) = {
            let mut st = self.inner.lock();
            // A freed entity has nothing left to replay and must stay deleted.
            if st.resolving || st.freed {
                return Ok(());
            }
            st.resolving = true;
            st.last_operation_time = 0;
            st.state = Value::Object(Map::new());
            st.tombstone = false;
            st.version = INIT_VERSION;

            let mut log = std::mem::take(&mut st.log);
            log.sort_by_key(Operation::time);
            let mut tasks = Vec::new();
            let mut events = Vec::new();
            for operation in &log {
                if st.tombstone {
                    tracing::trace!(operation = %operation, "Skipping replay after delete");
                    continue;
                }
                match dispatch::apply(&self.inner.variant, &mut st, operation, &Origin::Local) {
                    Ok(effects) => {
                        st.last_operation_time = st.last_operation_time.max(operation.time());
                        tasks.extend(effects.task);
                        events.push(EntityEvent {
                            method: operation.method().to_string(),
                            params: operation.params().clone(),
                            operation: operation.clone(),
                            origin: Origin::Local,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(operation = %operation, error = %e, "Replayed operation failed");
                    }
                }
            }
            let replayed = log.len();
            st.log = log;
            (tasks, events, replayed)
        };

        for event in events {
            let _ = self.inner.events.send(event);
        }
        tracing::debug!(kind = self.kind(), id = self.id(), replayed, "Resolved state");
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(kind = self.kind(), id = self.id(), error = %e, "Replayed behavior task failed");
            }
        }
        self.inner.lock().resolving = false;
        self.compress();
        Ok(())
    }

    /// Ask every attached source to compress this entity's log, throttled.
    pub fn compress(&self) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let window = self.inner.config.compress_window();
        self.throttle("compress", window, async move {
            let Some(inner) = weak.upgrade() else { return };
            let entity = Entity { inner };
            for source in entity.sources() {
                if let Err(e) = source.compress(&entity).await {
                    tracing::warn!(source = source.name(), kind = entity.kind(), id = entity.id(), error = %e, "Compression failed");
                }
            }
        })
    }

    /// Run `callback` once after a burst of requests under `name` settles.
    ///
    /// It fires no sooner than `window.min` after the latest request and no later
    /// than `window.max` after the first. Returns false when the request was absorbed
    /// by a pending one.
    pub fn throttle<F>(&self, name: &str, window: DelayWindow, callback: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.throttle.request(name, window, Box::pin(callback))
    }

    /// Detach from every source and relay, release the state and leave the runtime
    /// cache after `delay`. A pending free is replaced.
    pub fn free(&self, delay: Duration) {
        let mut pending = self
            .inner
            .free_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        if delay.is_zero() {
            drop(pending);
            self.release();
            return;
        }
        let weak: Weak<EntityInner> = Arc::downgrade(&self.inner);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Entity { inner }.release();
            }
        }));
    }

    fn release(&self) {
        {
            let mut st = self.inner.lock();
            if st.freed {
                return;
            }
            st.freed = true;
            st.sources.clear();
            st.relays.clear();
            st.state = Value::Object(Map::new());
            st.log.clear();
            st.seen.clear();
            st.sync_requests.clear();
            st.answered.clear();
        }
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.evict(&self.inner.kind, &self.inner.id);
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.inner.kind)
            .field("id", &self.inner.id)
            .field("version", &self.version())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
