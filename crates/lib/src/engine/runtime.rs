//! Runtime: variant registry and entity identity cache.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak},
};

use handle_trait::Handle;

use super::{EngineConfig, EngineError, Entity, Origin, Variant, variant::push_unique};
use crate::{
    Clock, Result, SystemClock,
    operation::{self, Operation},
    relay::Relay,
    source::Source,
};

type EntityKey = (String, String);

pub(crate) struct RuntimeInner {
    author: String,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    variants: RwLock<HashMap<String, Arc<Variant>>>,
    entities: Mutex<HashMap<EntityKey, Entity>>,
    /// Entities that were deleted and freed. They are never brought back.
    graveyard: Mutex<HashSet<EntityKey>>,
}

impl std::fmt::Debug for RuntimeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInner")
            .field("author", &self.author)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Per-entity options layered on top of the variant defaults.
#[derive(Debug, Clone, Default)]
pub struct EntityOptions {
    /// Author of the operations this entity produces.
    pub author: Option<String>,
    /// Sources attached in addition to the variant's.
    pub sources: Vec<Arc<dyn Source>>,
    /// Relays attached in addition to the variant's.
    pub relays: Vec<Arc<dyn Relay>>,
}

impl EntityOptions {
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        push_unique(&mut self.sources, source);
        self
    }

    pub fn relay(mut self, relay: Arc<dyn Relay>) -> Self {
        push_unique(&mut self.relays, relay);
        self
    }
}

/// Owner of the registered variants and of the live entities.
///
/// Cloning is cheap and yields a handle to the same runtime. Within one runtime there
/// is at most one live [`Entity`] per `(variant, id)`: asking for the same pair twice
/// returns the same instance until the entity is deleted and freed.
///
/// ```
/// use flock::{EngineConfig, Outcome, Runtime, Variant};
///
/// # #[tokio::main]
/// # async fn main() -> flock::Result<()> {
/// let runtime = Runtime::new(EngineConfig::default());
/// let mut crow = Variant::new("Crow");
/// crow.define_operation("fly", |call| {
///     let params = call.params().clone();
///     call.merge_state(&params);
///     Ok(Outcome::done())
/// })?;
/// runtime.register(crow)?;
///
/// let a1 = runtime.entity("Crow", "A1")?;
/// a1.call("fly", serde_json::json!({"x": 0.4, "y": 0.7})).await?;
/// assert_eq!(a1.state()["x"], 0.4);
/// assert!(a1.same_instance(&runtime.entity("Crow", "A1")?));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Handle)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Weak handle to a [`Runtime`], held by relays so they do not keep it alive.
#[derive(Clone, Debug, Handle)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    /// `None` once every strong handle is gone.
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Runtime {
    /// Create a runtime stamping operations with the system clock.
    ///
    /// Entities default to a random author unique to this runtime.
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, Arc::new(SystemClock))
    }

    /// Create a runtime with a custom clock.
    #[cfg(any(test, feature = "testing"))]
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, clock)
    }

    fn build(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let author = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!(%author, "Created runtime");
        Self {
            inner: Arc::new(RuntimeInner {
                author,
                clock,
                config,
                variants: RwLock::new(HashMap::new()),
                entities: Mutex::new(HashMap::new()),
                graveyard: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Default author of entities created by this runtime.
    pub fn author(&self) -> &str {
        &self.inner.author
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn entities_lock(&self) -> MutexGuard<'_, HashMap<EntityKey, Entity>> {
        self.inner
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn graveyard_lock(&self) -> MutexGuard<'_, HashSet<EntityKey>> {
        self.inner
            .graveyard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a variant under its name.
    ///
    /// Fails with `DuplicateVariant` when the name is taken.
    pub fn register(&self, variant: Variant) -> Result<()> {
        operation::check_field("type", variant.name())?;
        if variant.name().is_empty() {
            return Err(EngineError::InvalidOperation {
                reason: "variant name is empty".to_string(),
            }
            .into());
        }
        let mut variants = self
            .inner
            .variants
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if variants.contains_key(variant.name()) {
            return Err(EngineError::DuplicateVariant {
                name: variant.name().to_string(),
            }
            .into());
        }
        tracing::debug!(
            variant = variant.name(),
            base = variant.base(),
            "Registered variant"
        );
        variants.insert(variant.name().to_string(), Arc::new(variant));
        Ok(())
    }

    pub fn variant(&self, name: &str) -> Result<Arc<Variant>> {
        self.inner
            .variants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| {
                EngineError::UnknownVariant {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Fetch the entity `(kind, id)`, creating it with the variant defaults when it is
    /// not live yet.
    pub fn entity(&self, kind: &str, id: &str) -> Result<Entity> {
        self.entity_with(kind, id, EntityOptions::default())
    }

    /// Like [`entity`](Self::entity), with extra options.
    ///
    /// For an entity that is already live only the extra sources and relays are
    /// applied; its author never changes.
    pub fn entity_with(&self, kind: &str, id: &str, options: EntityOptions) -> Result<Entity> {
        operation::check_field("id", id)?;
        let variant = self.variant(kind)?;
        let key = (kind.to_string(), id.to_string());

        if self.graveyard_lock().contains(&key) {
            tracing::trace!(kind, id, "Entity was deleted, returning a tombstone");
            return Ok(Entity::tombstone(self, variant, id));
        }

        let mut entities = self.entities_lock();
        if let Some(entity) = entities.get(&key) {
            for source in options.sources {
                entity.add_source(source);
            }
            for relay in options.relays {
                entity.add_relay(relay);
            }
            return Ok(entity.clone());
        }

        let author = options
            .author
            .or_else(|| variant.author().map(str::to_string))
            .unwrap_or_else(|| self.inner.author.clone());
        operation::check_field("author", &author)?;
        let mut sources = variant.sources().to_vec();
        for source in options.sources {
            push_unique(&mut sources, source);
        }
        let mut relays = variant.relays().to_vec();
        for relay in options.relays {
            push_unique(&mut relays, relay);
        }

        let entity = Entity::new(self, variant, id, author, sources, relays);
        tracing::debug!(kind, id, author = entity.author(), "Created entity");
        entities.insert(key, entity.clone());
        Ok(entity)
    }

    /// Create an entity with a random id.
    pub fn create(&self, kind: &str) -> Result<Entity> {
        self.entity(kind, &uuid::Uuid::new_v4().to_string())
    }

    /// The live entity `(kind, id)`, without creating it.
    pub fn cached(&self, kind: &str, id: &str) -> Option<Entity> {
        self.entities_lock()
            .get(&(kind.to_string(), id.to_string()))
            .cloned()
    }

    /// Whether `(kind, id)` was deleted and freed in this runtime.
    pub fn is_tombstoned(&self, kind: &str, id: &str) -> bool {
        self.graveyard_lock()
            .contains(&(kind.to_string(), id.to_string()))
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route an operation that arrived from a source or relay to its entity,
    /// creating the entity on first reference.
    ///
    /// Operations for freed entities are dropped.
    pub async fn receive(&self, operation: Operation, origin: Origin) -> Result<()> {
        if self.is_tombstoned(operation.kind(), operation.id()) {
            tracing::trace!(operation = %operation, "Dropping operation for deleted entity");
            return Ok(());
        }
        let entity = self.entity(operation.kind(), operation.id())?;
        entity.invoke(operation, origin).await
    }

    /// Remove a freed entity from the cache and remember it as deleted.
    pub(crate) fn evict(&self, kind: &str, id: &str) {
        let key = (kind.to_string(), id.to_string());
        self.entities_lock().remove(&key);
        self.graveyard_lock().insert(key);
        tracing::info!(kind, id, "Freed entity");
    }
}
