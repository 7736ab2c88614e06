//! Entity variants: named sets of operation behaviors.
//!
//! A variant is registered once per runtime under a unique name. Every variant
//! starts with the built-in `sync` and `delete` operations; custom operations are
//! added with [`Variant::define_operation`]. A variant can extend another one,
//! inheriting its operations, defaults and author, and replace inherited behaviors
//! with [`Variant::override_operation`].

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use serde_json::{Map, Value};

use super::{
    EngineError, Origin,
    merge::{self, ArrayLookup},
};
use crate::{
    Result,
    operation::{self, DELETE, Operation, SYNC},
    relay::Relay,
    source::Source,
};

/// Behavior of a custom operation.
///
/// Runs with the entity's state locked, so it must not block; asynchronous work goes
/// into the task of the returned [`Outcome`].
pub type Behavior = Arc<dyn Fn(&mut Call<'_>) -> Result<Outcome> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Handler {
    Sync,
    Delete,
    Custom(Behavior),
}

/// What a behavior sees while it runs.
pub struct Call<'a> {
    pub(crate) operation: &'a Operation,
    pub(crate) origin: &'a Origin,
    pub(crate) state: &'a mut Value,
    pub(crate) author: &'a str,
}

impl Call<'_> {
    /// Params of the operation, `Value::Null` when it has none.
    pub fn params(&self) -> &Value {
        self.operation.params()
    }

    /// One top-level param.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.operation.params().get(key)
    }

    pub fn operation(&self) -> &Operation {
        self.operation
    }

    pub fn origin(&self) -> &Origin {
        self.origin
    }

    /// Author of the entity applying the operation (not of the operation).
    pub fn author(&self) -> &str {
        self.author
    }

    pub fn state(&self) -> &Value {
        self.state
    }

    pub fn state_mut(&mut self) -> &mut Value {
        self.state
    }

    /// State as a JSON object, replacing any non-object state with `{}` first.
    pub fn state_object(&mut self) -> &mut Map<String, Value> {
        if !self.state.is_object() {
            *self.state = Value::Object(Map::new());
        }
        match self.state {
            Value::Object(map) => map,
            _ => unreachable!("state was just made an object"),
        }
    }

    pub fn replace_state(&mut self, state: Value) {
        *self.state = state;
    }

    pub fn merge_state(&mut self, incoming: &Value) {
        merge::merge_state(self.state, incoming);
    }

    pub fn merge_state_with(&mut self, incoming: &Value, lookup: ArrayLookup<'_>) {
        merge::merge_state_with(self.state, incoming, lookup);
    }
}

/// Result of a behavior: an optional params rewrite and an optional async task.
///
/// Rewritten params replace the operation's params before it is appended and
/// broadcast, so every replica applies the same values. The task is awaited as part
/// of the dispatch and its failure fails the caller.
#[derive(Default)]
pub struct Outcome {
    pub(crate) params: Option<Value>,
    pub(crate) task: Option<super::BoxFuture<'static, Result<()>>>,
}

impl Outcome {
    /// Nothing further to do.
    pub fn done() -> Self {
        Self::default()
    }

    pub fn rewrite_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_task<F>(mut self, task: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.task = Some(Box::pin(task));
        self
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("params", &self.params)
            .field("task", &self.task.is_some())
            .finish()
    }
}

/// A registered entity type.
#[derive(Clone)]
pub struct Variant {
    name: String,
    base: Option<String>,
    handlers: BTreeMap<String, Handler>,
    sources: Vec<Arc<dyn Source>>,
    relays: Vec<Arc<dyn Relay>>,
    author: Option<String>,
}

impl Variant {
    /// A variant with only the built-in operations.
    pub fn new(name: impl Into<String>) -> Self {
        let mut handlers = BTreeMap::new();
        handlers.insert(SYNC.to_string(), Handler::Sync);
        handlers.insert(DELETE.to_string(), Handler::Delete);
        Self {
            name: name.into(),
            base: None,
            handlers,
            sources: Vec::new(),
            relays: Vec::new(),
            author: None,
        }
    }

    /// A new variant inheriting this one's operations and defaults.
    pub fn extend(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: Some(self.name.clone()),
            ..self.clone()
        }
    }

    /// Add a custom operation.
    ///
    /// Fails with `DuplicateOperation` when the name exists, inherited and built-in
    /// operations included, and with `ReservedOperationName` for `operation` or a
    /// name containing a wire delimiter.
    pub fn define_operation<F>(&mut self, name: &str, behavior: F) -> Result<&mut Self>
    where
        F: Fn(&mut Call<'_>) -> Result<Outcome> + Send + Sync + 'static,
    {
        if name == "operation" || name.is_empty() || operation::check_field("method", name).is_err()
        {
            return Err(EngineError::ReservedOperationName {
                name: name.to_string(),
            }
            .into());
        }
        if self.handlers.contains_key(name) {
            return Err(EngineError::DuplicateOperation {
                variant: self.name.clone(),
                name: name.to_string(),
            }
            .into());
        }
        self.handlers
            .insert(name.to_string(), Handler::Custom(Arc::new(behavior)));
        Ok(self)
    }

    /// Replace the behavior of an existing custom operation, typically one inherited
    /// from the base variant. Built-in operations cannot be replaced.
    pub fn override_operation<F>(&mut self, name: &str, behavior: F) -> Result<&mut Self>
    where
        F: Fn(&mut Call<'_>) -> Result<Outcome> + Send + Sync + 'static,
    {
        match self.handlers.get_mut(name) {
            Some(handler @ Handler::Custom(_)) => {
                *handler = Handler::Custom(Arc::new(behavior));
                Ok(self)
            }
            Some(_) => Err(EngineError::ReservedOperationName {
                name: name.to_string(),
            }
            .into()),
            None => Err(EngineError::InvalidOperation {
                reason: format!("{} has no operation {name} to override", self.name),
            }
            .into()),
        }
    }

    /// Default source attached to every entity of this variant.
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        push_unique(&mut self.sources, source);
        self
    }

    /// Default relay attached to every entity of this variant.
    pub fn with_relay(mut self, relay: Arc<dyn Relay>) -> Self {
        push_unique(&mut self.relays, relay);
        self
    }

    /// Default author of operations produced by entities of this variant.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the variant this one extends.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Operation names, sorted.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub fn relays(&self) -> &[Arc<dyn Relay>] {
        &self.relays
    }

    pub(crate) fn handler(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("operations", &self.operations().collect::<Vec<_>>())
            .field("sources", &self.sources.len())
            .field("relays", &self.relays.len())
            .finish()
    }
}

/// Append unless the same object is already present.
pub(crate) fn push_unique<T: ?Sized>(list: &mut Vec<Arc<T>>, item: Arc<T>) -> bool {
    if list.iter().any(|existing| Arc::ptr_eq(existing, &item)) {
        return false;
    }
    list.push(item);
    true
}
