//! In-memory source.
//!
//! Operations live in a map keyed by entity, guarded by a tokio `RwLock`. The whole
//! store can be written to and read back from a JSON file, which is how the CLI keeps
//! state across restarts when it does not use SQLite.

mod persistence;

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Source, SourceError};
use crate::{
    Result,
    engine::{Entity, Origin},
    operation::{DELETE, Operation},
};

/// Stored history of one entity.
#[derive(Debug, Default, Clone)]
pub(crate) struct EntityLog {
    pub(crate) operations: Vec<Operation>,
    wires: HashSet<String>,
}

impl EntityLog {
    pub(crate) fn from_operations(operations: Vec<Operation>) -> Self {
        let mut log = Self::default();
        for operation in operations {
            log.insert(operation);
        }
        log
    }

    /// Returns false when the operation was already stored.
    fn insert(&mut self, operation: Operation) -> bool {
        if !self.wires.insert(operation.to_wire()) {
            return false;
        }
        self.operations.push(operation);
        true
    }

    fn retain(&mut self, keep: impl Fn(&Operation) -> bool) {
        self.operations.retain(|op| keep(op));
        self.wires = self.operations.iter().map(Operation::to_wire).collect();
    }
}

fn entity_key(kind: &str, id: &str) -> String {
    format!("{kind}${id}")
}

/// Source that keeps every operation in memory.
///
/// Starts closed; call [`Source::open`] before attaching it to entities.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    open: AtomicBool,
    pub(crate) entities: RwLock<HashMap<String, EntityLog>>,
}

impl MemorySource {
    /// Create a new, empty, closed source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(false),
            entities: RwLock::new(HashMap::new()),
        }
    }

    /// Number of operations stored for one entity.
    pub async fn len(&self, kind: &str, id: &str) -> usize {
        self.entities
            .read()
            .await
            .get(&entity_key(kind, id))
            .map_or(0, |log| log.operations.len())
    }

    /// Total number of stored operations.
    pub async fn total(&self) -> usize {
        self.entities
            .read()
            .await
            .values()
            .map(|log| log.operations.len())
            .sum()
    }

    /// Write all stored operations to `path` as JSON.
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_to_file(self, path).await
    }

    /// Read a source back from a file written by [`save_to_file`](Self::save_to_file).
    ///
    /// A missing file yields an empty source. The returned source is closed.
    pub async fn load_from_file<P: AsRef<Path>>(name: impl Into<String>, path: P) -> Result<Self> {
        persistence::load_from_file(name.into(), path).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SourceError::BackendUnavailable {
                source_name: self.name.clone(),
                reason: "source is closed".to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<()> {
        if !self.open.swap(true, Ordering::AcqRel) {
            tracing::debug!(source = %self.name, "Opened memory source");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    async fn free(&self) -> Result<()> {
        self.close().await?;
        self.entities.write().await.clear();
        Ok(())
    }

    async fn append(&self, operation: &Operation, _origin: &Origin) -> Result<()> {
        self.ensure_open()?;
        let key = entity_key(operation.kind(), operation.id());
        let mut entities = self.entities.write().await;
        if entities.entry(key).or_default().insert(operation.clone()) {
            tracing::trace!(source = %self.name, operation = %operation, "Stored operation");
        }
        Ok(())
    }

    async fn load(&self, kind: &str, id: &str) -> Result<Vec<Operation>> {
        self.ensure_open()?;
        let mut operations = self
            .entities
            .read()
            .await
            .get(&entity_key(kind, id))
            .map(|log| log.operations.clone())
            .unwrap_or_default();
        operations.sort_by_key(Operation::time);
        Ok(operations)
    }

    async fn delete(&self, operation: &Operation, _origin: &Origin) -> Result<()> {
        self.ensure_open()?;
        let key = entity_key(operation.kind(), operation.id());
        let mut entities = self.entities.write().await;
        let log = entities.entry(key).or_default();
        log.retain(|op| op.method() == DELETE);
        log.insert(operation.clone());
        Ok(())
    }

    /// Drops everything but the delete markers of deleted entities, and requests for
    /// state that slipped into the store.
    async fn compress(&self, entity: &Entity) -> Result<()> {
        self.ensure_open()?;
        let mut entities = self.entities.write().await;
        let Some(log) = entities.get_mut(&entity_key(entity.kind(), entity.id())) else {
            return Ok(());
        };
        let before = log.operations.len();
        if log.operations.iter().any(|op| op.method() == DELETE) {
            log.retain(|op| op.method() == DELETE);
        } else {
            log.retain(|op| !op.is_sync_request());
        }
        log.operations.sort_by_key(Operation::time);
        tracing::debug!(
            source = %self.name,
            kind = entity.kind(),
            id = entity.id(),
            removed = before - log.operations.len(),
            "Compressed entity log"
        );
        Ok(())
    }
}
