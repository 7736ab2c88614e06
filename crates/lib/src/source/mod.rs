//! Storage collaborators for entity operations.
//!
//! A [`Source`] durably records the operations of many entities and can hand an
//! entity's history back to it. Entities hold sources as `Arc<dyn Source>` and
//! share them freely; a source must therefore tolerate interleaved calls for
//! different entities.
//!
//! Two implementations are bundled:
//!
//! - [`MemorySource`]: keeps operations in memory, with optional JSON file persistence
//! - [`SqliteSource`] (feature `sqlite`): stores operations in a SQLite database via sqlx

use std::fmt::Debug;

use async_trait::async_trait;

use crate::{
    Result,
    engine::{Entity, Origin},
    operation::{DELETE, Operation, SYNC},
};

mod errors;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use errors::SourceError;
pub use memory::MemorySource;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSource;

/// Durable or replicated storage of operations.
///
/// The engine calls [`append`](Source::append) for every operation an entity commits
/// (except the ones that came from this very source) and then
/// [`deliver`](Source::deliver), which is where a source reacts to the built-in
/// `sync` and `delete` operations.
///
/// All methods must be idempotent with respect to duplicated operations: the network
/// delivers at least once.
#[async_trait]
pub trait Source: Send + Sync + Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Make the source ready for use. Calling it on an open source is a no-op.
    ///
    /// Returns `BackendUnavailable` when the backing store cannot be reached.
    async fn open(&self) -> Result<()>;

    /// Stop accepting operations. Stored data is kept.
    async fn close(&self) -> Result<()>;

    /// Detach and release whatever the source holds.
    async fn free(&self) -> Result<()> {
        self.close().await
    }

    /// Durably record an operation. Recording the same operation twice stores it once.
    async fn append(&self, operation: &Operation, origin: &Origin) -> Result<()>;

    /// Every stored operation of one entity, oldest first.
    async fn load(&self, kind: &str, id: &str) -> Result<Vec<Operation>>;

    /// Purge an entity's stored operations, keeping its delete marker.
    async fn delete(&self, operation: &Operation, origin: &Origin) -> Result<()>;

    /// Log-compaction hook, requested by entities after they resolve their state.
    async fn compress(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    /// Engine-facing entry point for an operation that was just committed.
    ///
    /// Nothing happens for operations that came from this source. `sync` is routed to
    /// [`sync`](Source::sync) and `delete` to [`delete`](Source::delete); every other
    /// operation has already been handed to [`append`](Source::append).
    async fn deliver(&self, operation: &Operation, origin: &Origin, entity: &Entity) -> Result<()> {
        if origin.is_from(self) {
            return Ok(());
        }
        match operation.method() {
            SYNC => self.sync(operation, origin, entity).await,
            DELETE => self.delete(operation, origin).await,
            _ => Ok(()),
        }
    }

    /// Replay the entity's stored history into it without re-broadcasting, then answer
    /// a relay that asked for state.
    async fn sync(&self, operation: &Operation, origin: &Origin, entity: &Entity) -> Result<()> {
        let history = self.load(entity.kind(), entity.id()).await?;
        tracing::debug!(
            source = self.name(),
            kind = entity.kind(),
            id = entity.id(),
            count = history.len(),
            "Restoring entity from source"
        );
        entity.restore(history).await?;
        if operation.is_sync_request() && origin.is_relay() {
            entity.respond_sync(operation, origin).await?;
        }
        Ok(())
    }
}
