//! SQLite source backed by sqlx.
//!
//! Operations are stored one row per operation with each field in its own column
//! (see [`schema`]). The connection goes through sqlx's `AnyPool` so the same code
//! path serves file databases and shared-cache in-memory databases used by tests.

pub mod schema;

use std::fmt;

use async_trait::async_trait;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

use super::{Source, SourceError};
use crate::{
    Result,
    engine::{Entity, Origin},
    operation::{DELETE, Operation},
};

/// Extension trait for sqlx Result types to simplify error handling.
pub(crate) trait SqlxResultExt<T> {
    /// Convert sqlx error to SourceError with context message.
    fn sql_context(self, context: &str) -> Result<T>;
}

impl<T> SqlxResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn sql_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            SourceError::SqlxError {
                reason: format!("{context}: {e}"),
                source: Some(e),
            }
            .into()
        })
    }
}

type OperationRow = (String, String, i64, i64, String, String, String);

/// Source persisting operations in SQLite.
pub struct SqliteSource {
    name: String,
    pool: AnyPool,
}

impl fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteSource")
            .field("name", &self.name)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl SqliteSource {
    /// Open (creating if needed) a SQLite database file.
    pub async fn open_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        // mode=rwc: read-write-create
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        Self::connect(&url).await
    }

    /// Connect using a sqlx SQLite URL.
    ///
    /// Connection failures are reported as `BackendUnavailable`.
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let is_in_memory = url.contains("mode=memory");

        // An in-memory database disappears with its last connection, so keep one alive.
        let options = if is_in_memory {
            AnyPoolOptions::new()
                .max_connections(5)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(5)
        };
        let pool = options
            .connect(url)
            .await
            .map_err(|e| SourceError::BackendUnavailable {
                source_name: "sqlite".to_string(),
                reason: e.to_string(),
            })?;

        let pragmas = if is_in_memory {
            "PRAGMA busy_timeout = 5000;"
        } else {
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;"
        };
        sqlx::query(pragmas)
            .execute(&pool)
            .await
            .sql_context("Failed to configure SQLite")?;

        schema::initialize(&pool).await?;

        Ok(Self {
            name: "sqlite".to_string(),
            pool,
        })
    }

    /// A private in-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self> {
        // Shared cache so every pooled connection sees the same database; the unique
        // name keeps separate sources apart.
        let unique_id = uuid::Uuid::new_v4();
        Self::connect(&format!("sqlite:file:mem_{unique_id}?mode=memory&cache=shared")).await
    }

    /// Rename the source as it appears in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of operations stored for one entity.
    pub async fn len(&self, kind: &str, id: &str) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM operations WHERE kind = $1 AND entity_id = $2")
                .bind(kind)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .sql_context("Failed to count operations")?;
        Ok(count as usize)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(SourceError::BackendUnavailable {
                source_name: self.name.clone(),
                reason: "connection pool is closed".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn purge_except_deletes(&self, kind: &str, id: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM operations WHERE kind = $1 AND entity_id = $2 AND method != $3",
        )
        .bind(kind)
        .bind(id)
        .bind(DELETE)
        .execute(&self.pool)
        .await
        .sql_context("Failed to purge operations")?;
        Ok(result.rows_affected())
    }
}

fn row_to_operation(row: OperationRow) -> Result<Operation> {
    let (kind, id, version, time, author, method, params) = row;
    let params = serde_json::from_str(&params).map_err(|e| SourceError::CorruptOperation {
        reason: format!("params of {kind}${id}: {e}"),
    })?;
    let time = u64::try_from(time).map_err(|_| SourceError::CorruptOperation {
        reason: format!("negative time {time} on {kind}${id}"),
    })?;
    Operation::builder(kind, id)
        .version(version)
        .time(time)
        .author(author)
        .method(method)
        .params(params)
        .build()
}

#[async_trait]
impl Source for SqliteSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn append(&self, operation: &Operation, _origin: &Origin) -> Result<()> {
        self.ensure_open()?;
        // SQLite integers are signed; larger times would sort wrong.
        let time = i64::try_from(operation.time()).map_err(|_| SourceError::OutOfRange {
            source_name: self.name.clone(),
            field: "time",
            value: operation.time().to_string(),
        })?;
        let params = serde_json::to_string(operation.params())
            .map_err(|e| SourceError::SerializationFailed { source: e })?;
        sqlx::query(
            "INSERT OR IGNORE INTO operations (wire, kind, entity_id, version, time, author, method, params)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(operation.to_wire())
        .bind(operation.kind())
        .bind(operation.id())
        .bind(operation.version())
        .bind(time)
        .bind(operation.author())
        .bind(operation.method())
        .bind(params)
        .execute(&self.pool)
        .await
        .sql_context("Failed to append operation")?;
        Ok(())
    }

    async fn load(&self, kind: &str, id: &str) -> Result<Vec<Operation>> {
        self.ensure_open()?;
        let rows: Vec<OperationRow> = sqlx::query_as(
            "SELECT kind, entity_id, version, time, author, method, params
             FROM operations WHERE kind = $1 AND entity_id = $2 ORDER BY time",
        )
        .bind(kind)
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .sql_context("Failed to load operations")?;
        rows.into_iter().map(row_to_operation).collect()
    }

    async fn delete(&self, operation: &Operation, origin: &Origin) -> Result<()> {
        self.ensure_open()?;
        let removed = self
            .purge_except_deletes(operation.kind(), operation.id())
            .await?;
        tracing::debug!(
            source = %self.name,
            kind = operation.kind(),
            id = operation.id(),
            removed,
            "Purged deleted entity"
        );
        self.append(operation, origin).await
    }

    async fn compress(&self, entity: &Entity) -> Result<()> {
        self.ensure_open()?;
        let (deletes,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM operations WHERE kind = $1 AND entity_id = $2 AND method = $3",
        )
        .bind(entity.kind())
        .bind(entity.id())
        .bind(DELETE)
        .fetch_one(&self.pool)
        .await
        .sql_context("Failed to inspect operations")?;

        if deletes > 0 {
            self.purge_except_deletes(entity.kind(), entity.id()).await?;
        } else {
            sqlx::query(
                "DELETE FROM operations WHERE kind = $1 AND entity_id = $2 AND method = 'sync' AND params = 'null'",
            )
            .bind(entity.kind())
            .bind(entity.id())
            .execute(&self.pool)
            .await
            .sql_context("Failed to compress operations")?;
        }
        Ok(())
    }
}
