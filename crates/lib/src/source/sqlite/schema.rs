//! SQL schema for [`SqliteSource`](super::SqliteSource).
//!
//! Every field of an operation is stored in its own column so that histories can be
//! queried per entity and ordered by time without parsing. The wire text is the
//! primary key, which makes appends idempotent.

use sqlx::AnyPool;

use super::SqlxResultExt;
use crate::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// SQL statements to create the schema tables.
pub const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version BIGINT PRIMARY KEY
    )",
    // params holds JSON text, 'null' when the operation has none
    "CREATE TABLE IF NOT EXISTS operations (
        wire TEXT PRIMARY KEY NOT NULL,
        kind TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        version BIGINT NOT NULL,
        time BIGINT NOT NULL,
        author TEXT NOT NULL,
        method TEXT NOT NULL,
        params TEXT NOT NULL
    )",
];

/// SQL statements to create indexes.
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_operations_entity ON operations(kind, entity_id, time)",
];

/// Create tables and indexes, and record the schema version on a fresh database.
pub async fn initialize(pool: &AnyPool) -> Result<()> {
    for statement in CREATE_TABLES.iter().chain(CREATE_INDEXES) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .sql_context("Failed to create schema")?;
    }

    let current: Option<(i64,)> =
        sqlx::query_as("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .sql_context("Failed to read schema version")?;

    if current.is_none() {
        sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
            .bind(SCHEMA_VERSION)
            .execute(pool)
            .await
            .sql_context("Failed to record schema version")?;
    }
    Ok(())
}
