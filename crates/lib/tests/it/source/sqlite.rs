//! Tests specific to `SqliteSource`.

use flock::{Origin, Source, source::SqliteSource};
use serde_json::{Value, json};

use crate::helpers::{operation, setup_runtime};

#[tokio::test]
async fn test_fields_survive_storage() {
    let source = SqliteSource::in_memory().await.unwrap();
    let op = operation("Crow", "A1", 4, 1_700_000_000_000, "fly", json!({"x": 0.4, "nested": [1, 2]}));
    let bare = operation("Crow", "A1", 5, 1_700_000_000_001, "sync", Value::Null);
    source.append(&op, &Origin::Local).await.unwrap();
    source.append(&bare, &Origin::Local).await.unwrap();

    let stored = source.load("Crow", "A1").await.unwrap();
    assert_eq!(stored, vec![op, bare]);
    assert_eq!(stored[1].params(), &Value::Null);
    assert_eq!(source.len("Crow", "A1").await.unwrap(), 2);
}

#[tokio::test]
async fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flock.db");
    let op = operation("Crow", "A1", 0, 10, "fly", json!({"x": 1}));

    {
        let source = SqliteSource::open_path(&path).await.unwrap();
        source.append(&op, &Origin::Local).await.unwrap();
        source.close().await.unwrap();
    }

    let reopened = SqliteSource::open_path(&path)
        .await
        .unwrap()
        .with_name("reopened");
    assert_eq!(reopened.name(), "reopened");
    assert_eq!(reopened.load("Crow", "A1").await.unwrap(), vec![op]);
}

#[tokio::test]
async fn test_closed_pool_is_unavailable() {
    let source = SqliteSource::in_memory().await.unwrap();
    source.close().await.unwrap();
    let err = source.open().await.unwrap_err();
    assert!(err.is_backend_unavailable());
}

#[tokio::test]
async fn test_unreachable_database_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    // Parent directory does not exist, so the file cannot be created.
    let path = dir.path().join("missing").join("flock.db");
    let err = SqliteSource::open_path(&path).await.unwrap_err();
    assert!(err.is_backend_unavailable());
}

#[tokio::test]
async fn test_entity_round_trip_through_sqlite() {
    let source = std::sync::Arc::new(SqliteSource::in_memory().await.unwrap());

    let runtime = setup_runtime();
    let writer = runtime.entity("Crow", "A1").unwrap();
    writer.add_source(source.clone());
    writer.call("fly", json!({"x": 0.4, "y": 0.7})).await.unwrap();
    writer.call("fly", json!({"z": 1})).await.unwrap();

    let other = setup_runtime();
    let reader = other.entity("Crow", "A1").unwrap();
    reader.add_source(source.clone());
    reader.sync().await.unwrap();
    assert_eq!(reader.state(), json!({"x": 0.4, "y": 0.7, "z": 1}));
    assert_eq!(reader.version(), writer.version());
}

#[tokio::test]
async fn test_time_beyond_signed_range_is_refused() {
    let source = SqliteSource::in_memory().await.unwrap();
    let early = operation("Crow", "A1", 0, 10, "fly", json!({"x": 1}));
    let far = operation("Crow", "A1", 1, u64::MAX, "fly", json!({"x": 2}));
    source.append(&early, &Origin::Local).await.unwrap();

    let err = source.append(&far, &Origin::Local).await.unwrap_err();
    assert!(err.is_source_error());
    assert!(matches!(err, flock::Error::Source(ref e) if e.is_out_of_range()));
    assert_eq!(source.load("Crow", "A1").await.unwrap(), vec![early]);
}
