//! Tests specific to `MemorySource`.

use flock::{Origin, Source, source::MemorySource};
use serde_json::{Value, json};

use crate::helpers::{memory_source, operation, setup_runtime};

#[tokio::test]
async fn test_closed_source_is_unavailable() {
    let source = MemorySource::new("closed");
    let op = operation("Crow", "A1", 0, 10, "fly", json!({"x": 1}));

    let err = source.append(&op, &Origin::Local).await.unwrap_err();
    assert!(err.is_backend_unavailable());
    assert!(err.is_source_error());

    source.open().await.unwrap();
    source.open().await.unwrap();
    source.append(&op, &Origin::Local).await.unwrap();
    source.close().await.unwrap();
    assert!(source.load("Crow", "A1").await.unwrap_err().is_backend_unavailable());
}

#[tokio::test]
async fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flock.json");

    let source = memory_source("disk").await;
    for (version, time) in [(0, 10), (1, 20)] {
        let op = operation("Crow", "A1", version, time, "fly", json!({"x": version}));
        source.append(&op, &Origin::Local).await.unwrap();
    }
    source
        .append(&operation("Murder", "m1", 0, 5, "join", json!({"member": "A1"})), &Origin::Local)
        .await
        .unwrap();
    source.save_to_file(&path).await.unwrap();

    let loaded = MemorySource::load_from_file("disk", &path).await.unwrap();
    assert!(loaded.load("Crow", "A1").await.is_err(), "loaded sources start closed");
    loaded.open().await.unwrap();
    assert_eq!(loaded.total().await, 3);
    assert_eq!(
        loaded.load("Crow", "A1").await.unwrap(),
        source.load("Crow", "A1").await.unwrap()
    );
}

#[tokio::test]
async fn test_load_missing_file_gives_empty_source() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = MemorySource::load_from_file("fresh", dir.path().join("missing.json"))
        .await
        .unwrap();
    loaded.open().await.unwrap();
    assert_eq!(loaded.total().await, 0);
}

#[tokio::test]
async fn test_load_rejects_unknown_format_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.json");
    tokio::fs::write(&path, r#"{"_v": 7, "entities": {}}"#)
        .await
        .unwrap();

    let err = MemorySource::load_from_file("future", &path).await.unwrap_err();
    assert!(err.is_source_error());
}

#[tokio::test]
async fn test_compress_after_delete_keeps_marker() {
    let source = memory_source("mem").await;
    source
        .append(&operation("Crow", "A1", 0, 10, "fly", json!({"x": 1})), &Origin::Local)
        .await
        .unwrap();
    // A delete that reached the log without going through `delete`.
    source
        .append(&operation("Crow", "A1", 1, 20, "delete", Value::Null), &Origin::Local)
        .await
        .unwrap();

    let runtime = setup_runtime();
    let entity = runtime.entity("Crow", "A1").unwrap();
    source.compress(&entity).await.unwrap();
    assert_eq!(source.len("Crow", "A1").await, 1);
    assert_eq!(source.load("Crow", "A1").await.unwrap()[0].method(), "delete");
}

#[tokio::test]
async fn test_free_releases_everything() {
    let source = memory_source("mem").await;
    source
        .append(&operation("Crow", "A1", 0, 10, "fly", json!({"x": 1})), &Origin::Local)
        .await
        .unwrap();
    source.free().await.unwrap();
    assert_eq!(source.total().await, 0);
    assert!(source.load("Crow", "A1").await.is_err());
}
