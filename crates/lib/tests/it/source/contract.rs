//! Behavior every `Source` must show, run against the TEST_SOURCE backend.

use flock::Origin;
use serde_json::{Value, json};

use crate::helpers::{operation, setup_runtime, test_source};

#[tokio::test]
async fn test_append_is_idempotent() {
    let source = test_source().await;
    let op = operation("Crow", "A1", 0, 10, "fly", json!({"x": 1}));

    source.append(&op, &Origin::Local).await.unwrap();
    source.append(&op, &Origin::Local).await.unwrap();

    let stored = source.load("Crow", "A1").await.unwrap();
    assert_eq!(stored, vec![op]);
}

#[tokio::test]
async fn test_load_orders_by_time_and_scopes_by_entity() {
    let source = test_source().await;
    let late = operation("Crow", "A1", 1, 30, "fly", json!({"x": 2}));
    let early = operation("Crow", "A1", 0, 10, "fly", json!({"x": 1}));
    let other = operation("Crow", "B2", 0, 20, "fly", json!({"x": 9}));
    for op in [&late, &other, &early] {
        source.append(op, &Origin::Local).await.unwrap();
    }

    assert_eq!(source.load("Crow", "A1").await.unwrap(), vec![early, late]);
    assert_eq!(source.load("Crow", "B2").await.unwrap(), vec![other]);
    assert!(source.load("Crow", "C3").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_keeps_only_the_marker() {
    let source = test_source().await;
    source
        .append(&operation("Crow", "A1", 0, 10, "fly", json!({"x": 1})), &Origin::Local)
        .await
        .unwrap();
    let marker = operation("Crow", "A1", 1, 20, "delete", Value::Null);

    source.delete(&marker, &Origin::Local).await.unwrap();
    assert_eq!(source.load("Crow", "A1").await.unwrap(), vec![marker]);
}

#[tokio::test]
async fn test_deliver_ignores_own_operations() {
    let source = test_source().await;
    let fly = operation("Crow", "A1", 0, 10, "fly", json!({"x": 1}));
    source.append(&fly, &Origin::Local).await.unwrap();

    let runtime = setup_runtime();
    let entity = runtime.entity("Crow", "A1").unwrap();
    let marker = operation("Crow", "A1", 1, 20, "delete", Value::Null);
    source
        .deliver(&marker, &Origin::Source(source.clone()), &entity)
        .await
        .unwrap();
    assert_eq!(source.load("Crow", "A1").await.unwrap(), vec![fly]);

    source.deliver(&marker, &Origin::Local, &entity).await.unwrap();
    assert_eq!(source.load("Crow", "A1").await.unwrap(), vec![marker]);
}

#[tokio::test]
async fn test_sync_restores_history_into_entity() {
    let source = test_source().await;
    source
        .append(&operation("Crow", "A1", 0, 10, "fly", json!({"x": 1})), &Origin::Local)
        .await
        .unwrap();
    source
        .append(&operation("Crow", "A1", 1, 20, "fly", json!({"y": 2})), &Origin::Local)
        .await
        .unwrap();

    let runtime = setup_runtime();
    let entity = runtime.entity("Crow", "A1").unwrap();
    entity.add_source(source.clone());
    entity.sync().await.unwrap();

    assert_eq!(entity.state(), json!({"x": 1, "y": 2}));
    assert_eq!(entity.version(), 1);
    assert_eq!(entity.log().len(), 2);
    // Restored operations are not written back.
    assert_eq!(source.load("Crow", "A1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_compress_drops_sync_requests() {
    let source = test_source().await;
    let fly = operation("Crow", "A1", 0, 10, "fly", json!({"x": 1}));
    source.append(&fly, &Origin::Local).await.unwrap();
    source
        .append(&operation("Crow", "A1", 0, 15, "sync", Value::Null), &Origin::Local)
        .await
        .unwrap();

    let runtime = setup_runtime();
    let entity = runtime.entity("Crow", "A1").unwrap();
    source.compress(&entity).await.unwrap();
    assert_eq!(source.load("Crow", "A1").await.unwrap(), vec![fly]);
}
