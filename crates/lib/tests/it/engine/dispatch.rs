//! Local dispatch: the Crow scenario, events, behavior tasks and identity caching.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use flock::{Lifecycle, Origin, Outcome, Runtime, Source, Variant, engine::EngineError};
use serde_json::{Value, json};

use crate::{context::TestContext, helpers::test_config};

#[tokio::test]
async fn test_crow_flies_into_its_source() {
    let ctx = TestContext::new().with_source().await;
    let crow = ctx.crow("A1");
    let before = crow.version();

    crow.call("fly", json!({"x": 0.4, "y": 0.7})).await.unwrap();

    assert_eq!(crow.state(), json!({"x": 0.4, "y": 0.7}));
    assert_eq!(crow.version(), before + 1);
    let stored = ctx.source().load("Crow", "A1").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].method(), "fly");
    assert_eq!(stored[0].params(), &json!({"x": 0.4, "y": 0.7}));
}

#[tokio::test]
async fn test_versions_and_times_advance() {
    let ctx = TestContext::new();
    let crow = ctx.crow("A1");
    for step in 0..5 {
        crow.call("fly", json!({"step": step})).await.unwrap();
    }
    let log = crow.log();
    assert_eq!(crow.version(), 4);
    assert_eq!(
        log.iter().map(|op| op.version()).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    assert!(log.windows(2).all(|pair| pair[0].time() <= pair[1].time()));
    assert!(log.iter().all(|op| op.author() == crow.author()));
    assert_eq!(crow.last_operation_time(), log[4].time());
}

#[tokio::test]
async fn test_identity_cache() {
    let ctx = TestContext::new();
    let first = ctx.crow("A1");
    let second = ctx.runtime().entity("Crow", "A1").unwrap();
    assert!(first.same_instance(&second));

    first.call("fly", json!({"x": 1})).await.unwrap();
    assert_eq!(second.state(), json!({"x": 1}));
}

#[tokio::test]
async fn test_events_carry_operation_and_origin() {
    let ctx = TestContext::new();
    let crow = ctx.crow("A1");
    let mut events = crow.subscribe();

    crow.call("fly", json!({"x": 2})).await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.method, "fly");
    assert_eq!(event.params, json!({"x": 2}));
    assert_eq!(event.operation.version(), 0);
    assert!(event.origin.is_local());
}

#[tokio::test]
async fn test_behavior_task_is_awaited() {
    let runtime = Runtime::new(test_config());
    let landed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&landed);
    let mut crow = Variant::new("Crow");
    crow.define_operation("land", move |call| {
        call.state_object().insert("landed".to_string(), Value::Bool(true));
        let counter = Arc::clone(&counter);
        Ok(Outcome::done().with_task(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), flock::Error>(())
        }))
    })
    .unwrap();
    runtime.register(crow).unwrap();

    let entity = runtime.entity("Crow", "A1").unwrap();
    entity.call("land", Value::Null).await.unwrap();
    assert_eq!(landed.load(Ordering::SeqCst), 1);
    assert_eq!(entity.state(), json!({"landed": true}));
}

#[tokio::test]
async fn test_failed_task_fails_the_call() {
    let runtime = Runtime::new(test_config());
    let mut crow = Variant::new("Crow");
    crow.define_operation("land", |call| {
        call.state_object().insert("landed".to_string(), Value::Bool(true));
        Ok(Outcome::done().with_task(async {
            let err: flock::Error = EngineError::Behavior {
                method: "land".to_string(),
                reason: "no branch".to_string(),
            }
            .into();
            Err(err)
        }))
    })
    .unwrap();
    runtime.register(crow).unwrap();

    let entity = runtime.entity("Crow", "A1").unwrap();
    let err = entity.call("land", Value::Null).await.unwrap_err();
    assert!(matches!(err, flock::Error::Engine(EngineError::Behavior { .. })));
    // The state change and the log entry stay.
    assert_eq!(entity.state(), json!({"landed": true}));
    assert_eq!(entity.log().len(), 1);
}

#[tokio::test]
async fn test_remote_operation_adopts_its_version() {
    let ctx = TestContext::new().with_source().await;
    let crow = ctx.crow("A1");
    let op = crate::helpers::operation("Crow", "A1", 9, 100, "fly", json!({"x": 5}));

    crow.invoke(op.clone(), Origin::Source(ctx.source().clone()))
        .await
        .unwrap();

    assert_eq!(crow.version(), 9);
    assert_eq!(crow.lifecycle(), Lifecycle::Active);
    // Not written back to the source it came from.
    assert!(ctx.source().load("Crow", "A1").await.unwrap().is_empty());

    crow.call("fly", json!({"y": 1})).await.unwrap();
    assert_eq!(crow.version(), 10);
}
