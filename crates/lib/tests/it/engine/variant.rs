//! Variants registered in a runtime: extension, overriding and defaults.

use flock::{Outcome, Source, engine::EngineError};
use serde_json::{Value, json};

use crate::{
    context::TestContext,
    helpers::{crow_variant, memory_source, setup_runtime},
};

#[tokio::test]
async fn test_extended_variant_inherits_and_overrides() {
    let runtime = setup_runtime();
    let mut raven = crow_variant().extend("Raven");
    raven
        .override_operation("fly", |call| {
            // Ravens only ever fly twice as far.
            let x = call.param("x").and_then(Value::as_f64).unwrap_or(0.0);
            call.state_object().insert("x".to_string(), json!(x * 2.0));
            Ok(Outcome::done())
        })
        .unwrap();
    raven
        .define_operation("caw", |call| {
            call.merge_state(&json!({"heard": true}));
            Ok(Outcome::done())
        })
        .unwrap();
    runtime.register(raven).unwrap();

    let raven = runtime.entity("Raven", "R1").unwrap();
    assert_eq!(raven.variant().base(), Some("Crow"));
    raven.call("fly", json!({"x": 2.0})).await.unwrap();
    raven.call("caw", Value::Null).await.unwrap();
    assert_eq!(raven.state(), json!({"x": 4.0, "heard": true}));

    // The base keeps its own behavior and does not gain the extension's operations.
    let crow = runtime.entity("Crow", "A1").unwrap();
    crow.call("fly", json!({"x": 2.0})).await.unwrap();
    assert_eq!(crow.state(), json!({"x": 2.0}));
    let err = crow.call("caw", Value::Null).await.unwrap_err();
    assert!(err.is_validation_error());
}

#[tokio::test]
async fn test_registry_rejects_collisions() {
    let runtime = setup_runtime();
    let err = runtime.register(crow_variant()).unwrap_err();
    assert!(err.is_conflict());
    assert!(matches!(
        err,
        flock::Error::Engine(EngineError::DuplicateVariant { ref name }) if name == "Crow"
    ));

    let err = runtime.entity("Swan", "S1").unwrap_err();
    assert!(matches!(err, flock::Error::Engine(EngineError::UnknownVariant { .. })));
}

#[test]
fn test_operation_names_are_checked() {
    let mut crow = crow_variant();
    for name in ["operation", "", "a.b", "c:d"] {
        let err = crow
            .define_operation(name, |_| Ok(Outcome::done()))
            .unwrap_err();
        assert!(err.is_validation_error(), "{name:?} should be rejected");
    }
    for name in ["sync", "delete", "fly"] {
        let err = crow
            .define_operation(name, |_| Ok(Outcome::done()))
            .unwrap_err();
        assert!(err.is_conflict(), "{name:?} is already defined");
    }
    let err = crow
        .override_operation("sync", |_| Ok(Outcome::done()))
        .unwrap_err();
    assert!(err.is_validation_error());
    let err = crow
        .override_operation("swim", |_| Ok(Outcome::done()))
        .unwrap_err();
    assert!(err.is_validation_error());
}

#[tokio::test]
async fn test_rewritten_params_are_what_gets_stored() {
    let ctx = TestContext::new();
    let mut heron = flock::Variant::new("Heron");
    heron
        .define_operation("wade", |call| {
            let depth = call.param("depth").cloned().unwrap_or(json!(1));
            let params = json!({ "depth": depth });
            call.merge_state(&params);
            Ok(Outcome::done().rewrite_params(params))
        })
        .unwrap();
    ctx.runtime().register(heron).unwrap();

    let source = memory_source("herons").await;
    let heron = ctx
        .runtime()
        .entity_with("Heron", "H1", flock::EntityOptions::default().source(source.clone()))
        .unwrap();
    heron.call("wade", json!({})).await.unwrap();

    let stored = source.load("Heron", "H1").await.unwrap();
    assert_eq!(stored[0].params(), &json!({"depth": 1}));
    assert_eq!(heron.log()[0].params(), &json!({"depth": 1}));
}

#[tokio::test]
async fn test_author_defaults() {
    let ctx = TestContext::new();
    ctx.runtime()
        .register(crow_variant().extend("Jackdaw").with_author("jack"))
        .unwrap();

    let jackdaw = ctx.entity("Jackdaw", "J1");
    assert_eq!(jackdaw.author(), "jack");
    jackdaw.call("fly", json!({"x": 1})).await.unwrap();
    assert_eq!(jackdaw.log()[0].author(), "jack");

    let crow = ctx.crow("A1");
    assert_eq!(crow.author(), ctx.runtime().author());

    let named = ctx
        .runtime()
        .entity_with("Crow", "A2", flock::EntityOptions::default().author("named"))
        .unwrap();
    assert_eq!(named.author(), "named");
}
