use std::sync::Arc;

use flock::{
    EngineConfig, Operation, Outcome, Relay, Runtime, Source, Variant, engine::Call,
    relay::MemoryRelay, source::MemorySource,
};
use serde_json::{Value, json};

// ==========================
// CORE TEST FACTORIES
// ==========================

/// Engine configuration with a short continuation window so failing
/// acknowledgments do not stall the suite.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        continuation_timeout_ms: 500,
        ..EngineConfig::default()
    }
}

/// Creates a test source based on the TEST_SOURCE env var.
///
/// Supported values:
/// - "memory" or unset: MemorySource (default)
/// - "sqlite": SQLite in-memory source (requires `sqlite` feature)
///
/// The source is returned open.
pub async fn test_source() -> Arc<dyn Source> {
    let source: Arc<dyn Source> = match std::env::var("TEST_SOURCE").as_deref() {
        Ok("sqlite") => {
            #[cfg(feature = "sqlite")]
            {
                Arc::new(
                    flock::source::SqliteSource::in_memory()
                        .await
                        .expect("Failed to create SQLite source"),
                )
            }
            #[cfg(not(feature = "sqlite"))]
            {
                panic!("TEST_SOURCE=sqlite requires the `sqlite` feature");
            }
        }
        _ => Arc::new(MemorySource::new("test")),
    };
    source.open().await.expect("Failed to open source");
    source
}

/// An open in-memory source, for tests that inspect its contents.
pub async fn memory_source(name: &str) -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new(name));
    source.open().await.expect("Failed to open source");
    source
}

// ==========================
// VARIANTS
// ==========================

/// Behavior of `fly`: merge the params into the state.
pub fn fly(call: &mut Call<'_>) -> flock::Result<Outcome> {
    let params = call.params().clone();
    call.merge_state(&params);
    Ok(Outcome::done())
}

/// `Crow`: a position that moves with `fly`.
pub fn crow_variant() -> Variant {
    let mut crow = Variant::new("Crow");
    crow.define_operation("fly", fly)
        .expect("Failed to define fly");
    crow
}

/// `Murder`: a grow-only set of crows, extended with `join`.
pub fn murder_variant() -> Variant {
    let mut murder = Variant::new("Murder");
    murder
        .define_operation("join", |call| {
            let member = call.param("member").cloned().unwrap_or(Value::Null);
            call.merge_state(&json!({ "members": [member] }));
            Ok(Outcome::done())
        })
        .expect("Failed to define join");
    murder
}

/// Runtime with `Crow` and `Murder` registered and no collaborators.
pub fn setup_runtime() -> Runtime {
    let runtime = Runtime::new(test_config());
    register_variants(&runtime, None);
    runtime
}

/// Register the test variants, with `relay` as their default relay when given.
pub fn register_variants(runtime: &Runtime, relay: Option<Arc<dyn Relay>>) {
    let mut crow = crow_variant();
    let mut murder = murder_variant();
    if let Some(relay) = relay {
        crow = crow.with_relay(Arc::clone(&relay));
        murder = murder.with_relay(relay);
    }
    runtime.register(crow).expect("Failed to register Crow");
    runtime.register(murder).expect("Failed to register Murder");
}

// ==========================
// REPLICAS
// ==========================

/// One runtime and the in-process relay every one of its entities uses.
pub struct Replica {
    pub runtime: Runtime,
    pub relay: Arc<MemoryRelay>,
}

impl Replica {
    pub async fn new(name: &str) -> Self {
        let runtime = Runtime::new(test_config());
        let relay = MemoryRelay::new(&runtime, name);
        relay.open().await.expect("Failed to open relay");
        register_variants(&runtime, Some(relay.clone()));
        Self { runtime, relay }
    }

    /// Link this replica's relay to another's.
    pub async fn link(&self, other: &Replica) {
        MemoryRelay::link(&self.relay, &other.relay)
            .await
            .expect("Failed to link relays");
    }
}

/// Two replicas linked to each other.
pub async fn linked_replicas() -> (Replica, Replica) {
    let one = Replica::new("one").await;
    let two = Replica::new("two").await;
    one.link(&two).await;
    (one, two)
}

/// Build an operation for `Crow` or `Murder` by hand.
pub fn operation(kind: &str, id: &str, version: i64, time: u64, method: &str, params: Value) -> Operation {
    Operation::builder(kind, id)
        .version(version)
        .time(time)
        .author("remote")
        .method(method)
        .params(params)
        .build()
        .expect("Failed to build operation")
}
