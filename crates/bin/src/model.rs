//! The demonstration variant shared by the server and the clients.

use std::sync::Arc;

use flock::{Outcome, Relay, Runtime, Source, Variant, engine::Call};
use serde_json::{Value, json};

pub const CROW: &str = "Crow";

/// `fly` moves the crow. Missing coordinates are picked at random by whoever
/// produces the operation, so every replica applies the same position.
fn fly(call: &mut Call<'_>) -> flock::Result<Outcome> {
    let coordinate = |call: &Call<'_>, axis: &str| {
        call.param(axis)
            .and_then(Value::as_f64)
            .unwrap_or_else(rand::random::<f64>)
    };
    let position = json!({
        "x": coordinate(call, "x"),
        "y": coordinate(call, "y"),
    });
    call.merge_state(&position);
    Ok(Outcome::done().rewrite_params(position))
}

/// Register `Crow` with the given default collaborators.
pub fn register(
    runtime: &Runtime,
    source: Option<Arc<dyn Source>>,
    relay: Arc<dyn Relay>,
) -> flock::Result<()> {
    let mut crow = Variant::new(CROW);
    crow.define_operation("fly", fly)?;
    let mut crow = crow.with_relay(relay);
    if let Some(source) = source {
        crow = crow.with_source(source);
    }
    runtime.register(crow)
}
