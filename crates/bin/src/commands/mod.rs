//! Subcommand implementations.

pub mod fly;
pub mod serve;
pub mod watch;

use std::sync::Arc;

use flock::{EngineConfig, Relay, Runtime, relay::TcpRelay};

use crate::cli::ClientArgs;

/// A client runtime with one open relay dialed into the server.
pub(crate) async fn connect(
    args: &ClientArgs,
) -> Result<(Runtime, Arc<TcpRelay>), Box<dyn std::error::Error>> {
    let runtime = Runtime::new(EngineConfig {
        continuation_timeout_ms: args.timeout_ms,
        ..EngineConfig::default()
    });
    let relay = TcpRelay::new(&runtime, "upstream");
    relay.open().await?;
    relay.dial(args.server.as_str()).await?;
    crate::model::register(&runtime, None, relay.clone())?;
    Ok((runtime, relay))
}

/// Pull the current state of a crow from the server.
///
/// A crow nobody has flown yet has no state to answer with, which shows up as an
/// unacknowledged request rather than an error.
pub(crate) async fn sync_crow(entity: &flock::Entity) -> Result<(), Box<dyn std::error::Error>> {
    match entity.sync().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_timeout_error() => {
            tracing::info!(id = entity.id(), "No state on the server yet");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
