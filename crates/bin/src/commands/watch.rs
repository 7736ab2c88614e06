//! Watch command - prints the operations of one crow as they arrive.

use chrono::{TimeZone, Utc};
use flock::{EntityEvent, Relay};
use tokio::sync::broadcast::error::RecvError;

use super::{connect, sync_crow};
use crate::{cli::WatchArgs, model::CROW};

fn print_event(event: &EntityEvent) {
    let op = &event.operation;
    let at = Utc
        .timestamp_millis_opt(op.time() as i64)
        .single()
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| op.time().to_string());
    println!(
        "{at}  v{:<4} {:<10} {:<6} {}",
        op.version(),
        op.author(),
        event.method,
        event.params
    );
}

/// Run the watch command
pub async fn run(args: &WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (runtime, relay) = connect(&args.client).await?;
    let crow = runtime.entity(CROW, &args.client.id)?;
    let mut events = crow.subscribe();
    sync_crow(&crow).await?;
    println!("Watching {CROW} {} (Ctrl+C to stop)", crow.id());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Watcher fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    relay.close().await?;
    Ok(())
}
