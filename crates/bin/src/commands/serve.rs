//! Serve command - hosts the crows behind a TCP relay and a storage source.

use std::{path::PathBuf, sync::Arc};

use flock::{EngineConfig, Relay, Runtime, Source, relay::TcpRelay, source::MemorySource};

use crate::cli::{Backend, ServeArgs};

/// The opened storage source, plus the in-memory handle when it must be saved on
/// shutdown.
struct Storage {
    source: Arc<dyn Source>,
    memory: Option<(Arc<MemorySource>, PathBuf)>,
}

/// Create the storage source selected on the command line.
async fn create_storage(args: &ServeArgs) -> Result<Storage, Box<dyn std::error::Error>> {
    let data_dir = args.data_dir.clone().unwrap_or_else(|| PathBuf::from("."));

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir).await?;

    let storage = match args.backend {
        Backend::Sqlite => {
            let db_path = data_dir.join("flock.db");
            tracing::info!("Using SQLite source at {}", db_path.display());
            let source = flock::source::SqliteSource::open_path(&db_path).await?;
            Storage {
                source: Arc::new(source),
                memory: None,
            }
        }
        Backend::Inmemory => {
            let json_path = data_dir.join("flock.json");
            tracing::info!(
                "Using in-memory source with persistence at {}",
                json_path.display()
            );
            let source = Arc::new(MemorySource::load_from_file("memory", &json_path).await?);
            Storage {
                source: source.clone(),
                memory: Some((source, json_path)),
            }
        }
    };
    storage.source.open().await?;
    Ok(storage)
}

/// Run the Flock server
pub async fn run(args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let storage = create_storage(args).await?;

    let runtime = Runtime::new(EngineConfig::default());
    let relay = TcpRelay::new(&runtime, "server");
    relay.open().await?;
    crate::model::register(&runtime, Some(storage.source.clone()), relay.clone())?;

    let addr = relay.listen((args.host.as_str(), args.port)).await?;
    println!("Flock server listening on {addr}");
    println!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    relay.close().await?;
    if let Some((memory, path)) = &storage.memory {
        match memory.save_to_file(path).await {
            Ok(()) => tracing::info!("Saved {} operations to {}", memory.total().await, path.display()),
            Err(e) => tracing::error!("Failed to save source: {e}"),
        }
    }
    storage.source.close().await?;

    println!("Server shut down");
    Ok(())
}
