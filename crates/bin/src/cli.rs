//! CLI argument definitions for the Flock binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Storage source type
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Backend {
    /// SQLite database (default)
    Sqlite,
    /// In-memory with JSON persistence (for development and ephemeral deployments)
    Inmemory,
}

/// Flock demonstration server and client
#[derive(Parser, Debug)]
#[command(name = "flock")]
#[command(about = "Flock: replicated crows over TCP")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Host the crows behind a TCP relay
    Serve(ServeArgs),
    /// Connect to a server and fly one crow
    Fly(FlyArgs),
    /// Print the operations of one crow as they arrive
    Watch(WatchArgs),
}

/// Arguments for the serve command
#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 4400, env = "FLOCK_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "FLOCK_HOST")]
    pub host: String,

    /// Storage source to use
    #[arg(short, long, default_value = "sqlite", env = "FLOCK_BACKEND")]
    pub backend: Backend,

    /// Data directory for storage files.
    /// For SQLite: stores flock.db
    /// For InMemory: stores flock.json
    #[arg(short = 'D', long, env = "FLOCK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Connection arguments shared by the client commands
#[derive(clap::Args, Debug)]
pub struct ClientArgs {
    /// Address of a running server
    #[arg(short, long, default_value = "127.0.0.1:4400", env = "FLOCK_SERVER")]
    pub server: String,

    /// Crow to address
    #[arg(default_value = "A1")]
    pub id: String,

    /// Milliseconds to wait for the server to acknowledge an operation
    #[arg(long, default_value_t = 5_000, env = "FLOCK_TIMEOUT_MS")]
    pub timeout_ms: u64,
}

/// Arguments for the fly command
#[derive(clap::Args, Debug)]
pub struct FlyArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Target x coordinate, random when omitted
    #[arg(short)]
    pub x: Option<f64>,

    /// Target y coordinate, random when omitted
    #[arg(short)]
    pub y: Option<f64>,

    /// Author recorded on the operation
    #[arg(long, env = "FLOCK_AUTHOR")]
    pub author: Option<String>,
}

/// Arguments for the watch command
#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub client: ClientArgs,
}
