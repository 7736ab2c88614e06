use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod model;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flock=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => commands::serve::run(&args).await,
        Commands::Fly(args) => commands::fly::run(&args).await,
        Commands::Watch(args) => commands::watch::run(&args).await,
    }
}
