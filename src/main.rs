//! opsgate — administrative backend with real-time command sessions.
//!
//! CLI entry point for the opsgate server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod middleware;
mod server;
mod websocket;

/// Command-line overrides; configuration files and `OPSGATE_*` environment
/// variables provide everything else.
#[derive(Debug, Parser)]
#[command(
    name = "opsgate",
    version,
    about = "Administrative real-time session backend"
)]
struct Cli {
    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured history database path
    #[arg(long)]
    database: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = server::load_config()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.history.database_path = database;
    }

    server::run(config).await
}
