//! spacecat server binary
//!
//! Usage:
//!   spacecat
//!   spacecat --host 0.0.0.0 --port 9000 --database sqlite://chat.db
//!
//! Log verbosity follows `RUST_LOG` (default `spacecat=info`).

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use spacecat::server::DEFAULT_PORT;
use spacecat::{ChatServer, ServerConfig};

/// Line-oriented TCP chat server
#[derive(Parser, Debug)]
#[command(name = "spacecat")]
#[command(about = "Line-oriented TCP chat server with rooms")]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// SQLite database URL
    #[arg(long, default_value = "sqlite://spacecat.db")]
    database: String,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spacecat=info")),
        )
        .init();

    let args = Args::parse();

    let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to resolve {}:{}", args.host, args.port))?
        .next()
        .with_context(|| format!("no address for {}", args.host))?;

    let config = ServerConfig::with_addr(addr)
        .database_url(args.database)
        .max_connections(args.max_connections);

    tracing::info!(addr = %addr, database = %config.database_url, "Starting spacecat");

    let server = ChatServer::open(config)
        .await
        .context("failed to open database")?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
