//! sync-server: serves the document version store over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sync_server::config::ServerConfig;
use sync_server::storage::DocumentStore;
use sync_server::{router, AppState};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sync-server")]
#[command(about = "Version store for offline-first panel sync")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 3030, env = "SYNC_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1", env = "SYNC_BIND")]
    bind: String,

    /// Directory holding config.json and documents.json
    #[arg(long, default_value = "./data", env = "SYNC_DATA_DIR")]
    data_dir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, env = "SYNC_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "sync_server=debug,sync_core=debug,tower_http=debug"
    } else {
        "sync_server=info,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load(&cli.data_dir)?;
    let store = DocumentStore::open(&cli.data_dir)?;
    let state = Arc::new(AppState { config, store });

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.bind, cli.port))?;

    tracing::info!("Starting sync-server on {}", addr);
    tracing::info!("Data directory: {:?}", cli.data_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("sync-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
