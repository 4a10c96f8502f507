//! `inbox-relay` service binary.
//!
//! Reads its configuration from `INBOX_RELAY_*` environment variables (a `.env` file
//! is honoured) and logs through `RUST_LOG`.

use inbox_relay::{server, Error, ImapConnector, RelayConfig, SessionManager};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "inbox_relay=info,tower_http=info";

#[tokio::main]
async fn main() -> inbox_relay::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = RelayConfig::from_env()?;
    let bind = config.bind;

    let connector = ImapConnector::new(config.timeouts.clone(), config.proxy.clone());
    let manager = SessionManager::new(connector, config);
    let reaper = manager.spawn_reaper();

    let listener = TcpListener::bind(bind).await.map_err(|source| Error::Bind {
        addr: bind.to_string(),
        source,
    })?;

    info!(
        addr = %bind,
        domains = manager.config().registry.len(),
        "Listening"
    );

    axum::serve(listener, server::router(manager))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|source| Error::Serve { source })?;

    reaper.abort();
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
