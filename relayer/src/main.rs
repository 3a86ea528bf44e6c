//! Steward relayer service
//!
//! Wires the transaction sender to a chain endpoint and a durable store,
//! serves prometheus metrics, and resumes any attempts left outstanding by a
//! previous run.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use steward_relayer::chain::RpcClient;
use steward_relayer::config::Settings;
use steward_relayer::metrics::MetricsServer;
use steward_relayer::state::{PendingStore, SenderType};
use steward_relayer::tx::Sender;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting steward relayer v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;

    let store = Arc::new(PendingStore::connect(&settings.database.url).await?);
    store.run_migrations().await?;
    info!("Store ready at {}", settings.database.url);

    let chain = Arc::new(RpcClient::new(&settings.sender.endpoint)?);

    let private_key = std::env::var(&settings.wallet.private_key_env)
        .with_context(|| format!("missing key material in {}", settings.wallet.private_key_env))?;

    let cancel = CancellationToken::new();
    let sender = Sender::new(
        settings.sender.clone(),
        chain,
        &private_key,
        "steward",
        "main",
        SenderType::Unknown,
        store.clone(),
        cancel.clone(),
    )
    .await?;
    info!(address = %sender.address(), "sender resumed; outstanding attempts will be re-checked");

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Steward relayer is running");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    sender.stop().await;
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("Steward relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,steward_relayer=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
