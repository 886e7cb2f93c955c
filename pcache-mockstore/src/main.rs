//! Standalone mock store for local development against the cache client.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pcache_mockstore::{serve, Shared};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcache_mockstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = env::var("PCACHE_MOCK_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
    let password = env::var("PCACHE_MOCK_PASSWORD")
        .ok()
        .filter(|password| !password.is_empty());

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, auth = password.is_some(), "mock store listening");

    let shared = Arc::new(Shared::new(password));
    serve(listener, Arc::clone(&shared), shutdown_signal()).await?;

    info!(
        connections = shared.connections_accepted(),
        "mock store shut down"
    );
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(err) => {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await
        }
    }
}
