use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use otalink_core::ServiceConfig;
use otalink_web::{create_router, ServerState};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,otalink_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("otalink server starting...");

    let config = load_config()?;
    config.validate()?;

    let state = Arc::new(ServerState::from_config(&config));
    if let Err(e) = state.store.load_static_snapshot(state.source.as_ref()) {
        tracing::warn!("Starting without link status: {}", e);
    }

    // Broadcaster runs until shutdown flips to true
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let broadcaster = tokio::spawn(state.broadcaster.clone().run(shutdown_rx.clone()));

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!("otalink server ready on http://{}", config.bind_addr);
    tracing::info!("   Status: /status.json");
    tracing::info!("   Events: /events");
    tracing::info!("   Upload: /upload");

    let mut http_shutdown = shutdown_rx;
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let server_done = tokio::select! {
        result = &mut server => {
            match result {
                Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
                Err(e) => tracing::error!("HTTP server task failed: {}", e),
                Ok(Ok(())) => {}
            }
            tracing::warn!("HTTP server stopped");
            true
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
            false
        }
    };

    // Stopping the broadcaster ends every open event stream
    let _ = shutdown_tx.send(true);
    if let Err(e) = broadcaster.await {
        tracing::error!("Broadcaster task failed: {}", e);
    }
    if !server_done {
        if let Ok(Err(e)) = server.await {
            tracing::error!("HTTP server error: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Config file from the first argument or `OTALINK_CONFIG`, else defaults.
fn load_config() -> anyhow::Result<ServiceConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OTALINK_CONFIG").ok())
        .map(PathBuf::from);

    match path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            ServiceConfig::from_file(&path)
                .with_context(|| format!("loading configuration from {}", path.display()))
        }
        None => {
            tracing::info!("No configuration given, using defaults");
            Ok(ServiceConfig::default())
        }
    }
}
