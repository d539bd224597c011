//! Image-lab service - HTTP API for image transformations and credits.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_lab_service::{create_router, AppState, ServiceConfig};
use image_lab_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,image_lab=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting image-lab service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        uploads_dir = %config.uploads_dir.display(),
        database_configured = %config.database_url.is_some(),
        openai_configured = %config.has_openai(),
        product_webhook_configured = %config.product_webhook_url.is_some(),
        test_mode_allowed = %config.test_mode_allowed,
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            tracing::info!("Database migrations applied");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using in-memory store, data will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, config.clone());
    state.uploads.ensure_root().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = state.sweeper.clone();
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx));

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Err(e) = sweeper_task.await {
        tracing::error!(error = %e, "Retention sweeper task failed");
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Ctrl+C received, starting graceful shutdown"),
        () = terminate => tracing::info!("SIGTERM received, starting graceful shutdown"),
    }
}
