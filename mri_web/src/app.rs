use crate::config::Config;
use crate::server::HttpServer;
use mri_prediction::ModelRegistry;

use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let registry = match ModelRegistry::load(&config.models) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::error!("Failed to initialize model registry: {:?}", e);
            return Err(e.into());
        }
    };

    let server = HttpServer::new(registry, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

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
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
