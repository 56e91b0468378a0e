use crate::{
    config::Config,
    routes::api_routes,
    telemetry::Metrics,
    uploads::UploadStore,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use mri_prediction::ModelRegistry;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub registry: Arc<ModelRegistry>,
    pub uploads: Arc<UploadStore>,
    pub retain_uploads: bool,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(registry: Arc<ModelRegistry>, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics = Arc::new(Metrics::new()?);
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState {
            registry,
            uploads: Arc::new(UploadStore::new(&config.uploads.dir)?),
            retain_uploads: config.uploads.retain,
            metrics,
        };

        let router = build_router(app_state, config.uploads.max_bytes).layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
