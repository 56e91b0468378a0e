mod detect;
mod health;
mod home;
mod metrics;
mod models;
mod predict;
mod uploads;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(home::home))
        .route("/models", get(models::list_models))
        .route("/predict", post(predict::predict))
        .route("/detect", post(detect::detect))
        .route("/static/uploads/{file}", get(uploads::serve_upload))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
