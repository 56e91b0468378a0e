use crate::server::SharedState;
use axum::{extract::State, Json};
use mri_prediction::ModelDescriptor;
use serde::Serialize;

#[derive(Serialize)]
pub struct ModelList {
    pub models: Vec<ModelDescriptor>,
}

pub async fn list_models(State(state): State<SharedState>) -> Json<ModelList> {
    state.metrics.record_request("/models");
    Json(ModelList {
        models: state.registry.descriptors(),
    })
}
