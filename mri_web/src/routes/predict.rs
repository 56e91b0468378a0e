use crate::{error::ApiError, multipart::UploadForm, server::SharedState};
use axum::{
    extract::{Multipart, State},
    Json,
};
use mri_prediction::ExplainedPrediction;
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/predict";

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<ExplainedPrediction>, ApiError> {
    state.metrics.record_request(ROUTE);
    match explain(&state, multipart).await {
        Ok(prediction) => Ok(Json(prediction)),
        Err(e) => {
            state.metrics.record_failure(ROUTE, e.kind_label());
            Err(e)
        }
    }
}

async fn explain(state: &SharedState, multipart: Multipart) -> Result<ExplainedPrediction, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let model_name = form.require("model_name")?.to_string();
    let file = form.take_file()?;

    let classifier = state.registry.classifier(&model_name)?.clone();

    // Never retained; removed when `upload` drops.
    let upload = state
        .uploads
        .store(&file.data, file.file_name.as_deref())
        .await?;
    let data = upload.read().await?;

    let start = Instant::now();
    let prediction = classifier.explain(data).await?;
    state.metrics.record_inference_duration(
        start.elapsed().as_millis() as u64,
        ROUTE,
        &model_name,
    );

    tracing::info!(
        "{} classified upload as {} with confidence {:.4}",
        model_name,
        prediction.prediction,
        prediction.confidence
    );
    drop(upload);
    Ok(prediction)
}
