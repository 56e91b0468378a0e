use crate::{
    error::{ApiError, HtmlError},
    multipart::UploadForm,
    server::SharedState,
    templates::results_page,
};
use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Response},
    Json,
};
use mri_prediction::{overlay::encode_png_base64, Detection, ModelDescriptor, PredictionError};
use serde::Serialize;
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/detect";
const DEFAULT_MODEL: &str = "yolo";

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub detections: Vec<Detection>,
    pub image_path: Option<String>,
    pub image_width: u32,
    pub image_height: u32,
    pub model_info: ModelDescriptor,
}

struct Outcome {
    response: DetectionResponse,
    annotated_png_base64: Option<String>,
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

#[instrument(skip(state, headers, multipart))]
pub async fn detect(
    State(state): State<SharedState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    state.metrics.record_request(ROUTE);
    let json = wants_json(&headers);

    match run(&state, multipart, !json).await {
        Ok(outcome) if json => Json(outcome.response).into_response(),
        Ok(outcome) => Html(results_page(
            &outcome.response.model_info,
            outcome.response.image_path.as_deref(),
            outcome.annotated_png_base64.as_deref().unwrap_or_default(),
            &outcome.response.detections,
        ))
        .into_response(),
        Err(e) => {
            state.metrics.record_failure(ROUTE, e.kind_label());
            if json {
                e.into_response()
            } else {
                HtmlError(e).into_response()
            }
        }
    }
}

async fn run(state: &SharedState, multipart: Multipart, render: bool) -> Result<Outcome, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let model_key = form.field("model_type").unwrap_or(DEFAULT_MODEL).to_string();
    let file = form.take_file()?;

    let detector = state.registry.detector(&model_key)?.clone();
    let model_info = state
        .registry
        .descriptor(&model_key)
        .cloned()
        .ok_or_else(|| PredictionError::UnknownModel(model_key.clone()))?;

    let upload = state
        .uploads
        .store(&file.data, file.file_name.as_deref())
        .await?;
    let data = upload.read().await?;

    let start = Instant::now();
    let report = detector.detect(data).await?;
    state.metrics.record_inference_duration(
        start.elapsed().as_millis() as u64,
        ROUTE,
        &model_info.key,
    );
    tracing::info!(
        "{} found {} detections in {}x{} upload",
        model_info.key,
        report.detections.len(),
        report.width(),
        report.height()
    );

    let annotated_png_base64 = if render {
        Some(encode_png_base64(&detector.annotate(&report))?)
    } else {
        None
    };

    let image_path = if state.retain_uploads {
        Some(upload.persist())
    } else {
        None
    };

    Ok(Outcome {
        response: DetectionResponse {
            image_width: report.width(),
            image_height: report.height(),
            detections: report.detections,
            image_path,
            model_info,
        },
        annotated_png_base64,
    })
}
