use crate::templates;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use mri_prediction::{ErrorKind, PredictionError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("Missing form field: {0}")]
    MissingField(&'static str),
    #[error("Invalid multipart body: {0}")]
    Multipart(String),
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Failed to store upload: {0}")]
    Upload(#[from] std::io::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Prediction(e) => match e.kind() {
                ErrorKind::Input => StatusCode::BAD_REQUEST,
                ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Inference => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::MissingField(_) | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label for the failure.
    pub fn kind_label(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => "input",
            StatusCode::SERVICE_UNAVAILABLE => "unavailable",
            _ => "inference",
        }
    }

    fn log(&self) {
        if self.status().is_server_error() && self.status() != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        (
            self.status(),
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Same statuses as [`ApiError`], rendered as an HTML error page.
#[derive(Debug)]
pub struct HtmlError(pub ApiError);

impl From<ApiError> for HtmlError {
    fn from(err: ApiError) -> Self {
        HtmlError(err)
    }
}

impl IntoResponse for HtmlError {
    fn into_response(self) -> Response {
        self.0.log();
        let status = self.0.status();
        (status, Html(templates::error_page(status, &self.0.to_string()))).into_response()
    }
}
