use crate::server::SharedState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

fn content_type(file_name: &str) -> &'static str {
    let ext = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

pub async fn serve_upload(State(state): State<SharedState>, Path(file): Path<String>) -> Response {
    let Some(path) = state.uploads.resolve(&file) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(data) => ([(header::CONTENT_TYPE, content_type(&file))], data).into_response(),
        Err(e) => {
            tracing::warn!("Failed to read upload {:?}: {}", path, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
