use crate::error::ApiError;
use axum::{
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
};
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub data: Bytes,
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::Multipart(e.body_text())
    }
}

/// A multipart form with at most one `file` part and any number of text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(multipart_error)?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == "file" {
                let file_name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(multipart_error)?;
                form.file = Some(UploadedFile { file_name, data });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    pub fn take_file(&mut self) -> Result<UploadedFile, ApiError> {
        self.file
            .take()
            .filter(|file| !file.data.is_empty())
            .ok_or(ApiError::MissingField("file"))
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, name: &'static str) -> Result<&str, ApiError> {
        self.field(name).ok_or(ApiError::MissingField(name))
    }
}
