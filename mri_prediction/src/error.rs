use crate::registry::ModelKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Error decoding image: {0}")]
    InvalidImage(String),
    #[error("Unsupported model: {0}")]
    UnknownModel(String),
    #[error("Model {model} is not a {expected} model")]
    WrongModelKind { model: String, expected: ModelKind },
    #[error("Model {model} is not available: weight file {path:?} not found")]
    ModelUnavailable { model: String, path: PathBuf },
    #[error("Failed to load model {path:?}: {message}")]
    ModelLoad { path: PathBuf, message: String },
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
    #[error("Failed to encode image: {0}")]
    Encoding(String),
}

/// Coarse classification used at the request boundary to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Unavailable,
    Inference,
}

impl PredictionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PredictionError::InvalidImage(_)
            | PredictionError::UnknownModel(_)
            | PredictionError::WrongModelKind { .. } => ErrorKind::Input,
            PredictionError::ModelUnavailable { .. } => ErrorKind::Unavailable,
            PredictionError::ModelLoad { .. }
            | PredictionError::Inference(_)
            | PredictionError::InvalidOutput(_)
            | PredictionError::Encoding(_) => ErrorKind::Inference,
        }
    }
}
