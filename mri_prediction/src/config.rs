use crate::detection::{AnchorLayout, DecodePolicy};
use serde::Deserialize;
use std::path::PathBuf;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub classifiers: Vec<ClassifierConfig>,
    #[serde(default)]
    pub detectors: Vec<DetectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model_dir: PathBuf,
    pub onnx_file: String,
    /// Falls back to the first input declared by the graph.
    #[serde(default)]
    pub input_name: Option<String>,
    #[serde(default = "default_probability_output")]
    pub probability_output: String,
    #[serde(default = "default_activations_output")]
    pub activations_output: String,
    #[serde(default = "default_gradients_output")]
    pub gradients_output: String,
    #[serde(default = "default_classifier_input_size")]
    pub input_size: u32,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    #[serde(default = "default_overlay_alpha")]
    pub overlay_alpha: f32,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

impl Validatable for ClassifierConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default)]
    pub input_name: Option<String>,
    /// Falls back to the first output declared by the graph.
    #[serde(default)]
    pub output_name: Option<String>,
    #[serde(default = "default_detector_input_size")]
    pub input_size: u32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Enables non-maximum suppression under the `all` policy.
    #[serde(default)]
    pub iou_threshold: Option<f32>,
    #[serde(default)]
    pub policy: DecodePolicy,
    #[serde(default)]
    pub layout: AnchorLayout,
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

impl Validatable for DetectorConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Labels file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_probability_output() -> String {
    "probability".to_string()
}

fn default_activations_output() -> String {
    "activations".to_string()
}

fn default_gradients_output() -> String {
    "gradients".to_string()
}

fn default_classifier_input_size() -> u32 {
    224
}

fn default_detector_input_size() -> u32 {
    640
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_overlay_alpha() -> f32 {
    0.5
}

fn default_mean() -> [f32; 3] {
    IMAGENET_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_STD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_path_joins_dir_and_file() {
        let config = LabelsConfig {
            labels_file: "labels.txt".to_string(),
            labels_dir: PathBuf::from("./models"),
        };
        assert_eq!(config.get_path(), PathBuf::from("./models/labels.txt"));
    }

    #[test]
    fn test_validate_reports_missing_file() {
        let config = LabelsConfig {
            labels_file: "missing.txt".to_string(),
            labels_dir: PathBuf::from("./does-not-exist"),
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("Labels file not found"));
    }
}
