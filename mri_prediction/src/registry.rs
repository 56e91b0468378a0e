//! The set of models a process serves, loaded once at startup.
//!
//! Each configured model is checked for its weight file before anything is loaded. Missing
//! files leave an unavailable entry behind, so lookups answer with
//! [`PredictionError::ModelUnavailable`] instead of failing inside inference.

use crate::{
    classifier::ClassifierService,
    config::{ModelsConfig, Validatable},
    detector::DetectorService,
    error::PredictionError,
};
use serde::Serialize;
use std::{fmt, path::PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Classifier,
    Detector,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Classifier => write!(f, "classifier"),
            ModelKind::Detector => write!(f, "detector"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub key: String,
    pub name: String,
    pub kind: ModelKind,
    pub description: String,
    pub available: bool,
}

impl ModelDescriptor {
    pub fn new(key: &str, name: &str, kind: ModelKind, description: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            kind,
            description: description.to_string(),
            available: true,
        }
    }

    fn matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key) || self.name.eq_ignore_ascii_case(key)
    }
}

enum Slot {
    Classifier(ClassifierService),
    Detector(DetectorService),
    Unavailable(PathBuf),
}

struct Entry {
    descriptor: ModelDescriptor,
    slot: Slot,
}

#[derive(Default)]
pub struct ModelRegistry {
    entries: Vec<Entry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every configured model whose weight file exists.
    pub fn load(config: &ModelsConfig) -> Result<Self, PredictionError> {
        let mut registry = Self::new();

        for classifier in &config.classifiers {
            let descriptor = ModelDescriptor::new(
                &classifier.key,
                &classifier.name,
                ModelKind::Classifier,
                &classifier.description,
            );
            registry = match classifier.validate() {
                Ok(()) => registry.with_classifier(descriptor, ClassifierService::load(classifier)?),
                Err(e) => {
                    tracing::warn!("{}; {} will be reported as unavailable", e, classifier.key);
                    registry.with_unavailable(descriptor, classifier.get_path())
                }
            };
        }

        for detector in &config.detectors {
            let descriptor = ModelDescriptor::new(
                &detector.key,
                &detector.name,
                ModelKind::Detector,
                &detector.description,
            );
            registry = match detector.validate() {
                Ok(()) => registry.with_detector(descriptor, DetectorService::load(detector)?),
                Err(e) => {
                    tracing::warn!("{}; {} will be reported as unavailable", e, detector.key);
                    registry.with_unavailable(descriptor, detector.get_path())
                }
            };
        }

        tracing::info!(
            "Model registry ready: {} of {} models available",
            registry.entries.iter().filter(|e| e.descriptor.available).count(),
            registry.entries.len()
        );
        Ok(registry)
    }

    pub fn with_classifier(mut self, mut descriptor: ModelDescriptor, service: ClassifierService) -> Self {
        descriptor.kind = ModelKind::Classifier;
        descriptor.available = true;
        self.entries.push(Entry {
            descriptor,
            slot: Slot::Classifier(service),
        });
        self
    }

    pub fn with_detector(mut self, mut descriptor: ModelDescriptor, service: DetectorService) -> Self {
        descriptor.kind = ModelKind::Detector;
        descriptor.available = true;
        self.entries.push(Entry {
            descriptor,
            slot: Slot::Detector(service),
        });
        self
    }

    pub fn with_unavailable(mut self, mut descriptor: ModelDescriptor, path: PathBuf) -> Self {
        descriptor.available = false;
        self.entries.push(Entry {
            descriptor,
            slot: Slot::Unavailable(path),
        });
        self
    }

    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn descriptor(&self, key: &str) -> Option<&ModelDescriptor> {
        self.entry(key).map(|e| &e.descriptor)
    }

    fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.descriptor.matches(key))
    }

    fn gate(&self, key: &str, expected: ModelKind) -> Result<&Entry, PredictionError> {
        let entry = self
            .entry(key)
            .ok_or_else(|| PredictionError::UnknownModel(key.to_string()))?;
        if entry.descriptor.kind != expected {
            return Err(PredictionError::WrongModelKind {
                model: entry.descriptor.name.clone(),
                expected,
            });
        }
        Ok(entry)
    }

    pub fn classifier(&self, key: &str) -> Result<&ClassifierService, PredictionError> {
        let entry = self.gate(key, ModelKind::Classifier)?;
        match &entry.slot {
            Slot::Classifier(service) => Ok(service),
            _ => Err(unavailable(entry)),
        }
    }

    pub fn detector(&self, key: &str) -> Result<&DetectorService, PredictionError> {
        let entry = self.gate(key, ModelKind::Detector)?;
        match &entry.slot {
            Slot::Detector(service) => Ok(service),
            _ => Err(unavailable(entry)),
        }
    }
}

fn unavailable(entry: &Entry) -> PredictionError {
    let path = match &entry.slot {
        Slot::Unavailable(path) => path.clone(),
        _ => PathBuf::new(),
    };
    PredictionError::ModelUnavailable {
        model: entry.descriptor.name.clone(),
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::tests::{settings as classifier_settings, StubClassifier},
        config::{ClassifierConfig, DetectorConfig},
        detector::tests::{settings as detector_settings, StubDetector},
        detection::{AnchorLayout, DecodePolicy},
        error::ErrorKind,
    };

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_classifier(
                ModelDescriptor::new("vgg16", "VGG16", ModelKind::Classifier, "Grad-CAM"),
                ClassifierService::new(StubClassifier { probability: 0.9 }, classifier_settings()),
            )
            .with_detector(
                ModelDescriptor::new("yolo", "YOLO Model", ModelKind::Detector, "boxes"),
                DetectorService::new(StubDetector { rows: vec![] }, detector_settings()),
            )
            .with_unavailable(
                ModelDescriptor::new("yolov12", "YOLOv12", ModelKind::Detector, "soon"),
                PathBuf::from("models/yolov12.onnx"),
            )
    }

    #[test]
    fn test_lookup_is_case_insensitive_on_key_and_name() {
        let registry = registry();
        assert!(registry.classifier("VGG16").is_ok());
        assert!(registry.classifier("vgg16").is_ok());
        assert!(registry.detector("YOLO Model").is_ok());
    }

    #[test]
    fn test_unavailable_model_is_gated() {
        let registry = registry();
        let err = registry.detector("yolov12").err().unwrap();
        assert!(matches!(err, PredictionError::ModelUnavailable { .. }));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_wrong_kind_and_unknown_are_input_errors() {
        let registry = registry();
        let wrong = registry.classifier("yolo").err().unwrap();
        assert!(matches!(wrong, PredictionError::WrongModelKind { .. }));
        let unknown = registry.detector("resnet").err().unwrap();
        assert!(matches!(unknown, PredictionError::UnknownModel(_)));
        assert_eq!(unknown.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_descriptors_report_availability() {
        let available: Vec<(String, bool)> = registry()
            .descriptors()
            .into_iter()
            .map(|d| (d.key, d.available))
            .collect();
        assert_eq!(
            available,
            vec![
                ("vgg16".to_string(), true),
                ("yolo".to_string(), true),
                ("yolov12".to_string(), false)
            ]
        );
    }

    #[test]
    fn test_load_with_missing_weights_marks_models_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelsConfig {
            classifiers: vec![ClassifierConfig {
                key: "vgg16".to_string(),
                name: "VGG16".to_string(),
                description: String::new(),
                model_dir: dir.path().to_path_buf(),
                onnx_file: "vgg16_gradcam.onnx".to_string(),
                input_name: None,
                probability_output: "probability".to_string(),
                activations_output: "activations".to_string(),
                gradients_output: "gradients".to_string(),
                input_size: 224,
                mean: [0.485, 0.456, 0.406],
                std: [0.229, 0.224, 0.225],
                overlay_alpha: 0.5,
                num_instances: 1,
            }],
            detectors: vec![DetectorConfig {
                key: "yolo".to_string(),
                name: "YOLO Model".to_string(),
                description: String::new(),
                model_dir: dir.path().to_path_buf(),
                onnx_file: "best.onnx".to_string(),
                input_name: None,
                output_name: None,
                input_size: 640,
                confidence_threshold: 0.25,
                iou_threshold: None,
                policy: DecodePolicy::All,
                layout: AnchorLayout::Rows,
                labels: None,
                num_instances: 1,
            }],
        };

        let registry = ModelRegistry::load(&config).unwrap();

        assert!(registry.descriptors().iter().all(|d| !d.available));
        let err = registry.detector("yolo").err().unwrap();
        match err {
            PredictionError::ModelUnavailable { model, path } => {
                assert_eq!(model, "YOLO Model");
                assert_eq!(path, dir.path().join("best.onnx"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            registry.classifier("vgg16"),
            Err(PredictionError::ModelUnavailable { .. })
        ));
    }
}
