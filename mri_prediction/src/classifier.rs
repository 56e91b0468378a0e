use crate::{
    config::ClassifierConfig,
    config::Validatable,
    error::PredictionError,
    gradcam::{saliency_map, upsample},
    overlay::{encode_png_base64, overlay},
    preprocess::{decode_image, to_standardized_tensor},
    session::SessionPool,
};
use ndarray::{Array, Array3, ArrayD, Axis, Ix4};
use serde::Serialize;
use std::sync::Arc;

/// Probabilities strictly above this are the positive class.
pub const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    NoTumor,
    Tumor,
}

impl Label {
    pub fn as_u8(&self) -> u8 {
        match self {
            Label::NoTumor => 0,
            Label::Tumor => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: Label,
    /// Raw sigmoid probability of the positive class.
    pub confidence: f32,
}

pub fn classify(probability: f32) -> Classification {
    let label = if probability > DECISION_THRESHOLD {
        Label::Tumor
    } else {
        Label::NoTumor
    };
    Classification {
        label,
        confidence: probability,
    }
}

/// What one forward pass of an explainable classifier yields for a single image.
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    pub probability: f32,
    /// Target layer activations, `[channels, height, width]`.
    pub activations: Array3<f32>,
    /// Gradient of the positive-class probability with respect to `activations`.
    pub gradients: Array3<f32>,
}

pub trait ClassifierModel: Send + Sync + 'static {
    fn forward(&self, input: &Array<f32, Ix4>) -> Result<ClassifierOutput, PredictionError>;
}

/// ONNX explainer graph: one image input, and outputs for the probability, the target
/// layer activations and their gradients.
pub struct OrtClassifier {
    pool: SessionPool,
    input_name: String,
    probability_output: String,
    activations_output: String,
    gradients_output: String,
}

impl OrtClassifier {
    pub fn load(config: &ClassifierConfig) -> Result<Self, PredictionError> {
        let pool = SessionPool::load(&config.get_path(), config.num_instances)?;
        let input_name = pool.resolve_input(config.input_name.as_deref())?;
        let probability_output = pool.resolve_output(Some(config.probability_output.as_str()))?;
        let activations_output = pool.resolve_output(Some(config.activations_output.as_str()))?;
        let gradients_output = pool.resolve_output(Some(config.gradients_output.as_str()))?;

        Ok(Self {
            pool,
            input_name,
            probability_output,
            activations_output,
            gradients_output,
        })
    }
}

fn first_in_batch(tensor: ArrayD<f32>, name: &str) -> Result<Array3<f32>, PredictionError> {
    let tensor = tensor.into_dimensionality::<Ix4>().map_err(|e| {
        PredictionError::InvalidOutput(format!("{} should be [1, C, H, W]: {}", name, e))
    })?;
    if tensor.len_of(Axis(0)) == 0 {
        return Err(PredictionError::InvalidOutput(format!("{} is empty", name)));
    }
    Ok(tensor.index_axis_move(Axis(0), 0))
}

impl ClassifierModel for OrtClassifier {
    fn forward(&self, input: &Array<f32, Ix4>) -> Result<ClassifierOutput, PredictionError> {
        let outputs = self.pool.run(
            &self.input_name,
            input,
            &[
                self.probability_output.as_str(),
                self.activations_output.as_str(),
                self.gradients_output.as_str(),
            ],
        )?;
        let [probability, activations, gradients]: [ArrayD<f32>; 3] =
            outputs.try_into().map_err(|_| {
                PredictionError::InvalidOutput("expected three classifier outputs".to_string())
            })?;

        let probability = probability.iter().next().copied().ok_or_else(|| {
            PredictionError::InvalidOutput(format!("{} is empty", self.probability_output))
        })?;

        Ok(ClassifierOutput {
            probability,
            activations: first_in_batch(activations, &self.activations_output)?,
            gradients: first_in_batch(gradients, &self.gradients_output)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub overlay_alpha: f32,
}

impl From<&ClassifierConfig> for ClassifierSettings {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            input_size: config.input_size,
            mean: config.mean,
            std: config.std,
            overlay_alpha: config.overlay_alpha,
        }
    }
}

/// The response of the classification flow. Images are base64-encoded PNGs.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainedPrediction {
    pub prediction: u8,
    pub confidence: f32,
    pub original_image: String,
    pub overlay_image: String,
}

#[derive(Clone)]
pub struct ClassifierService {
    model: Arc<dyn ClassifierModel>,
    settings: ClassifierSettings,
}

impl ClassifierService {
    pub fn new(model: impl ClassifierModel, settings: ClassifierSettings) -> Self {
        Self {
            model: Arc::new(model),
            settings,
        }
    }

    pub fn load(config: &ClassifierConfig) -> Result<Self, PredictionError> {
        Ok(Self::new(OrtClassifier::load(config)?, config.into()))
    }

    /// Classifies the image and renders the Grad-CAM overlay at the original resolution.
    pub fn explain_bytes(&self, image_data: &[u8]) -> Result<ExplainedPrediction, PredictionError> {
        let image = decode_image(image_data)?;
        let input = to_standardized_tensor(
            &image,
            self.settings.input_size,
            self.settings.mean,
            self.settings.std,
        );

        let output = self.model.forward(&input)?;
        let classification = classify(output.probability);
        tracing::debug!(
            "Classifier probability {:.4}, label {}",
            output.probability,
            classification.label.as_u8()
        );

        let side = self.settings.input_size as usize;
        let heatmap = saliency_map(
            output.activations.view(),
            output.gradients.view(),
            classification.label,
            side,
            side,
        )?;

        let original = image.to_rgb8();
        let (width, height) = original.dimensions();
        let heatmap = upsample(heatmap.view(), width as usize, height as usize);
        let blended = overlay(&original, heatmap.view(), self.settings.overlay_alpha)?;

        Ok(ExplainedPrediction {
            prediction: classification.label.as_u8(),
            confidence: classification.confidence,
            original_image: encode_png_base64(&original)?,
            overlay_image: encode_png_base64(&blended)?,
        })
    }

    /// Runs [`Self::explain_bytes`] on the blocking thread pool.
    pub async fn explain(&self, image_data: Vec<u8>) -> Result<ExplainedPrediction, PredictionError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.explain_bytes(&image_data))
            .await
            .map_err(|e| PredictionError::Inference(format!("classifier task failed: {}", e)))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{config::IMAGENET_MEAN, config::IMAGENET_STD, overlay::decode_png_base64};
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    /// Returns a fixed probability and a single hot cell in the top-left of a 7x7 layer.
    pub(crate) struct StubClassifier {
        pub probability: f32,
    }

    impl ClassifierModel for StubClassifier {
        fn forward(&self, input: &Array<f32, Ix4>) -> Result<ClassifierOutput, PredictionError> {
            assert_eq!(input.shape(), &[1, 3, 224, 224]);
            let mut activations = Array3::<f32>::zeros((1, 7, 7));
            activations[[0, 0, 0]] = 4.;
            let gradients = Array3::<f32>::from_elem((1, 7, 7), 0.25);
            Ok(ClassifierOutput {
                probability: self.probability,
                activations,
                gradients,
            })
        }
    }

    pub(crate) fn settings() -> ClassifierSettings {
        ClassifierSettings {
            input_size: 224,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            overlay_alpha: 0.5,
        }
    }

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([90, 90, 90]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        image_data
    }

    #[test]
    fn test_label_flips_at_threshold() {
        assert_eq!(classify(0.5000001).label, Label::Tumor);
        assert_eq!(classify(0.4999999).label, Label::NoTumor);
        assert_eq!(classify(0.5).label, Label::NoTumor);
        assert_eq!(classify(0.93).confidence, 0.93);
    }

    #[test]
    fn test_explain_returns_images_at_original_size() {
        let service = ClassifierService::new(StubClassifier { probability: 0.8 }, settings());

        let result = service.explain_bytes(&png(320, 200)).unwrap();

        assert_eq!(result.prediction, 1);
        assert!((result.confidence - 0.8).abs() < 1e-6);
        let original = decode_png_base64(&result.original_image).unwrap();
        let overlay = decode_png_base64(&result.overlay_image).unwrap();
        assert_eq!(original.dimensions(), (320, 200));
        assert_eq!(overlay.dimensions(), (320, 200));
        assert_eq!(*original.get_pixel(100, 100), Rgb([90, 90, 90]));
        // The hot cell sits in the top-left corner, so that corner is the reddest.
        assert!(overlay.get_pixel(0, 0).0[0] > overlay.get_pixel(319, 199).0[0]);
    }

    #[test]
    fn test_explain_negative_prediction() {
        let service = ClassifierService::new(StubClassifier { probability: 0.1 }, settings());

        let result = service.explain_bytes(&png(64, 64)).unwrap();

        assert_eq!(result.prediction, 0);
        assert!((result.confidence - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_explain_rejects_corrupt_image() {
        let service = ClassifierService::new(StubClassifier { probability: 0.8 }, settings());
        let result = service.explain_bytes(b"\x89PNG broken");
        assert!(matches!(result, Err(PredictionError::InvalidImage(_))));
    }

    #[tokio::test]
    async fn test_explain_on_blocking_pool() {
        let service = ClassifierService::new(StubClassifier { probability: 0.7 }, settings());
        let result = service.explain(png(48, 48)).await.unwrap();
        assert_eq!(result.prediction, 1);
    }
}
