use crate::{
    config::{DetectorConfig, Validatable},
    detection::{decode, DecodeSettings, Detection},
    error::PredictionError,
    labels::{resolve_labels, ClassLabel},
    overlay::annotate,
    preprocess::{decode_image, to_unit_tensor, FrameScale},
    session::SessionPool,
};
use image::RgbImage;
use ndarray::{Array, ArrayD, Ix4};
use std::sync::Arc;

pub trait DetectorModel: Send + Sync + 'static {
    /// Raw anchor output for one `[1, 3, S, S]` input.
    fn infer(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, PredictionError>;
}

pub struct OrtDetector {
    pool: SessionPool,
    input_name: String,
    output_name: String,
}

impl OrtDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self, PredictionError> {
        let pool = SessionPool::load(&config.get_path(), config.num_instances)?;
        let input_name = pool.resolve_input(config.input_name.as_deref())?;
        let output_name = pool.resolve_output(config.output_name.as_deref())?;

        Ok(Self {
            pool,
            input_name,
            output_name,
        })
    }
}

impl DetectorModel for OrtDetector {
    fn infer(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, PredictionError> {
        self.pool
            .run(&self.input_name, input, &[self.output_name.as_str()])?
            .pop()
            .ok_or_else(|| PredictionError::InvalidOutput(format!("{} missing", self.output_name)))
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub input_size: u32,
    pub decode: DecodeSettings,
    pub labels: Vec<ClassLabel>,
}

impl DetectorSettings {
    pub fn from_config(config: &DetectorConfig) -> Result<Self, PredictionError> {
        let labels = resolve_labels(config.labels.as_ref()).map_err(|message| {
            PredictionError::ModelLoad {
                path: config.get_path(),
                message,
            }
        })?;

        Ok(Self {
            input_size: config.input_size,
            decode: DecodeSettings {
                confidence_threshold: config.confidence_threshold,
                iou_threshold: config.iou_threshold,
                policy: config.policy,
                layout: config.layout,
            },
            labels,
        })
    }
}

/// Detections for one image, together with the decoded image they refer to.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    pub image: RgbImage,
}

impl DetectionReport {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Clone)]
pub struct DetectorService {
    model: Arc<dyn DetectorModel>,
    settings: Arc<DetectorSettings>,
}

impl DetectorService {
    pub fn new(model: impl DetectorModel, settings: DetectorSettings) -> Self {
        Self {
            model: Arc::new(model),
            settings: Arc::new(settings),
        }
    }

    pub fn load(config: &DetectorConfig) -> Result<Self, PredictionError> {
        let settings = DetectorSettings::from_config(config)?;
        Ok(Self::new(OrtDetector::load(config)?, settings))
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn detect_bytes(&self, image_data: &[u8]) -> Result<DetectionReport, PredictionError> {
        let image = decode_image(image_data)?;
        let scale = FrameScale::new(&image, self.settings.input_size);
        let input = to_unit_tensor(&image, self.settings.input_size);

        let output = self.model.infer(&input)?;
        let detections = decode(&output, &scale, &self.settings.decode, &self.settings.labels)?;

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_label,
                detection.confidence,
                detection.bbox.x1,
                detection.bbox.y1,
                detection.bbox.x2,
                detection.bbox.y2
            );
        }

        Ok(DetectionReport {
            detections,
            image: image.to_rgb8(),
        })
    }

    /// Runs [`Self::detect_bytes`] on the blocking thread pool.
    pub async fn detect(&self, image_data: Vec<u8>) -> Result<DetectionReport, PredictionError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect_bytes(&image_data))
            .await
            .map_err(|e| PredictionError::Inference(format!("detector task failed: {}", e)))?
    }

    /// The report's image with every detection box drawn on it.
    pub fn annotate(&self, report: &DetectionReport) -> RgbImage {
        annotate(&report.image, &report.detections, &self.settings.labels)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{detection::BoundingBox, labels::default_labels};
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    /// Replays a fixed set of anchor rows regardless of the input.
    pub(crate) struct StubDetector {
        pub rows: Vec<[f32; 6]>,
    }

    impl DetectorModel for StubDetector {
        fn infer(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, PredictionError> {
            assert_eq!(input.shape(), &[1, 3, 640, 640]);
            let flat: Vec<f32> = self.rows.iter().flatten().copied().collect();
            Ok(Array::from_shape_vec((1, self.rows.len(), 6), flat)
                .map_err(|e| PredictionError::InvalidOutput(e.to_string()))?
                .into_dyn())
        }
    }

    pub(crate) fn settings() -> DetectorSettings {
        DetectorSettings {
            input_size: 640,
            decode: DecodeSettings::default(),
            labels: default_labels(),
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([30, 30, 30]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        image_data
    }

    #[test]
    fn test_detect_single_tumor_end_to_end() {
        let service = DetectorService::new(
            StubDetector {
                rows: vec![[320., 320., 100., 100., 0.9, 0.9]],
            },
            settings(),
        );

        let report = service.detect_bytes(&png(640, 640)).unwrap();

        assert_eq!((report.width(), report.height()), (640, 640));
        assert_eq!(report.detections.len(), 1);
        let detection = &report.detections[0];
        assert_eq!(
            detection.bbox,
            BoundingBox {
                x1: 270.,
                y1: 270.,
                x2: 370.,
                y2: 370.
            }
        );
        assert!((detection.confidence - 0.9).abs() < 1e-6);
        assert_eq!(detection.class_label, "Tumor");
    }

    #[test]
    fn test_detect_scales_to_original_image() {
        let service = DetectorService::new(
            StubDetector {
                rows: vec![[320., 320., 100., 100., 0.9, 0.9]],
            },
            settings(),
        );

        let report = service.detect_bytes(&png(320, 1280)).unwrap();

        let bbox = report.detections[0].bbox;
        assert_eq!((bbox.x1, bbox.x2), (135., 185.));
        assert_eq!((bbox.y1, bbox.y2), (540., 740.));
    }

    #[test]
    fn test_annotate_keeps_image_size() {
        let service = DetectorService::new(
            StubDetector {
                rows: vec![[320., 320., 100., 100., 0.9, 0.9]],
            },
            settings(),
        );
        let report = service.detect_bytes(&png(640, 640)).unwrap();

        let annotated = service.annotate(&report);

        assert_eq!(annotated.dimensions(), (640, 640));
        assert_eq!(*annotated.get_pixel(270, 300), Rgb([255, 0, 0]));
    }

    #[tokio::test]
    async fn test_detect_on_blocking_pool_rejects_corrupt_image() {
        let service = DetectorService::new(StubDetector { rows: vec![] }, settings());
        let result = service.detect(b"not an image".to_vec()).await;
        assert!(matches!(result, Err(PredictionError::InvalidImage(_))));
    }
}
