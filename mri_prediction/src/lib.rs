pub mod classifier;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod gradcam;
pub mod labels;
pub mod overlay;
pub mod preprocess;
pub mod registry;
mod session;

pub use classifier::{ClassifierModel, ClassifierService, ExplainedPrediction};
pub use detection::{BoundingBox, Detection};
pub use detector::{DetectionReport, DetectorModel, DetectorService};
pub use error::{ErrorKind, PredictionError};
pub use registry::{ModelDescriptor, ModelKind, ModelRegistry};
