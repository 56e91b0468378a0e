pub mod onnx;
pub mod stub;

pub use stub::{classifier_stub, detector_stub, ClassifierStub};
