//! Placeholder models whose outputs are constants, for running the server without trained
//! weights.

use crate::onnx::{
    tensor_shape_proto::{dimension, Dimension},
    type_proto, AttributeProto, AttributeType, GraphProto, ModelProto, NodeProto,
    OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto, FLOAT,
};
use prost::Message;

const IR_VERSION: i64 = 7;
const OPSET_VERSION: i64 = 12;

/// One anchor row `[cx, cy, w, h, confidence, class score]` in 640x640 input space.
pub const DETECTOR_ROW: [f32; 6] = [320., 320., 100., 100., 0.9, 0.9];

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierStub {
    pub probability: f32,
    pub channels: usize,
    /// Side of the square activation grid.
    pub grid: usize,
}

impl Default for ClassifierStub {
    fn default() -> Self {
        Self {
            probability: 0.9,
            channels: 8,
            grid: 7,
        }
    }
}

fn tensor_info(name: &str, dims: &[i64]) -> ValueInfoProto {
    let dim = dims
        .iter()
        .map(|&d| Dimension {
            denotation: String::new(),
            value: Some(dimension::Value::DimValue(d)),
        })
        .collect();

    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            denotation: String::new(),
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: FLOAT,
                shape: Some(TensorShapeProto { dim }),
            })),
        }),
        doc_string: String::new(),
    }
}

fn constant(output: &str, dims: &[i64], values: Vec<f32>) -> NodeProto {
    let value = TensorProto {
        dims: dims.to_vec(),
        data_type: FLOAT,
        float_data: values,
        name: format!("{}_value", output),
        ..Default::default()
    };

    NodeProto {
        output: vec![output.to_string()],
        name: format!("{}_constant", output),
        op_type: "Constant".to_string(),
        attribute: vec![AttributeProto {
            name: "value".to_string(),
            r#type: AttributeType::Tensor as i32,
            t: Some(value),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn model(graph: GraphProto) -> ModelProto {
    ModelProto {
        ir_version: IR_VERSION,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: OPSET_VERSION,
        }],
        producer_name: "onnx_stub".to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        graph: Some(graph),
        ..Default::default()
    }
}

/// `images [1, 3, 640, 640]` to `output [1, 1, 6]` holding [`DETECTOR_ROW`].
pub fn detector_stub() -> ModelProto {
    let output_dims = [1, 1, DETECTOR_ROW.len() as i64];
    model(GraphProto {
        name: "detector_stub".to_string(),
        node: vec![constant("output", &output_dims, DETECTOR_ROW.to_vec())],
        input: vec![tensor_info("images", &[1, 3, 640, 640])],
        output: vec![tensor_info("output", &output_dims)],
        ..Default::default()
    })
}

/// `input [1, 3, 224, 224]` to `probability`, `activations` and `gradients`.
///
/// The activations are zero except for the centre cell of every channel and the gradients
/// are uniform, so the resulting saliency map peaks in the middle of the image.
pub fn classifier_stub(stub: &ClassifierStub) -> ModelProto {
    let (c, g) = (stub.channels, stub.grid);
    let grid_dims = [1, c as i64, g as i64, g as i64];

    let mut activations = vec![0.; c * g * g];
    let centre = (g / 2) * g + g / 2;
    for channel in 0..c {
        activations[channel * g * g + centre] = 1.;
    }
    let gradients = vec![1. / (g * g) as f32; c * g * g];

    model(GraphProto {
        name: "classifier_stub".to_string(),
        node: vec![
            constant("probability", &[1, 1], vec![stub.probability]),
            constant("activations", &grid_dims, activations),
            constant("gradients", &grid_dims, gradients),
        ],
        input: vec![tensor_info("input", &[1, 3, 224, 224])],
        output: vec![
            tensor_info("probability", &[1, 1]),
            tensor_info("activations", &grid_dims),
            tensor_info("gradients", &grid_dims),
        ],
        ..Default::default()
    })
}

pub fn to_bytes(model: &ModelProto) -> Vec<u8> {
    model.encode_to_vec()
}
