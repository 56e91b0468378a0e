//! Decoding of raw detector anchor rows into boxes in original-image pixel space.

use crate::{
    error::PredictionError,
    labels::{label_name, ClassLabel},
    preprocess::FrameScale,
};
use ndarray::{ArrayD, ArrayView2, Axis, Ix2, Ix3};
use serde::{Deserialize, Serialize};

/// Column holding the objectness / confidence score of an anchor row.
const CONFIDENCE_INDEX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    fn intersection(&self, other: &BoundingBox) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w.max(0.) * h.max(0.)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0. {
            return 0.;
        }
        intersection / union
    }
}

/// One reported detection. `confidence` is the raw [0, 1] score of the anchor row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_probability: Option<f32>,
    pub class_id: usize,
    pub class_label: String,
}

/// Which accepted anchor rows become detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Every row above the threshold as an independent detection.
    #[default]
    All,
    /// Only the highest-confidence row above the threshold.
    Best,
}

/// How anchors are laid out in the detector output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorLayout {
    /// `[1, anchors, attributes]`
    #[default]
    Rows,
    /// `[1, attributes, anchors]`, the native YOLOv8 export.
    Columns,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeSettings {
    pub confidence_threshold: f32,
    /// Non-maximum suppression over the accepted rows, off unless set.
    pub iou_threshold: Option<f32>,
    pub policy: DecodePolicy,
    pub layout: AnchorLayout,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: None,
            policy: DecodePolicy::All,
            layout: AnchorLayout::Rows,
        }
    }
}

fn anchor_rows(output: &ArrayD<f32>, layout: AnchorLayout) -> Result<ArrayView2<'_, f32>, PredictionError> {
    let rows = match output.ndim() {
        3 => output
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|e| PredictionError::InvalidOutput(e.to_string()))
            .and_then(|batch| {
                if batch.len_of(Axis(0)) == 0 {
                    return Err(PredictionError::InvalidOutput(
                        "detector output has an empty batch".to_string(),
                    ));
                }
                Ok(batch.index_axis_move(Axis(0), 0))
            })?,
        2 => output
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| PredictionError::InvalidOutput(e.to_string()))?,
        _ => {
            return Err(PredictionError::InvalidOutput(format!(
                "expected a [1, N, D] detector output, got shape {:?}",
                output.shape()
            )))
        }
    };

    let rows = match layout {
        AnchorLayout::Rows => rows,
        AnchorLayout::Columns => rows.reversed_axes(),
    };

    if rows.ncols() <= CONFIDENCE_INDEX {
        return Err(PredictionError::InvalidOutput(format!(
            "anchor rows need at least {} values, got {}",
            CONFIDENCE_INDEX + 1,
            rows.ncols()
        )));
    }

    Ok(rows)
}

/// Decodes the raw detector output for one image.
///
/// Rows are accepted only when their confidence is strictly above the threshold. Corners are
/// scaled per axis back to the original image and clamped to its bounds; boxes left with no
/// area are dropped.
pub fn decode(
    output: &ArrayD<f32>,
    scale: &FrameScale,
    settings: &DecodeSettings,
    labels: &[ClassLabel],
) -> Result<Vec<Detection>, PredictionError> {
    let rows = anchor_rows(output, settings.layout)?;
    let x_factor = scale.x_factor();
    let y_factor = scale.y_factor();
    let max_x = scale.original_width as f32;
    let max_y = scale.original_height as f32;

    let mut boxes = Vec::new();
    for row in rows.axis_iter(Axis(0)) {
        let confidence = row[CONFIDENCE_INDEX];
        // NaN never passes.
        if !(confidence > settings.confidence_threshold) {
            continue;
        }

        let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
        let bbox = BoundingBox {
            x1: ((xc - w / 2.) * x_factor).clamp(0., max_x),
            y1: ((yc - h / 2.) * y_factor).clamp(0., max_y),
            x2: ((xc + w / 2.) * x_factor).clamp(0., max_x),
            y2: ((yc + h / 2.) * y_factor).clamp(0., max_y),
        };
        if !(bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2) {
            continue;
        }

        let class_scores = row.slice(ndarray::s![CONFIDENCE_INDEX + 1..]);
        let class_id = class_scores
            .iter()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
            .map(|(index, _)| index)
            .unwrap_or(0);

        boxes.push(Detection {
            bbox,
            confidence: confidence.min(1.),
            class_probability: class_scores.iter().next().copied(),
            class_id,
            class_label: label_name(labels, class_id),
        });
    }

    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let detections = match settings.policy {
        DecodePolicy::Best => boxes.into_iter().take(1).collect(),
        DecodePolicy::All => match settings.iou_threshold {
            Some(iou_threshold) => non_max_suppression(boxes, iou_threshold),
            None => boxes,
        },
    };

    Ok(detections)
}

/// Greedy suppression over detections already sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|candidate| best.bbox.iou(&candidate.bbox) < iou_threshold);
        result.push(best);
    }

    result
}
