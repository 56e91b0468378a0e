//! Gradient-weighted class activation maps.
//!
//! The functions here only see the forward activations of the target convolutional layer and
//! the gradients of the class score with respect to them; how those gradients were obtained
//! is up to the model implementation.

use crate::{classifier::Label, error::PredictionError};
use ndarray::{Array2, ArrayView2, ArrayView3};

/// Weighted channel sum clipped at zero, at the resolution of the target layer.
///
/// Each channel is weighted by its spatially averaged gradient. The gradients are taken for
/// the positive class, so their sign is flipped when the prediction is the negative class.
pub fn grad_cam(
    activations: ArrayView3<f32>,
    gradients: ArrayView3<f32>,
    label: Label,
) -> Result<Array2<f32>, PredictionError> {
    if activations.shape() != gradients.shape() {
        return Err(PredictionError::InvalidOutput(format!(
            "activations {:?} and gradients {:?} differ in shape",
            activations.shape(),
            gradients.shape()
        )));
    }

    let (channels, height, width) = activations.dim();
    if channels == 0 || height == 0 || width == 0 {
        return Err(PredictionError::InvalidOutput(format!(
            "empty target layer of shape {:?}",
            activations.shape()
        )));
    }

    let sign = match label {
        Label::Tumor => 1.,
        Label::NoTumor => -1.,
    };

    let mut cam = Array2::<f32>::zeros((height, width));
    for (activation, gradient) in activations.outer_iter().zip(gradients.outer_iter()) {
        let weight = sign * gradient.mean().unwrap_or(0.);
        cam.scaled_add(weight, &activation);
    }
    cam.mapv_inplace(|v| v.max(0.));

    Ok(cam)
}

/// Bilinear resize using pixel-center alignment.
pub fn upsample(map: ArrayView2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (src_h, src_w) = map.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((height, width));
    }

    let sample = |dst: usize, src_len: usize, dst_len: usize| -> (usize, usize, f32) {
        let ratio = src_len as f32 / dst_len as f32;
        let pos = ((dst as f32 + 0.5) * ratio - 0.5).clamp(0., (src_len - 1) as f32);
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(src_len - 1);
        (lo, hi, pos - lo as f32)
    };

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1, dy) = sample(y, src_h, height);
        let (x0, x1, dx) = sample(x, src_w, width);
        let top = map[[y0, x0]] * (1. - dx) + map[[y0, x1]] * dx;
        let bottom = map[[y1, x0]] * (1. - dx) + map[[y1, x1]] * dx;
        top * (1. - dy) + bottom * dy
    })
}

/// Min-max normalization to [0, 1]. A constant map has no salient region and becomes zeros.
pub fn normalize(map: ArrayView2<f32>) -> Array2<f32> {
    let (lo, hi) = map
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    let range = hi - lo;
    if !(range > f32::EPSILON) {
        return Array2::zeros(map.raw_dim());
    }
    map.mapv(|v| ((v - lo) / range).clamp(0., 1.))
}

/// Full saliency computation: Grad-CAM, upsampled to `width` x `height`, normalized.
pub fn saliency_map(
    activations: ArrayView3<f32>,
    gradients: ArrayView3<f32>,
    label: Label,
    width: usize,
    height: usize,
) -> Result<Array2<f32>, PredictionError> {
    let cam = grad_cam(activations, gradients, label)?;
    let upsampled = upsample(cam.view(), width, height);
    Ok(normalize(upsampled.view()))
}

/// Location of the largest value as `(row, column)`.
pub fn argmax(map: ArrayView2<f32>) -> Option<(usize, usize)> {
    map.indexed_iter()
        .fold(None, |best: Option<((usize, usize), f32)>, (index, &v)| match best {
            Some((_, top)) if top >= v => best,
            _ => Some((index, v)),
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Axis};

    /// Two 7x7 channels: channel 0 has one hot cell and a positive gradient, channel 1 is
    /// uniformly active but has zero gradient.
    fn hot_spot_layer(row: usize, col: usize) -> (Array3<f32>, Array3<f32>) {
        let mut activations = Array3::<f32>::zeros((2, 7, 7));
        activations[[0, row, col]] = 10.;
        activations.index_axis_mut(Axis(0), 1).fill(3.);

        let mut gradients = Array3::<f32>::zeros((2, 7, 7));
        gradients.index_axis_mut(Axis(0), 0).fill(0.5);
        (activations, gradients)
    }

    #[test]
    fn test_grad_cam_weights_channels_by_mean_gradient() {
        let activations = Array3::from_shape_vec((2, 1, 2), vec![1., 2., 4., 0.]).unwrap();
        let gradients = Array3::from_shape_vec((2, 1, 2), vec![1., 3., -1., -1.]).unwrap();

        let cam = grad_cam(activations.view(), gradients.view(), Label::Tumor).unwrap();

        // weights: channel 0 -> 2, channel 1 -> -1
        assert_eq!(cam, Array2::from_shape_vec((1, 2), vec![0., 4.]).unwrap());
    }

    #[test]
    fn test_grad_cam_flips_sign_for_negative_class() {
        let activations = Array3::from_shape_vec((1, 1, 2), vec![1., 2.]).unwrap();
        let gradients = Array3::from_shape_vec((1, 1, 2), vec![-1., -1.]).unwrap();

        let positive = grad_cam(activations.view(), gradients.view(), Label::Tumor).unwrap();
        let negative = grad_cam(activations.view(), gradients.view(), Label::NoTumor).unwrap();

        assert!(positive.iter().all(|&v| v == 0.));
        assert_eq!(negative, Array2::from_shape_vec((1, 2), vec![1., 2.]).unwrap());
    }

    #[test]
    fn test_grad_cam_rejects_mismatched_shapes() {
        let activations = Array3::<f32>::zeros((2, 7, 7));
        let gradients = Array3::<f32>::zeros((2, 14, 14));
        let result = grad_cam(activations.view(), gradients.view(), Label::Tumor);
        assert!(matches!(result, Err(PredictionError::InvalidOutput(_))));
    }

    #[test]
    fn test_saliency_is_normalized_and_peaks_at_hot_spot() {
        let (activations, gradients) = hot_spot_layer(2, 5);

        let map = saliency_map(activations.view(), gradients.view(), Label::Tumor, 224, 224)
            .unwrap();

        assert_eq!(map.dim(), (224, 224));
        assert!(map.iter().all(|&v| (0. ..=1.).contains(&v)));
        let max = map.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!((max - 1.).abs() < 1e-6);

        // Each source cell covers 32x32 output pixels.
        let (row, col) = argmax(map.view()).unwrap();
        assert_eq!(row / 32, 2);
        assert_eq!(col / 32, 5);
    }

    #[test]
    fn test_normalize_constant_map_is_zero() {
        let map = Array2::<f32>::from_elem((4, 4), 3.);
        let normalized = normalize(map.view());
        assert!(normalized.iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_upsample_preserves_corners_and_range() {
        let map = Array2::from_shape_vec((2, 2), vec![0., 1., 2., 3.]).unwrap();
        let up = upsample(map.view(), 8, 8);

        assert_eq!(up.dim(), (8, 8));
        assert_eq!(up[[0, 0]], 0.);
        assert_eq!(up[[7, 7]], 3.);
        assert!(up.iter().all(|&v| (0. ..=3.).contains(&v)));
        assert!(up.index_axis(Axis(0), 4).iter().all(|&v| v >= 1.));
    }
}
