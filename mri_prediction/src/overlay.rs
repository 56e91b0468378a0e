use crate::{detection::Detection, error::PredictionError, labels::ClassLabel};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use ndarray::ArrayView2;
use std::io::Cursor;

const BOX_THICKNESS: u32 = 2;
const FALLBACK_BOX_COLOR: [u8; 3] = [0, 255, 0];

/// The JET colormap: blue for 0 through cyan, yellow and red for 1.
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0., 1.);
    let channel = |offset: f32| -> u8 {
        let c = (1.5 - (4. * v - offset).abs()).clamp(0., 1.);
        (c * 255.).round() as u8
    };
    Rgb([channel(3.), channel(2.), channel(1.)])
}

/// Blends the colorized heatmap over `base`: `(1 - alpha) * base + alpha * heat`.
pub fn overlay(
    base: &RgbImage,
    heatmap: ArrayView2<f32>,
    alpha: f32,
) -> Result<RgbImage, PredictionError> {
    let (height, width) = heatmap.dim();
    if (width as u32, height as u32) != base.dimensions() {
        return Err(PredictionError::Encoding(format!(
            "heatmap is {}x{} but the image is {}x{}",
            width,
            height,
            base.width(),
            base.height()
        )));
    }

    let a = alpha.clamp(0., 1.);
    let mut out = base.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let heat = jet(heatmap[[y as usize, x as usize]]);
        for channel in 0..3 {
            let blended = (1. - a) * pixel.0[channel] as f32 + a * heat.0[channel] as f32;
            pixel.0[channel] = blended.round().clamp(0., 255.) as u8;
        }
    }
    Ok(out)
}

/// Draws each detection box in the color of its class.
pub fn annotate(image: &RgbImage, detections: &[Detection], labels: &[ClassLabel]) -> RgbImage {
    let mut annotated = image.clone();
    for detection in detections {
        let color = labels
            .get(detection.class_id)
            .map(|l| l.rgb())
            .unwrap_or(FALLBACK_BOX_COLOR);

        let bbox = detection.bbox;
        let x = bbox.x1.floor() as i32;
        let y = bbox.y1.floor() as i32;
        let width = bbox.width().round().max(1.) as u32;
        let height = bbox.height().round().max(1.) as u32;

        for t in 0..BOX_THICKNESS {
            if width <= 2 * t || height <= 2 * t {
                break;
            }
            let rect = Rect::at(x + t as i32, y + t as i32).of_size(width - 2 * t, height - 2 * t);
            draw_hollow_rect_mut(&mut annotated, rect, Rgb(color));
        }
    }
    annotated
}

pub fn encode_png_base64(image: &RgbImage) -> Result<String, PredictionError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .map_err(|e| PredictionError::Encoding(e.to_string()))?;
    Ok(STANDARD.encode(buffer))
}

pub fn decode_png_base64(encoded: &str) -> Result<RgbImage, PredictionError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| PredictionError::InvalidImage(e.to_string()))?;
    let image = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
        .map_err(|e| PredictionError::InvalidImage(e.to_string()))?;
    Ok(image.to_rgb8())
}
