use crate::error::PredictionError;
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array, Ix4};

/// Decodes an uploaded image, guessing the format from its bytes.
pub fn decode_image(image_data: &[u8]) -> Result<DynamicImage, PredictionError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| PredictionError::InvalidImage(e.to_string()))?;

    image_reader
        .decode()
        .map_err(|e| PredictionError::InvalidImage(e.to_string()))
}

fn resized_rgb(image: &DynamicImage, size: u32) -> RgbImage {
    image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8()
}

/// NCHW tensor in RGB order scaled to [0, 1], as consumed by the detector.
pub fn to_unit_tensor(image: &DynamicImage, size: u32) -> Array<f32, Ix4> {
    to_standardized_tensor(image, size, [0.0; 3], [1.0; 3])
}

/// NCHW tensor in RGB order, standardized per channel with `(v / 255 - mean) / std`.
pub fn to_standardized_tensor(
    image: &DynamicImage,
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
) -> Array<f32, Ix4> {
    let img = resized_rgb(image, size);
    let side = size as usize;

    let mut input = Array::zeros((1, 3, side, side));
    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.;
            input[[0, channel, y, x]] = (value - mean[channel]) / std[channel];
        }
    }

    input
}

/// Ratio between the original image and the square inference tensor, per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameScale {
    pub original_width: u32,
    pub original_height: u32,
    pub input_size: u32,
}

impl FrameScale {
    pub fn new(image: &DynamicImage, input_size: u32) -> Self {
        let (original_width, original_height) = image.dimensions();
        Self {
            original_width,
            original_height,
            input_size,
        }
    }

    pub fn x_factor(&self) -> f32 {
        self.original_width as f32 / self.input_size as f32
    }

    pub fn y_factor(&self) -> f32 {
        self.original_height as f32 / self.input_size as f32
    }
}
