//! Image preprocessing: raw upload bytes to the fixed-shape tensor the classifier consumes.
//!
//! One implementation serves inference and training, so a scan seen at
//! retrain time produces exactly the tensor it produced when it was predicted.
//!
//! Steps: bounds check -> decode -> RGB -> exact resize (Triangle) -> /255 -> `[1, H*W*C]`.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum input image size (in bytes) before rejecting.
pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Input resolution of the shipped OCT classifier.
pub const OCT_INPUT_SIZE: u32 = 299;

/// RGB is the single channel layout.
pub const INPUT_CHANNELS: u32 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Tensor geometry a classifier artifact was trained against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl InputSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: INPUT_CHANNELS,
        }
    }

    /// 299x299 RGB.
    pub fn default_oct() -> Self {
        Self::new(OCT_INPUT_SIZE, OCT_INPUT_SIZE)
    }

    /// Length of the flattened per-image feature vector.
    pub fn features(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Logical NHWC shape of one preprocessed image.
    pub fn tensor_shape(&self) -> [usize; 4] {
        [
            1,
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        ]
    }
}

/// Stateless, deterministic image-to-tensor transform.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    spec: InputSpec,
}

impl Preprocessor {
    pub fn new(spec: InputSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> InputSpec {
        self.spec
    }

    /// Validate byte bounds and decode. No tensor work happens here,
    /// so callers can reject bad uploads before touching disk.
    pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
        if bytes.is_empty() {
            return Err(PreprocessError::InvalidImage("empty upload".into()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(PreprocessError::InvalidImage(format!(
                "image is {} bytes, limit is {MAX_IMAGE_BYTES}",
                bytes.len()
            )));
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| PreprocessError::InvalidImage(e.to_string()))?;
        if img.width() == 0 || img.height() == 0 {
            return Err(PreprocessError::InvalidImage("image has no pixels".into()));
        }
        Ok(img)
    }

    /// Full transform from encoded bytes.
    pub fn preprocess(&self, bytes: &[u8]) -> Result<Array2<f32>, PreprocessError> {
        let img = Self::decode_image(bytes)?;
        self.preprocess_decoded(&img)
    }

    /// Transform an already-decoded image.
    pub fn preprocess_decoded(&self, img: &DynamicImage) -> Result<Array2<f32>, PreprocessError> {
        let rgb = img.to_rgb8();
        let resized = image::imageops::resize(
            &rgb,
            self.spec.width,
            self.spec.height,
            FilterType::Triangle,
        );

        debug!(
            original_w = rgb.width(),
            original_h = rgb.height(),
            target_w = self.spec.width,
            target_h = self.spec.height,
            "Image preprocessed"
        );

        let data: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();
        Array2::from_shape_vec((1, self.spec.features()), data)
            .map_err(|e| PreprocessError::InvalidImage(format!("tensor shape: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encode_png, solid_png};
    use image::{Rgb, RgbImage};

    #[test]
    fn output_shape_matches_spec() {
        let pre = Preprocessor::new(InputSpec::default_oct());
        let png = solid_png(640, 480, [10, 20, 30]);
        let tensor = pre.preprocess(&png).unwrap();
        assert_eq!(tensor.shape(), &[1, 299 * 299 * 3]);
        assert_eq!(InputSpec::default_oct().tensor_shape(), [1, 299, 299, 3]);
    }

    #[test]
    fn values_are_scaled_into_unit_range() {
        let pre = Preprocessor::new(InputSpec::new(8, 8));
        let png = solid_png(16, 16, [255, 0, 51]);
        let tensor = pre.preprocess(&png).unwrap();
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        // Resampling may shift a solid color by one intensity step.
        assert!((tensor[[0, 0]] - 1.0).abs() < 0.01);
        assert!(tensor[[0, 1]].abs() < 0.01);
        assert!((tensor[[0, 2]] - 0.2).abs() < 0.01);
    }

    #[test]
    fn grayscale_is_expanded_to_rgb() {
        let gray = image::GrayImage::from_pixel(10, 10, image::Luma([128]));
        let bytes = encode_png(&DynamicImage::ImageLuma8(gray));
        let pre = Preprocessor::new(InputSpec::new(4, 4));
        let tensor = pre.preprocess(&bytes).unwrap();
        assert_eq!(tensor.len(), 4 * 4 * 3);
        let first = tensor[[0, 0]];
        assert!((tensor[[0, 1]] - first).abs() < 1e-6);
        assert!((tensor[[0, 2]] - first).abs() < 1e-6);
    }

    #[test]
    fn deterministic_for_same_bytes() {
        let mut img = RgbImage::new(30, 20);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x * 8) as u8, (y * 12) as u8, 77]);
        }
        let bytes = encode_png(&DynamicImage::ImageRgb8(img));
        let pre = Preprocessor::new(InputSpec::new(12, 12));
        assert_eq!(pre.preprocess(&bytes).unwrap(), pre.preprocess(&bytes).unwrap());
    }

    #[test]
    fn empty_bytes_rejected() {
        let pre = Preprocessor::new(InputSpec::default_oct());
        assert!(matches!(
            pre.preprocess(&[]),
            Err(PreprocessError::InvalidImage(_))
        ));
    }

    #[test]
    fn undecodable_bytes_rejected() {
        let pre = Preprocessor::new(InputSpec::default_oct());
        let result = pre.preprocess(b"definitely not an image, just some text");
        assert!(matches!(result, Err(PreprocessError::InvalidImage(_))));
    }

    #[test]
    fn oversized_upload_rejected_before_decode() {
        let huge = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(Preprocessor::decode_image(&huge).is_err());
    }
}
