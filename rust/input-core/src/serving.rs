// rust/input-core/src/serving.rs

//! Raw-image serving input.
//!
//! Serving requests carry encoded images rather than records. Each image is
//! decoded, cropped, resized and normalized into one feature tensor of the
//! same shape the training pipeline produces.

use bytes::Bytes;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{InputError, Result};
use crate::tensor::{FeatureTensor, Precision};

/// Padding used by the evaluation centre crop.
pub const CROP_PADDING: u32 = 32;

const MEAN_RGB: [f32; 3] = [0.485 * 255.0, 0.456 * 255.0, 0.406 * 255.0];
const STDDEV_RGB: [f32; 3] = [0.229 * 255.0, 0.224 * 255.0, 0.225 * 255.0];

const MIN_AREA_FRACTION: f64 = 0.08;
const ASPECT_RATIO_RANGE: (f64, f64) = (3.0 / 4.0, 4.0 / 3.0);
const CROP_ATTEMPTS: usize = 10;

/// Image preprocessing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOptions {
    /// Output height and width.
    pub image_size: usize,
    /// Output channels: 1 luma, 2 luma+alpha, 3 RGB, 4 RGBA.
    pub channels: usize,
    pub precision: Precision,
    /// Seed for the training crop and flip.
    pub seed: Option<u64>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            image_size: 224,
            channels: 3,
            precision: Precision::F32,
            seed: None,
        }
    }
}

/// Decodes and preprocesses one encoded image into `(H, W, C)` features.
///
/// Evaluation takes a padded centre crop. Training takes a random-area crop
/// with aspect distortion and a random horizontal flip.
///
/// # Errors
///
/// Returns `Image` when the bytes are not a decodable image or the channel
/// count is unsupported.
pub fn preprocess_image(
    bytes: &[u8],
    is_training: bool,
    options: &PreprocessOptions,
) -> Result<FeatureTensor> {
    let size = u32::try_from(options.image_size)
        .ok()
        .filter(|&s| s > 0)
        .ok_or_else(|| InputError::image(format!("invalid image size {}", options.image_size)))?;

    let image = image::load_from_memory(bytes)
        .map_err(|e| InputError::image_with_source("failed to decode image", e))?;

    let image = if is_training {
        let mut rng = StdRng::seed_from_u64(options.seed.unwrap_or_else(rand::random));
        let cropped = random_crop(&image, size, &mut rng);
        let resized = cropped.resize_exact(size, size, FilterType::Triangle);
        if rng.random_bool(0.5) {
            resized.fliph()
        } else {
            resized
        }
    } else {
        center_crop(&image, size).resize_exact(size, size, FilterType::Triangle)
    };

    let values = normalize(&image, options.channels)?;
    let shape = [options.image_size, options.image_size, options.channels];
    let array = ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|e| InputError::image(format!("unexpected pixel buffer size: {e}")))?;

    Ok(FeatureTensor::from_f32(array, options.precision))
}

/// Centre crop of `image_size / (image_size + 32)` of the shorter side.
fn center_crop(image: &DynamicImage, image_size: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let shorter = f64::from(width.min(height));
    let ratio = f64::from(image_size) / f64::from(image_size + CROP_PADDING);
    let crop = ((ratio * shorter) as u32).max(1);

    let x = (width.saturating_sub(crop) + 1) / 2;
    let y = (height.saturating_sub(crop) + 1) / 2;
    image.crop_imm(x, y, crop.min(width), crop.min(height))
}

fn random_crop(image: &DynamicImage, image_size: u32, rng: &mut StdRng) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let area = f64::from(width) * f64::from(height);

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * rng.random_range(MIN_AREA_FRACTION..=1.0);
        let aspect = rng.random_range(ASPECT_RATIO_RANGE.0..=ASPECT_RATIO_RANGE.1);

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;
        if w == 0 || h == 0 || w > width || h > height {
            continue;
        }

        let x = rng.random_range(0..=width - w);
        let y = rng.random_range(0..=height - h);
        return image.crop_imm(x, y, w, h);
    }

    center_crop(image, image_size)
}

/// Converts to `channels` channels and normalizes to f32 in HWC order.
fn normalize(image: &DynamicImage, channels: usize) -> Result<Vec<f32>> {
    let raw = match channels {
        1 => image.to_luma8().into_raw(),
        2 => image.to_luma_alpha8().into_raw(),
        3 => image.to_rgb8().into_raw(),
        4 => image.to_rgba8().into_raw(),
        n => {
            return Err(InputError::image(format!(
                "unsupported channel count {n}, expected 1 to 4"
            )))
        }
    };

    if channels == 3 {
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, &v)| (f32::from(v) - MEAN_RGB[i % 3]) / STDDEV_RGB[i % 3])
            .collect())
    } else {
        Ok(raw.iter().map(|&v| f32::from(v) / 255.0).collect())
    }
}

/// Features for one serving request.
#[derive(Debug, Clone, PartialEq)]
pub struct ServingInput {
    /// `(N, H, W, C)` features.
    pub features: FeatureTensor,
    /// The request's original encoded images, in order.
    pub image_bytes: Vec<Bytes>,
}

/// Turns serving requests of encoded images into feature batches.
#[derive(Debug, Clone)]
pub struct ServingInputReceiver {
    options: PreprocessOptions,
}

impl ServingInputReceiver {
    pub fn new(options: PreprocessOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// Preprocesses every image of a request in parallel.
    ///
    /// An empty request yields a `(0, H, W, C)` batch.
    pub fn receive(&self, images: Vec<Bytes>) -> Result<ServingInput> {
        let size = self.options.image_size;
        if images.is_empty() {
            return Ok(ServingInput {
                features: FeatureTensor::zeros(
                    &[0, size, size, self.options.channels],
                    self.options.precision,
                ),
                image_bytes: images,
            });
        }

        let tensors = images
            .par_iter()
            .map(|bytes| preprocess_image(bytes, false, &self.options))
            .collect::<Result<Vec<_>>>()?;

        Ok(ServingInput {
            features: FeatureTensor::stack(&tensors)?,
            image_bytes: images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32, pixel: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(pixel));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn options(channels: usize) -> PreprocessOptions {
        PreprocessOptions {
            image_size: 8,
            channels,
            precision: Precision::F32,
            seed: Some(3),
        }
    }

    #[test]
    fn test_eval_preprocess_shape_and_normalization() {
        let bytes = png(20, 12, [255, 0, 0]);
        let t = preprocess_image(&bytes, false, &options(3)).unwrap();
        assert_eq!(t.shape(), &[8, 8, 3]);

        let values = t.to_f32();
        let expected_r = (255.0 - MEAN_RGB[0]) / STDDEV_RGB[0];
        let expected_g = (0.0 - MEAN_RGB[1]) / STDDEV_RGB[1];
        // Within one intensity step of the exact value
        assert!((values[[4, 4, 0]] - expected_r).abs() < 0.05);
        assert!((values[[4, 4, 1]] - expected_g).abs() < 0.05);
    }

    #[test]
    fn test_grayscale_scaled_to_unit_range() {
        let bytes = png(10, 10, [255, 255, 255]);
        let t = preprocess_image(&bytes, false, &options(1)).unwrap();
        assert_eq!(t.shape(), &[8, 8, 1]);
        assert!(t.to_f32().iter().all(|&v| (v - 1.0).abs() < 0.01));
    }

    #[test]
    fn test_two_and_four_channels() {
        let bytes = png(10, 10, [0, 0, 0]);
        assert_eq!(
            preprocess_image(&bytes, false, &options(2)).unwrap().shape(),
            &[8, 8, 2]
        );
        let rgba = preprocess_image(&bytes, false, &options(4)).unwrap();
        // Opaque alpha
        assert!((rgba.to_f32()[[0, 0, 3]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_training_preprocess_is_seeded() {
        let bytes = png(32, 24, [10, 200, 30]);
        let a = preprocess_image(&bytes, true, &options(3)).unwrap();
        let b = preprocess_image(&bytes, true, &options(3)).unwrap();
        assert_eq!(a.shape(), &[8, 8, 3]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unsupported_channels() {
        let bytes = png(4, 4, [0, 0, 0]);
        let err = preprocess_image(&bytes, false, &options(5)).unwrap_err();
        assert!(matches!(err, InputError::Image { .. }));
    }

    #[test]
    fn test_undecodable_bytes() {
        let err = preprocess_image(b"not an image", false, &options(3)).unwrap_err();
        assert!(err.is_data_error());
    }

    #[test]
    fn test_bf16_precision() {
        let bytes = png(4, 4, [0, 0, 0]);
        let opts = PreprocessOptions {
            precision: Precision::Bf16,
            ..options(3)
        };
        let t = preprocess_image(&bytes, false, &opts).unwrap();
        assert_eq!(t.precision(), Precision::Bf16);
    }

    #[test]
    fn test_receive_batches_and_keeps_bytes() {
        let receiver = ServingInputReceiver::new(options(3));
        let images = vec![
            Bytes::from(png(16, 16, [0, 0, 0])),
            Bytes::from(png(9, 30, [255, 255, 255])),
        ];

        let input = receiver.receive(images.clone()).unwrap();
        assert_eq!(input.features.shape(), &[2, 8, 8, 3]);
        assert_eq!(input.image_bytes, images);
    }

    #[test]
    fn test_receive_empty_request() {
        let receiver = ServingInputReceiver::new(options(3));
        let input = receiver.receive(Vec::new()).unwrap();
        assert_eq!(input.features.shape(), &[0, 8, 8, 3]);
        assert!(input.image_bytes.is_empty());
    }

    #[test]
    fn test_receive_propagates_bad_image() {
        let receiver = ServingInputReceiver::new(options(3));
        let images = vec![Bytes::from(png(4, 4, [0, 0, 0])), Bytes::from_static(b"junk")];
        assert!(receiver.receive(images).is_err());
    }
}
