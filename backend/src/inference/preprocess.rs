//! Turns uploaded image bytes into the tensor the classifier was trained on.
//! The normalization applied here must match training exactly; a mismatch does not fail,
//! it silently degrades every prediction. `ModelMetadata::check_preprocessing` guards it.
use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};

use super::validator::{BrainImageValidator, Rejection};
use crate::config::PreprocessingConfig;

pub const CHANNELS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("image does not look like a brain MRI: {0}")]
    NotBrainLike(Rejection),
    #[error("preprocessing failed: {0}")]
    Failed(String),
}

/// Per-channel normalization presets, named after the architecture family that expects them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Keras EfficientNet: raw [0, 255] values, normalization lives inside the graph.
    EfficientNet,
    /// torchvision ImageNet statistics on [0, 1] values.
    Torch,
    /// Inception-style [-1, 1].
    Tf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelNormalization {
    pub scale: f32,
    pub mean: [f32; CHANNELS],
    pub std: [f32; CHANNELS],
}

impl Normalization {
    pub fn params(&self) -> ChannelNormalization {
        match self {
            Normalization::EfficientNet => ChannelNormalization {
                scale: 1.0,
                mean: [0.0; CHANNELS],
                std: [1.0; CHANNELS],
            },
            Normalization::Torch => ChannelNormalization {
                scale: 1.0 / 255.0,
                mean: [0.485, 0.456, 0.406],
                std: [0.229, 0.224, 0.225],
            },
            Normalization::Tf => ChannelNormalization {
                scale: 1.0 / 127.5,
                mean: [1.0; CHANNELS],
                std: [1.0; CHANNELS],
            },
        }
    }
}

impl ChannelNormalization {
    pub fn apply(&self, channel: usize, value: u8) -> f32 {
        (value as f32 * self.scale - self.mean[channel]) / self.std[channel]
    }
}

/// Batch of one image, laid out as (batch, height, width, channel).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Values in row-major (standard) order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.iter().copied().collect()
    }
}

pub struct Preprocessor {
    config: PreprocessingConfig,
    validator: BrainImageValidator,
}

impl Preprocessor {
    pub fn new(config: PreprocessingConfig, validator: BrainImageValidator) -> Self {
        Self { config, validator }
    }

    pub fn preprocess(&self, raw: &[u8]) -> Result<NormalizedTensor, PreprocessError> {
        if self.config.input_size == 0 {
            return Err(PreprocessError::Failed("input size must be non-zero".to_string()));
        }

        let image = image::load_from_memory(raw)
            .map_err(|e| PreprocessError::Failed(format!("could not decode image: {}", e)))?;
        let image = apply_orientation(image, read_orientation(raw));
        let square = center_crop(&image);

        let report = self.validator.inspect(&square);
        log::debug!(
            "Validator: range={:.3} center_margin={:.3} gradient={:.3}",
            report.intensity_range,
            report.center_margin,
            report.mean_gradient
        );
        if let Some(rejection) = report.rejection {
            return Err(PreprocessError::NotBrainLike(rejection));
        }

        Ok(self.to_tensor(&square))
    }

    fn to_tensor(&self, square: &DynamicImage) -> NormalizedTensor {
        let size = self.config.input_size;
        let rgb = square.to_rgb8();
        let resized = image::imageops::resize(&rgb, size, size, FilterType::CatmullRom);
        let params = self.config.normalization.params();

        let mut tensor = Array4::<f32>::zeros((1, size as usize, size as usize, CHANNELS));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..CHANNELS {
                tensor[[0, y as usize, x as usize, channel]] = params.apply(channel, pixel.0[channel]);
            }
        }
        NormalizedTensor(tensor)
    }
}

/// Square crop on the shorter side, centered.
pub fn center_crop(image: &DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    image.crop_imm((width - side) / 2, (height - side) / 2, side, side)
}

/// EXIF orientation (1-8). Missing or unreadable EXIF data means the image is upright.
fn read_orientation(raw: &[u8]) -> u32 {
    let mut cursor = Cursor::new(raw);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

// 2 = mirrored, 3 = upside down, 4 = mirrored and upside down, 5 = mirrored on its side,
// 6 = on its side, 7 = mirrored on its far side, 8 = on its far side.
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => image,
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        other => {
            log::warn!("Unsupported EXIF orientation: {}", other);
            image
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidatorConfig;
    use crate::inference::test_images::{checker_disc, encode_png, uniform_gray};
    use image::{Rgb, RgbImage};

    fn preprocessor(normalization: Normalization) -> Preprocessor {
        Preprocessor::new(
            PreprocessingConfig {
                input_size: 224,
                normalization,
            },
            BrainImageValidator::new(ValidatorConfig::default()),
        )
    }

    #[test]
    fn produces_batched_nhwc_tensor() {
        let bytes = encode_png(&checker_disc(64, 20, 1, 120, 240, 0));
        let tensor = preprocessor(Normalization::EfficientNet)
            .preprocess(&bytes)
            .unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);

        // Corner is background; EfficientNet keeps raw pixel values.
        assert_eq!(tensor.view()[[0, 0, 0, 0]], 0.0);
        let max = tensor.to_vec().into_iter().fold(f32::MIN, f32::max);
        assert!(max > 200.0 && max <= 255.0 + 1e-3);
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let bytes = encode_png(&checker_disc(128, 40, 4, 60, 230, 5));
        let pre = preprocessor(Normalization::Torch);
        let first = pre.preprocess(&bytes).unwrap();
        let second = pre.preprocess(&bytes).unwrap();
        let first_bits: Vec<u32> = first.to_vec().iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.to_vec().iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn uniform_gray_is_rejected_as_not_brain_like() {
        let bytes = encode_png(&uniform_gray(64, 64, 128));
        let err = preprocessor(Normalization::EfficientNet)
            .preprocess(&bytes)
            .unwrap_err();
        assert!(matches!(err, PreprocessError::NotBrainLike(Rejection::LowContrast)));
    }

    #[test]
    fn undecodable_bytes_fail_generically() {
        let err = preprocessor(Normalization::EfficientNet)
            .preprocess(b"DICM not really an image")
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Failed(_)));
        let err = preprocessor(Normalization::EfficientNet)
            .preprocess(&[])
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Failed(_)));
    }

    #[test]
    fn normalization_presets() {
        let efficient = Normalization::EfficientNet.params();
        assert_eq!(efficient.apply(0, 255), 255.0);

        let torch = Normalization::Torch.params();
        let expected = (1.0 - 0.485) / 0.229;
        assert!((torch.apply(0, 255) - expected).abs() < 1e-5);

        let tf = Normalization::Tf.params();
        assert!((tf.apply(1, 0) + 1.0).abs() < 1e-6);
        assert!((tf.apply(2, 255) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn center_crop_uses_shorter_side() {
        let mut image = RgbImage::new(100, 60);
        image.put_pixel(20, 0, Rgb([255, 0, 0]));
        let cropped = center_crop(&DynamicImage::ImageRgb8(image));
        assert_eq!(cropped.dimensions(), (60, 60));
        // x offset is (100 - 60) / 2 = 20
        assert_eq!(cropped.to_rgb8().get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn orientation_six_rotates_clockwise() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 0, 255]));

        let rotated = apply_orientation(DynamicImage::ImageRgb8(image), 6).to_rgb8();
        assert_eq!(rotated.dimensions(), (1, 2));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(rotated.get_pixel(0, 1), &Rgb([0, 0, 255]));
    }

    /// Landscape JPEG of horizontal bands inside a disc, with no EXIF block.
    fn banded_jpeg() -> Vec<u8> {
        let (cx, cy) = (47.5f32, 31.5f32);
        let image = RgbImage::from_fn(96, 64, |x, y| {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            let v = if (dx * dx + dy * dy).sqrt() < 24.0 {
                if (y / 2) % 2 == 0 { 240 } else { 100 }
            } else {
                0
            };
            Rgb([v, v, v])
        });
        let mut bytes = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 95);
        DynamicImage::ImageRgb8(image)
            .write_with_encoder(encoder)
            .unwrap();
        bytes
    }

    /// Splices an APP1 segment holding a big-endian TIFF IFD with a single Orientation entry.
    fn with_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"MM\0\x2a");
        tiff.extend_from_slice(&8u32.to_be_bytes());
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_be_bytes());

        let mut segment = vec![0xff, 0xe1];
        segment.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
        segment.extend_from_slice(b"Exif\0\0");
        segment.extend_from_slice(&tiff);

        let mut tagged = jpeg[..2].to_vec();
        tagged.extend_from_slice(&segment);
        tagged.extend_from_slice(&jpeg[2..]);
        tagged
    }

    #[test]
    fn exif_orientation_is_applied_before_cropping() {
        let plain = banded_jpeg();
        let tagged = with_orientation(&plain, 6);
        assert_eq!(read_orientation(&plain), 1);
        assert_eq!(read_orientation(&tagged), 6);

        let pre = preprocessor(Normalization::EfficientNet);
        let upright = image::load_from_memory(&plain).unwrap().rotate90();
        assert_eq!(upright.dimensions(), (64, 96));
        let expected = pre.preprocess(&encode_png(&upright)).unwrap();

        let actual = pre.preprocess(&tagged).unwrap();
        assert_eq!(actual, expected);
        assert_ne!(Some(actual), pre.preprocess(&plain).ok());
    }

    #[test]
    fn missing_exif_means_upright() {
        let bytes = encode_png(&uniform_gray(8, 8, 10));
        assert_eq!(read_orientation(&bytes), 1);
        assert_eq!(read_orientation(b"garbage"), 1);
    }
}
