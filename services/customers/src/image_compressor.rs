//! Bounded-size JPEG re-encoding for customer photos.
//!
//! Photos arrive straight from phone cameras (often several MB, any of JPEG,
//! PNG or WebP). Before upload they are scaled so the longest edge fits
//! `max_dimension` and re-encoded as JPEG, lowering quality and then size until
//! the output fits `max_bytes`.

use crate::config::ImageConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError, RgbImage};
use thiserror::Error;
use tracing::{debug, trace};

/// Lowest JPEG quality tried before shrinking the image instead
const MIN_QUALITY: u8 = 40;

/// Quality decrement between attempts
const QUALITY_STEP: u8 = 15;

/// Scale factor applied when even the lowest quality is too large
const SHRINK_FACTOR: f32 = 0.75;

/// Images are never shrunk below this edge length
const MIN_DIMENSION: u32 = 64;

/// Errors that can occur while compressing an image
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Unsupported or corrupt image: {0}")]
    Decode(#[source] ImageError),

    #[error("JPEG encoding failed: {0}")]
    Encode(#[source] ImageError),

    #[error("Could not reach {target} bytes, smallest output was {smallest} bytes")]
    TargetUnreachable { target: usize, smallest: usize },
}

/// Turns an arbitrary input image into a bounded-size JPEG
#[cfg_attr(test, mockall::automock)]
pub trait ImageCompressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// Compression bounds
#[derive(Debug, Clone, Copy)]
pub struct CompressionSettings {
    pub max_bytes: usize,
    pub max_dimension: u32,
    pub initial_quality: u8,
}

impl From<&ImageConfig> for CompressionSettings {
    fn from(config: &ImageConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_dimension: config.max_dimension,
            initial_quality: config.initial_quality,
        }
    }
}

/// JPEG compressor backed by the `image` crate
#[derive(Debug, Clone)]
pub struct JpegCompressor {
    settings: CompressionSettings,
}

impl JpegCompressor {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    fn encode(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CompressionError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode_image(image)
            .map_err(CompressionError::Encode)?;
        Ok(buffer)
    }
}

impl ImageCompressor for JpegCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let decoded = image::load_from_memory(data).map_err(CompressionError::Decode)?;
        let (original_width, original_height) = decoded.dimensions();

        let mut rgb = fit_within(decoded, self.settings.max_dimension).to_rgb8();
        let mut smallest = usize::MAX;

        loop {
            let mut quality = self.settings.initial_quality;
            loop {
                let encoded = Self::encode(&rgb, quality)?;
                trace!(
                    width = rgb.width(),
                    height = rgb.height(),
                    quality,
                    size_bytes = encoded.len(),
                    "JPEG attempt"
                );

                if encoded.len() <= self.settings.max_bytes {
                    debug!(
                        original_width,
                        original_height,
                        width = rgb.width(),
                        height = rgb.height(),
                        quality,
                        input_bytes = data.len(),
                        output_bytes = encoded.len(),
                        "Image compressed"
                    );
                    return Ok(encoded);
                }

                smallest = smallest.min(encoded.len());
                if quality <= MIN_QUALITY {
                    break;
                }
                quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
            }

            let width = (rgb.width() as f32 * SHRINK_FACTOR) as u32;
            let height = (rgb.height() as f32 * SHRINK_FACTOR) as u32;
            if width.max(height) < MIN_DIMENSION {
                return Err(CompressionError::TargetUnreachable {
                    target: self.settings.max_bytes,
                    smallest,
                });
            }

            rgb = image::imageops::resize(&rgb, width.max(1), height.max(1), FilterType::Triangle);
        }
    }
}

/// Downscale so the longest edge is at most `max_dimension`, keeping aspect ratio
fn fit_within(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}
