//! Image encoding for identification uploads.
//!
//! Turns a raw camera frame into a JPEG payload. The frame is rotated upright
//! before encoding since the service expects photos in display orientation.
//! Optionally the payload is spooled to a temporary file which lives exactly
//! as long as the payload itself.

use crate::error::EncodingError;
use crate::types::{CapturedImage, PixelFormat, Rotation};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::debug;

const DEFAULT_JPEG_QUALITY: u8 = 90;
const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Encoded image ready to be uploaded.
///
/// Never empty. If the encoder spooled the bytes to disk, the backing file is
/// removed when the payload is dropped, whichever way the request ended.
#[derive(Debug)]
pub struct EncodedPayload {
    data: Vec<u8>,
    content_type: &'static str,
    file_name: String,
    spool: Option<NamedTempFile>,
}

impl EncodedPayload {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn content_type(&self) -> &str {
        self.content_type
    }

    /// File name announced in the multipart upload.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Location of the spooled copy, if the encoder was given a spool directory.
    pub fn spool_path(&self) -> Option<&Path> {
        self.spool.as_ref().map(|file| file.path())
    }
}

/// Serializes captured frames into JPEG payloads.
#[derive(Debug, Clone)]
pub struct ImageEncoder {
    quality: u8,
    spool_dir: Option<PathBuf>,
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageEncoder {
    pub fn new() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
            spool_dir: None,
        }
    }

    /// Sets the JPEG quality, clamped to `1..=100`.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Also writes each payload to a temporary file in `dir`.
    pub fn with_spool_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.spool_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encodes a captured frame into an upload payload.
    pub fn encode(&self, image: &CapturedImage) -> Result<EncodedPayload, EncodingError> {
        debug!("Encoding captured image: {:?}", image);
        let upright = rotate(to_dynamic(image)?, image.rotation);

        let mut data = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut data, self.quality);
        upright.write_with_encoder(encoder)?;
        debug!(
            "Encoded {}x{} frame into {} bytes of JPEG",
            upright.width(),
            upright.height(),
            data.len()
        );

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let spool = match &self.spool_dir {
            Some(dir) => Some(spool_to(dir, &data)?),
            None => None,
        };

        Ok(EncodedPayload {
            data,
            content_type: JPEG_CONTENT_TYPE,
            file_name: format!("plant_image_{millis}.jpg"),
            spool,
        })
    }
}

fn to_dynamic(image: &CapturedImage) -> Result<DynamicImage, EncodingError> {
    if image.width == 0 || image.height == 0 {
        return Err(EncodingError::EmptyImage {
            width: image.width,
            height: image.height,
        });
    }

    let expected = image.expected_len().ok_or(EncodingError::TooLarge {
        width: image.width,
        height: image.height,
    })?;
    if image.pixels.len() != expected {
        return Err(EncodingError::BufferSizeMismatch {
            expected,
            actual: image.pixels.len(),
        });
    }

    let (w, h, pixels) = (image.width, image.height, image.pixels.clone());
    let mismatch = || EncodingError::BufferSizeMismatch {
        expected,
        actual: image.pixels.len(),
    };
    let dynamic = match image.format {
        PixelFormat::Luma8 => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, pixels).ok_or_else(mismatch)?)
        }
        PixelFormat::Rgb8 => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, pixels).ok_or_else(mismatch)?)
        }
        // JPEG has no alpha channel
        PixelFormat::Rgba8 => DynamicImage::ImageRgb8(
            DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, pixels).ok_or_else(mismatch)?)
                .to_rgb8(),
        ),
    };
    Ok(dynamic)
}

fn rotate(image: DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::None => image,
        Rotation::Clockwise90 => image.rotate90(),
        Rotation::Clockwise180 => image.rotate180(),
        Rotation::Clockwise270 => image.rotate270(),
    }
}

fn spool_to(dir: &Path, data: &[u8]) -> Result<NamedTempFile, EncodingError> {
    let mut file = tempfile::Builder::new()
        .prefix("plant_image_")
        .suffix(".jpg")
        .tempfile_in(dir)?;
    file.write_all(data)?;
    file.flush()?;
    debug!("Spooled payload to {}", file.path().display());
    Ok(file)
}
