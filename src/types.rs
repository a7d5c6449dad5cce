//! Common types used throughout the Pl@ntNet runner.
//!
//! This module contains the data structures that flow through an
//! identification: the frame handed over by the camera, the options attached
//! to a request, and the ranked candidates parsed from the service response.

use crate::error::EncodingError;
use image::DynamicImage;
use serde::Serialize;

/// Layout of the bytes in a [`CapturedImage`] pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel, grayscale
    Luma8,
    /// Three bytes per pixel, red/green/blue
    Rgb8,
    /// Four bytes per pixel, red/green/blue/alpha
    Rgba8,
}

impl PixelFormat {
    /// Number of bytes used by a single pixel.
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Clockwise rotation needed to bring a frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    /// Builds a rotation from the angle reported by the camera.
    ///
    /// Angles are normalized modulo 360, so `-90` and `270` are the same.
    pub fn from_degrees(degrees: i32) -> Result<Self, EncodingError> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Clockwise90),
            180 => Ok(Rotation::Clockwise180),
            270 => Ok(Rotation::Clockwise270),
            _ => Err(EncodingError::UnsupportedRotation(degrees)),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }
}

/// A single frame delivered by the camera collaborator.
///
/// The buffer is row-major with no padding between rows. It is consumed by
/// the encoder and only kept afterwards so a failed attempt can be retried
/// without capturing again.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
}

impl CapturedImage {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        rotation: Rotation,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
            rotation,
        }
    }

    /// Adapts an already decoded image, keeping alpha only when present.
    pub fn from_dynamic(image: DynamicImage, rotation: Rotation) -> Self {
        let (width, height) = (image.width(), image.height());
        match image {
            DynamicImage::ImageLuma8(buf) => {
                Self::new(buf.into_raw(), width, height, PixelFormat::Luma8, rotation)
            }
            DynamicImage::ImageRgba8(buf) => {
                Self::new(buf.into_raw(), width, height, PixelFormat::Rgba8, rotation)
            }
            other => Self::new(
                other.to_rgb8().into_raw(),
                width,
                height,
                PixelFormat::Rgb8,
                rotation,
            ),
        }
    }

    /// Buffer length implied by the declared dimensions and format.
    ///
    /// `None` when the length does not fit in `usize`.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.channels())
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("rotation", &self.rotation)
            .field("pixels", &format_args!("<{} bytes>", self.pixels.len()))
            .finish()
    }
}

/// Plant organ visible in the photo, used as a hint by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Organ {
    Auto,
    Leaf,
    Flower,
    Fruit,
    Bark,
}

impl Organ {
    pub fn as_str(self) -> &'static str {
        match self {
            Organ::Auto => "auto",
            Organ::Leaf => "leaf",
            Organ::Flower => "flower",
            Organ::Fruit => "fruit",
            Organ::Bark => "bark",
        }
    }
}

/// Options sent along with an identification request.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyOptions {
    /// Ask the service to return reference images for each candidate
    pub include_related_images: bool,
    /// Flora to search, `"all"` for every project
    pub project: String,
    /// Optional organ hint
    pub organ: Option<Organ>,
    /// Optional language for common names (e.g. `"en"`, `"es"`)
    pub lang: Option<String>,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            include_related_images: true,
            project: "all".to_string(),
            organ: None,
            lang: None,
        }
    }
}

/// A reference photo of a candidate species.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferenceImage {
    pub organ: String,
    pub author: String,
    pub license: String,
    pub citation: String,
    /// Capture date as reported by the service
    pub date: String,
    pub url_original: String,
    pub url_medium: String,
    pub url_small: String,
}

/// One species guess with its confidence score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeciesCandidate {
    /// Scientific name without the author citation
    pub scientific_name: String,
    /// Author citation of the scientific name, if provided
    pub author: Option<String>,
    /// Common names, in the order returned by the service
    pub common_names: Vec<String>,
    pub family: String,
    pub genus: String,
    /// Confidence in `[0.0, 1.0]`; scores are not normalized across candidates
    pub score: f64,
    /// GBIF taxon identifier, if provided
    pub gbif_id: Option<String>,
    pub images: Vec<ReferenceImage>,
}

/// Echo of the query as understood by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryEcho {
    pub project: String,
    pub organs: Vec<String>,
    pub include_related_images: bool,
}

/// Ranked candidates returned for one identification.
///
/// Candidates keep the service's ranking; they are never re-sorted locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdentificationResult {
    pub candidates: Vec<SpeciesCandidate>,
    /// Identification requests left on the API key's quota
    pub remaining_requests: u32,
    pub language: String,
    pub version: String,
    pub query: QueryEcho,
}

impl IdentificationResult {
    /// Parses a raw service response body.
    pub fn parse(raw: &str) -> Result<Self, crate::IdentifyError> {
        crate::client::messages::parse(raw)
    }

    /// The service's top-ranked candidate.
    pub fn best_match(&self) -> Option<&SpeciesCandidate> {
        self.candidates.first()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
