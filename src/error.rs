//! Error types for the Pl@ntNet runner.
//!
//! This module defines the errors that can occur while turning a captured
//! photo into a list of candidate species: encoding the frame, talking to the
//! identification service and interpreting its answer.
//!
//! The main error type is `IdentifyError`. Every variant is terminal for the
//! attempt that produced it; nothing here is retried automatically. The
//! session layer reduces an error to a [`FailureKind`] plus the message shown
//! to the user.

use thiserror::Error;

/// Message shown when the service answers 404 for a photo.
pub const SPECIES_NOT_FOUND_MESSAGE: &str =
    "The plant could not be identified. Try another photo or a different angle.";

/// Message shown when the service answers successfully with no candidates.
pub const NO_MATCH_MESSAGE: &str =
    "No matching species were found for this photo. Try another photo or a different angle.";

/// Errors raised while serializing a captured frame into an upload payload.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// The frame has a zero width or height.
    #[error("Captured image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// The declared dimensions describe a buffer larger than addressable memory.
    #[error("Captured image is too large ({width}x{height})")]
    TooLarge { width: u32, height: u32 },

    /// The pixel buffer length does not match the declared dimensions.
    ///
    /// This usually means the buffer is corrupt or was captured in a
    /// different color format than the one declared.
    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// The camera reported an orientation that is not a multiple of 90 degrees.
    #[error("Unsupported rotation: {0} degrees")]
    UnsupportedRotation(i32),

    /// The image codec rejected the frame.
    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    /// Writing the spooled payload to temporary storage failed.
    #[error("Failed to write payload: {0}")]
    Io(#[from] std::io::Error),

    /// The background encoding task did not complete.
    #[error("Encoding task failed: {0}")]
    Worker(String),
}

/// Represents all possible errors of a single identification attempt.
#[derive(Error, Debug)]
pub enum IdentifyError {
    /// The captured image could not be turned into an upload payload.
    #[error("Failed to encode image: {0}")]
    Encoding(#[from] EncodingError),

    /// The request never produced an HTTP response.
    ///
    /// This covers connection failures, DNS errors, TLS errors and timeouts.
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status other than 404.
    ///
    /// `message` carries the raw error body returned by the service.
    #[error("Server error {status_code}: {message}")]
    Service { status_code: u16, message: String },

    /// The service answered 404, meaning it could not name the species.
    #[error("Species not found")]
    SpeciesNotFound,

    /// The service answered successfully but returned no candidates.
    #[error("No candidate species returned")]
    NoMatch,

    /// The response body is not a valid identification response.
    #[error("Malformed identification response: {0}")]
    MalformedResponse(String),

    /// The camera collaborator failed to deliver a frame.
    #[error("Failed to capture image: {0}")]
    Capture(String),
}

impl From<serde_json::Error> for IdentifyError {
    fn from(err: serde_json::Error) -> Self {
        IdentifyError::MalformedResponse(err.to_string())
    }
}

/// Classification of a failed attempt, without the underlying cause.
///
/// Unlike [`IdentifyError`] this is `Copy` and comparable, so it can live in
/// the observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Encoding,
    Transport,
    Service { status_code: u16 },
    SpeciesNotFound,
    NoMatch,
    MalformedResponse,
    Capture,
}

impl IdentifyError {
    /// Returns the failure classification for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            IdentifyError::Encoding(_) => FailureKind::Encoding,
            IdentifyError::Transport(_) => FailureKind::Transport,
            IdentifyError::Service { status_code, .. } => FailureKind::Service {
                status_code: *status_code,
            },
            IdentifyError::SpeciesNotFound => FailureKind::SpeciesNotFound,
            IdentifyError::NoMatch => FailureKind::NoMatch,
            IdentifyError::MalformedResponse(_) => FailureKind::MalformedResponse,
            IdentifyError::Capture(_) => FailureKind::Capture,
        }
    }

    /// Returns the human-readable message to surface for this error.
    ///
    /// The two "could not identify" outcomes get an actionable hint; every
    /// other error surfaces the description of its cause.
    pub fn user_message(&self) -> String {
        match self {
            IdentifyError::SpeciesNotFound => SPECIES_NOT_FOUND_MESSAGE.to_string(),
            IdentifyError::NoMatch => NO_MATCH_MESSAGE.to_string(),
            other => format!("Error: {other}"),
        }
    }
}
