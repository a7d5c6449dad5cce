//! Camera collaborator.
//!
//! The runner does not drive camera hardware. Whatever owns the camera
//! implements [`CaptureSource`] and hands frames over one at a time.
//! [`PhotoFile`] stands in for a camera by decoding a photo from disk.

use crate::error::IdentifyError;
use crate::types::{CapturedImage, Rotation};
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait CaptureSource {
    /// Captures the current frame.
    fn capture_frame(&mut self) -> Result<CapturedImage, IdentifyError>;
}

/// A photo on disk used as a single-frame camera.
#[derive(Debug, Clone)]
pub struct PhotoFile {
    path: PathBuf,
    rotation: Rotation,
}

impl PhotoFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            rotation: Rotation::None,
        }
    }

    /// Rotation to report alongside the decoded pixels.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSource for PhotoFile {
    fn capture_frame(&mut self) -> Result<CapturedImage, IdentifyError> {
        debug!("Decoding photo {}", self.path.display());
        let decoded = image::open(&self.path).map_err(|e| {
            IdentifyError::Capture(format!("{}: {e}", self.path.display()))
        })?;
        Ok(CapturedImage::from_dynamic(decoded, self.rotation))
    }
}
