//! # Pl@ntNet Runner
//!
//! Identify plant species from photos with the Pl@ntNet API.
//!
//! A captured frame goes through three stages:
//!
//! 1. [`ImageEncoder`] rotates it upright and encodes it as JPEG
//! 2. [`IdentificationClient`] uploads it and classifies the response
//! 3. [`IdentificationSession`] publishes the outcome as
//!    `Idle → InFlight → Succeeded | Failed`
//!
//! ```no_run
//! use plantnet_runner::{IdentificationSession, PhotoFile, PlantNetIdentifier};
//!
//! # async fn run() -> Result<(), plantnet_runner::IdentifyError> {
//! let session = IdentificationSession::new(PlantNetIdentifier::new("your-api-key".to_string()));
//! session.capture_and_submit(&mut PhotoFile::new("rose.jpg"))?;
//!
//! let outcome = session.wait_settled().await;
//! for candidate in outcome.candidates() {
//!     println!("{} ({:.2})", candidate.scientific_name, candidate.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod client;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod types;

pub use capture::{CaptureSource, PhotoFile};
pub use client::{IdentificationClient, IdentificationRequest};
pub use encoder::{EncodedPayload, ImageEncoder};
pub use error::{EncodingError, FailureKind, IdentifyError};
pub use pipeline::{Identifier, PlantNetIdentifier};
pub use session::{Failure, IdentificationOutcome, IdentificationSession};
pub use types::{
    CapturedImage, IdentificationResult, IdentifyOptions, Organ, PixelFormat, Rotation,
    SpeciesCandidate,
};
