//! Identification pipeline abstraction.
//!
//! The session drives any type implementing [`Identifier`]. The production
//! implementation, [`PlantNetIdentifier`], encodes the frame on the blocking
//! pool and submits it to the Pl@ntNet service. Tests and alternative
//! services can plug in their own implementation.

use crate::client::{IdentificationClient, IdentificationRequest};
use crate::encoder::ImageEncoder;
use crate::error::{EncodingError, IdentifyError};
use crate::types::{CapturedImage, IdentificationResult, IdentifyOptions};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Trait for anything that can turn a captured frame into ranked candidates.
#[async_trait]
pub trait Identifier: Send + Sync {
    /// Runs the full pipeline for one frame.
    ///
    /// Implementations must not retry and must release any per-attempt
    /// resources before returning.
    async fn identify(
        &self,
        image: Arc<CapturedImage>,
    ) -> Result<IdentificationResult, IdentifyError>;
}

/// Encoder and client wired together with a credential and options.
#[derive(Debug, Clone)]
pub struct PlantNetIdentifier {
    api_key: String,
    options: IdentifyOptions,
    encoder: ImageEncoder,
    client: IdentificationClient,
}

impl PlantNetIdentifier {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            options: IdentifyOptions::default(),
            encoder: ImageEncoder::new(),
            client: IdentificationClient::new(),
        }
    }

    pub fn with_client(mut self, client: IdentificationClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_encoder(mut self, encoder: ImageEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_options(mut self, options: IdentifyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &IdentifyOptions {
        &self.options
    }
}

#[async_trait]
impl Identifier for PlantNetIdentifier {
    async fn identify(
        &self,
        image: Arc<CapturedImage>,
    ) -> Result<IdentificationResult, IdentifyError> {
        // JPEG encoding is CPU bound
        let encoder = self.encoder.clone();
        let payload = tokio::task::spawn_blocking(move || encoder.encode(&image))
            .await
            .map_err(|e| EncodingError::Worker(e.to_string()))??;
        debug!("Payload ready: {} bytes", payload.len());

        let request = IdentificationRequest::new(payload, self.api_key.clone())
            .with_options(self.options.clone());
        let result = self.client.submit(&request).await;

        // The request owns the payload; dropping it releases any spooled file
        drop(request);

        if let Ok(result) = &result {
            if let Some(best) = result.best_match() {
                info!(
                    "Identified {} ({:.1}%)",
                    best.scientific_name,
                    best.score * 100.0
                );
            }
        }
        result
    }
}
