//! HTTP client for the Pl@ntNet identification service.
//!
//! Sends one encoded photo per request and classifies the answer:
//!
//! | Response | Outcome |
//! |---|---|
//! | 2xx with candidates | `Ok(IdentificationResult)` |
//! | 2xx without candidates | `IdentifyError::NoMatch` |
//! | 404 | `IdentifyError::SpeciesNotFound` |
//! | any other status | `IdentifyError::Service` with the raw body |
//! | no response | `IdentifyError::Transport` |
//!
//! Nothing is retried here.

pub mod messages;

use crate::encoder::EncodedPayload;
use crate::error::IdentifyError;
use crate::types::{IdentificationResult, IdentifyOptions};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error, warn};

const DEFAULT_API_HOST: &str = "https://my-api.plantnet.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything needed for one identification attempt.
#[derive(Debug)]
pub struct IdentificationRequest {
    pub payload: EncodedPayload,
    pub api_key: String,
    pub options: IdentifyOptions,
}

impl IdentificationRequest {
    pub fn new(payload: EncodedPayload, api_key: String) -> Self {
        Self {
            payload,
            api_key,
            options: IdentifyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IdentifyOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone)]
pub struct IdentificationClient {
    host: String,
    timeout: Duration,
}

impl Default for IdentificationClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentificationClient {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_host(host: String) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds the whole call; an expired timeout is reported as a transport error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Submits a photo and returns the ranked candidates.
    pub async fn submit(
        &self,
        request: &IdentificationRequest,
    ) -> Result<IdentificationResult, IdentifyError> {
        let payload = &request.payload;
        let options = &request.options;

        debug!("Creating multipart form");
        let image = Part::bytes(payload.bytes().to_vec())
            .file_name(payload.file_name().to_string())
            .mime_str(payload.content_type())?;
        let mut form = Form::new().part("images", image);
        if let Some(organ) = options.organ {
            debug!("Adding organ hint: {}", organ.as_str());
            form = form.text("organs", organ.as_str());
        }

        let mut query = vec![
            ("api-key", request.api_key.clone()),
            (
                "include-related-images",
                options.include_related_images.to_string(),
            ),
        ];
        if let Some(lang) = &options.lang {
            query.push(("lang", lang.clone()));
        }

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let url = format!("{}/v2/identify/{}", self.host, options.project);
        debug!(
            "Sending {} byte payload {} to: {}",
            payload.len(),
            payload.file_name(),
            url
        );
        let response = client.post(url).query(&query).multipart(form).send().await?;

        let status = response.status();
        debug!("Response status: {}", status);

        let response_text = response.text().await?;
        debug!("Response body: {} bytes", response_text.len());

        classify_response(status, &response_text)
    }
}

/// Maps a status code and body to the outcome of an attempt.
pub fn classify_response(
    status: StatusCode,
    body: &str,
) -> Result<IdentificationResult, IdentifyError> {
    if status.is_success() {
        let result = messages::parse(body)?;
        if result.is_empty() {
            warn!("Service returned no candidates");
            return Err(IdentifyError::NoMatch);
        }
        debug!(
            "Request successful: {} candidates, {} requests remaining",
            result.len(),
            result.remaining_requests
        );
        return Ok(result);
    }

    if status == StatusCode::NOT_FOUND {
        warn!("Species not found: {}", body);
        return Err(IdentifyError::SpeciesNotFound);
    }

    error!("Request failed: {}", body);
    Err(IdentifyError::Service {
        status_code: status.as_u16(),
        message: body.to_string(),
    })
}
