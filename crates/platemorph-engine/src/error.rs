use std::time::Duration;

use thiserror::Error;

/// Failures while turning a file, camera frame or URL into an `ImageAsset`.
///
/// These surface on the slot that triggered ingestion and never reach the
/// workspace's generation error.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("could not decode image '{name}': {reason}")]
    Decode { name: String, reason: String },

    #[error("camera unavailable: {0}. Check permissions or connect a capture device.")]
    CameraUnavailable(String),

    #[error("could not fetch {url} ({reason}). The host may block cross-origin access; download the image and upload the file directly instead.")]
    Fetch { url: String, reason: String },
}

impl IngestError {
    pub(crate) fn decode(name: &str, reason: impl ToString) -> Self {
        IngestError::Decode {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failures reported by a generation backend. None are retried by the backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generation returned empty candidates.")]
    EmptyResponse,

    #[error("No image found in generation response.")]
    NoImageInResponse,

    #[error("Generation backend is rate limiting requests; retry in {}s.", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("Generation failed: {0}")]
    Upstream(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::RateLimited { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::EmptyResponse => "empty_response",
            GenerationError::NoImageInResponse => "no_image_in_response",
            GenerationError::RateLimited { .. } => "rate_limited",
            GenerationError::Upstream(_) => "upstream_error",
        }
    }
}
