use std::env;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::response::{extract_image_url, GenerateContentResponse};
use super::GenerationBackend;
use crate::directives::DirectivePayload;
use crate::error::GenerationError;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_TIMEOUT_SECONDS: u64 = 90;
const MIN_TIMEOUT_SECONDS: u64 = 15;
const MAX_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
const MAX_RETRY_AFTER_SECS: f64 = 3600.0;
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves the config from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")),
            api_base: non_empty("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            model: non_empty("PLATEMORPH_IMAGE_MODEL").unwrap_or(defaults.model),
            request_timeout: non_empty("PLATEMORPH_REQUEST_TIMEOUT")
                .and_then(|value| value.parse::<u64>().ok())
                .map(|seconds| {
                    Duration::from_secs(seconds.clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS))
                })
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.request_timeout =
            Duration::from_secs(seconds.clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS));
        self
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

pub struct GeminiBackend {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Self {
        Self::with_http(config, HttpClient::new())
    }

    pub fn with_http(config: GeminiConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// `generateContent` body: one user turn holding every payload part,
    /// image-only output at the requested aspect ratio.
    pub fn build_request(payload: &DirectivePayload) -> Value {
        let parts: Vec<Value> = payload.parts().iter().map(|part| part.to_json()).collect();
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": payload.aspect_ratio.as_str(),
                },
            },
        })
    }
}

impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, payload: &DirectivePayload) -> Result<String, GenerationError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(GenerationError::Upstream(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let endpoint = self.config.endpoint();
        debug!(
            endpoint = %endpoint,
            aspect_ratio = %payload.aspect_ratio,
            "dispatching generateContent"
        );
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.config.request_timeout)
            .json(&Self::build_request(payload))
            .send()
            .map_err(|err| GenerationError::Upstream(format!("request failed: {err}")))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .text()
            .map_err(|err| GenerationError::Upstream(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            let err = classify_failure(status, retry_after, &body);
            warn!(status = status.as_u16(), kind = err.kind(), "generateContent failed");
            return Err(err);
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|err| {
            GenerationError::Upstream(format!("malformed generateContent response: {err}"))
        })?;
        extract_image_url(&parsed)
    }
}

fn classify_failure(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> GenerationError {
    let error = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").cloned());
    let error_status = error
        .as_ref()
        .and_then(|error| error.get("status"))
        .and_then(Value::as_str);

    if status == StatusCode::TOO_MANY_REQUESTS || error_status == Some("RESOURCE_EXHAUSTED") {
        let hinted = error.as_ref().and_then(retry_delay_from_details);
        return GenerationError::RateLimited {
            retry_after: retry_after.or(hinted).unwrap_or(DEFAULT_RETRY_AFTER),
        };
    }

    let message = error
        .as_ref()
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| truncate(body.trim(), ERROR_BODY_PREVIEW_CHARS));
    if message.is_empty() {
        GenerationError::Upstream(format!("HTTP {}", status.as_u16()))
    } else {
        GenerationError::Upstream(format!("HTTP {}: {message}", status.as_u16()))
    }
}

/// Reads `RetryInfo.retryDelay` (e.g. `"12s"`) from a structured error.
fn retry_delay_from_details(error: &Value) -> Option<Duration> {
    error
        .get("details")?
        .as_array()?
        .iter()
        .filter_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        .find_map(|raw| parse_retry_after(raw.trim_end_matches('s')))
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    let seconds = raw.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds.ceil().min(MAX_RETRY_AFTER_SECS)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use platemorph_contracts::assets::{AspectRatio, ImageAsset};
    use platemorph_contracts::attributes::AttributeSelection;

    use super::*;
    use crate::directives::compose;
    use crate::test_support::{loopback_client, serve_once, LoopbackResponse};

    fn payload(ratio: AspectRatio) -> DirectivePayload {
        let identity = ImageAsset::from_bytes(b"identity", "image/png", "a.png", ratio);
        let attribute = ImageAsset::from_bytes(b"attribute", "image/jpeg", "b.jpg", ratio);
        compose(&identity, &attribute, &AttributeSelection::default(), Some(ratio))
    }

    fn backend(api_base: &str) -> anyhow::Result<GeminiBackend> {
        let config = GeminiConfig {
            api_key: Some("test-key".to_string()),
            api_base: api_base.to_string(),
            ..GeminiConfig::default()
        };
        Ok(GeminiBackend::with_http(config, loopback_client()?))
    }

    #[test]
    fn config_resolves_fallbacks_and_clamps_timeout() {
        let vars: BTreeMap<&str, &str> = [
            ("GEMINI_API_KEY", "  "),
            ("GOOGLE_API_KEY", "google-key"),
            ("GEMINI_API_BASE", "http://proxy.local/v1beta/"),
            ("PLATEMORPH_REQUEST_TIMEOUT", "2"),
        ]
        .into_iter()
        .collect();
        let config = GeminiConfig::from_lookup(|key| vars.get(key).map(|value| value.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("google-key"));
        assert_eq!(config.api_base, "http://proxy.local/v1beta");
        assert_eq!(config.model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(
            config.endpoint(),
            "http://proxy.local/v1beta/models/gemini-2.5-flash-image:generateContent"
        );

        let defaults = GeminiConfig::from_lookup(|_| None);
        assert_eq!(defaults, GeminiConfig::default());
        assert_eq!(
            defaults.with_timeout_secs(900).request_timeout,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn request_body_carries_parts_and_ratio() {
        let body = GeminiBackend::build_request(&payload(AspectRatio::Landscape));
        assert_eq!(body["contents"][0]["role"], "user");
        let parts = body["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 5);
        assert!(parts[0]["text"]
            .as_str()
            .unwrap_or_default()
            .starts_with("GENERATE_COMMAND: "));
        assert_eq!(parts[2]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[4]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["IMAGE"]));
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "4:3");
    }

    #[test]
    fn successful_response_yields_data_url() -> anyhow::Result<()> {
        let (base, handle) = serve_once(LoopbackResponse::json(
            200,
            "OK",
            &json!({
                "candidates": [{"content": {"parts": [
                    {"text": "done"},
                    {"inlineData": {"mimeType": "image/png", "data": "X"}},
                ]}}]
            }),
        ));
        let url = backend(&base)?
            .generate(&payload(AspectRatio::Landscape))
            .map_err(anyhow::Error::new)?;
        assert_eq!(url, "data:image/png;base64,X");

        let request = handle.join().unwrap_or_default();
        assert!(request.starts_with("POST /models/gemini-2.5-flash-image:generateContent?key=test-key"));
        assert!(request.contains("\"aspectRatio\":\"4:3\""));
        Ok(())
    }

    #[test]
    fn zero_candidates_is_empty_response() -> anyhow::Result<()> {
        let (base, handle) = serve_once(LoopbackResponse::json(200, "OK", &json!({"candidates": []})));
        let result = backend(&base)?.generate(&payload(AspectRatio::Square));
        assert_eq!(result, Err(GenerationError::EmptyResponse));
        let _ = handle.join();
        Ok(())
    }

    #[test]
    fn too_many_requests_honors_retry_after() -> anyhow::Result<()> {
        let (base, handle) = serve_once(
            LoopbackResponse::status(429, "Too Many Requests").with_header("Retry-After", "12"),
        );
        let result = backend(&base)?.generate(&payload(AspectRatio::Square));
        assert_eq!(
            result,
            Err(GenerationError::RateLimited {
                retry_after: Duration::from_secs(12)
            })
        );
        let _ = handle.join();
        Ok(())
    }

    #[test]
    fn resource_exhausted_body_is_rate_limited() -> anyhow::Result<()> {
        let (base, handle) = serve_once(LoopbackResponse::json(
            400,
            "Bad Request",
            &json!({"error": {"code": 400, "status": "RESOURCE_EXHAUSTED", "message": "quota"}}),
        ));
        let result = backend(&base)?.generate(&payload(AspectRatio::Square));
        assert_eq!(
            result,
            Err(GenerationError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            })
        );
        let _ = handle.join();
        Ok(())
    }

    #[test]
    fn upstream_error_uses_structured_message() -> anyhow::Result<()> {
        let (base, handle) = serve_once(LoopbackResponse::json(
            500,
            "Internal Server Error",
            &json!({"error": {"code": 500, "status": "INTERNAL", "message": "backend exploded"}}),
        ));
        let result = backend(&base)?.generate(&payload(AspectRatio::Square));
        assert_eq!(
            result,
            Err(GenerationError::Upstream("HTTP 500: backend exploded".to_string()))
        );
        let _ = handle.join();
        Ok(())
    }

    #[test]
    fn missing_key_fails_without_dispatch() {
        let backend = GeminiBackend::new(GeminiConfig::default());
        let result = backend.generate(&payload(AspectRatio::Square));
        assert!(matches!(result, Err(GenerationError::Upstream(message)) if message.contains("GEMINI_API_KEY")));
    }

    #[test]
    fn classify_reads_retry_info_and_truncates_plain_bodies() {
        let hinted = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            None,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED","details":[{"retryDelay":"7s"}]}}"#,
        );
        assert_eq!(
            hinted,
            GenerationError::RateLimited {
                retry_after: Duration::from_secs(7)
            }
        );

        let long_body = "x".repeat(ERROR_BODY_PREVIEW_CHARS + 50);
        match classify_failure(StatusCode::BAD_GATEWAY, None, &long_body) {
            GenerationError::Upstream(message) => {
                assert!(message.starts_with("HTTP 502: "));
                assert!(message.ends_with("..."));
                assert!(message.len() < long_body.len());
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_retry_hints_are_capped() {
        let cap = Duration::from_secs(3600);
        assert_eq!(parse_retry_after("1e20"), Some(cap));
        assert_eq!(parse_retry_after("2.5"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("inf"), None);

        let hinted = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            None,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED","details":[{"retryDelay":"1e30s"}]}}"#,
        );
        assert_eq!(hinted, GenerationError::RateLimited { retry_after: cap });
    }
}
