pub mod camera;

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::ImageReader;
use platemorph_contracts::assets::{AspectRatio, ImageAsset};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::error::IngestError;

pub use camera::{CameraDevice, CameraSession, CameraStream, CaptureController, FrameFileCamera};

const REMOTE_NAME_FALLBACK: &str = "remote-image";
const FETCH_TIMEOUT_SECONDS: u64 = 30;

/// Where an image comes from. Camera frames go through [`CaptureController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    Bytes {
        bytes: Vec<u8>,
        mime_type: Option<String>,
        name: String,
    },
    Url(String),
}

impl ImageSource {
    /// `http(s)://` strings are URLs, anything else is a local path.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageSource::Url(trimmed.to_string())
        } else {
            ImageSource::File(PathBuf::from(trimmed))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    http: HttpClient,
    fetch_timeout: Duration,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self::with_http(HttpClient::new())
    }

    pub fn with_http(http: HttpClient) -> Self {
        Self {
            http,
            fetch_timeout: Duration::from_secs(FETCH_TIMEOUT_SECONDS),
        }
    }

    pub fn normalize(&self, source: ImageSource) -> Result<ImageAsset, IngestError> {
        match source {
            ImageSource::File(path) => normalize_file(&path),
            ImageSource::Bytes {
                bytes,
                mime_type,
                name,
            } => normalize_bytes(&bytes, mime_type.as_deref(), &name),
            ImageSource::Url(url) => self.fetch_url(&url),
        }
    }

    pub fn fetch_url(&self, url: &str) -> Result<ImageAsset, IngestError> {
        let fetch_error = |reason: String| IngestError::Fetch {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .map_err(|err| fetch_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status.as_u16())));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|err| fetch_error(err.to_string()))?;
        let name = name_from_url(url);
        debug!(url, bytes = bytes.len(), "fetched remote image");
        normalize_bytes(&bytes, content_type.as_deref(), &name)
    }
}

pub fn normalize_file(path: &Path) -> Result<ImageAsset, IngestError> {
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image")
        .to_string();
    let bytes = std::fs::read(path).map_err(|err| IngestError::decode(&name, err))?;
    normalize_bytes(&bytes, mime_for_path(path), &name)
}

/// Decodes enough of `bytes` to learn the pixel size and classifies the ratio.
///
/// A declared MIME type wins when it names an image type; otherwise the
/// sniffed container format decides.
pub fn normalize_bytes(
    bytes: &[u8],
    mime_type: Option<&str>,
    name: &str,
) -> Result<ImageAsset, IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::decode(name, "no image data"));
    }
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| IngestError::decode(name, err))?;
    let sniffed = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| IngestError::decode(name, err))?;
    if width == 0 || height == 0 {
        return Err(IngestError::decode(name, "image has zero size"));
    }

    let mime = mime_type
        .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .filter(|value| value.starts_with("image/"))
        .or_else(|| sniffed.map(|format| format.to_mime_type().to_string()))
        .unwrap_or_else(|| "image/png".to_string());

    Ok(ImageAsset::from_bytes(
        bytes,
        mime,
        name,
        AspectRatio::from_dimensions(width, height),
    ))
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

pub fn name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed.path_segments().and_then(|segments| {
                segments
                    .filter(|segment| !segment.is_empty())
                    .last()
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| REMOTE_NAME_FALLBACK.to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use platemorph_contracts::assets::AspectRatio;

    use super::*;
    use crate::test_support::{encode_png, loopback_client, serve_once, LoopbackResponse};

    #[test]
    fn normalize_file_classifies_landscape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("subject.png");
        fs::write(&path, encode_png(1024, 768)?)?;

        let asset = normalize_file(&path)?;
        assert_eq!(asset.name, "subject.png");
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(asset.aspect_ratio, Some(AspectRatio::Landscape));
        assert_eq!(asset.decode_bytes()?, fs::read(&path)?);
        Ok(())
    }

    #[test]
    fn normalize_file_sniffs_format_without_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("upload");
        fs::write(&path, encode_png(1080, 1920)?)?;

        let asset = normalize_file(&path)?;
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(asset.aspect_ratio, Some(AspectRatio::Tall));
        Ok(())
    }

    #[test]
    fn normalize_rejects_garbage() {
        let err = normalize_bytes(b"definitely not an image", Some("image/png"), "broken.png")
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("broken.png"));

        assert!(matches!(
            normalize_bytes(&[], None, "empty.png"),
            Err(IngestError::Decode { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_decode_failure() {
        let result = normalize_file(Path::new("/nonexistent/platemorph/photo.png"));
        assert!(matches!(result, Err(IngestError::Decode { .. })));
    }

    #[test]
    fn source_parse_distinguishes_urls() {
        assert_eq!(
            ImageSource::parse(" HTTPS://example.test/a.png "),
            ImageSource::Url("HTTPS://example.test/a.png".to_string())
        );
        assert_eq!(
            ImageSource::parse("photos/a.png"),
            ImageSource::File(PathBuf::from("photos/a.png"))
        );
    }

    #[test]
    fn name_from_url_uses_trailing_segment() {
        assert_eq!(name_from_url("https://cdn.test/looks/red-coat.jpg"), "red-coat.jpg");
        assert_eq!(name_from_url("https://cdn.test/looks/red-coat.jpg/"), "red-coat.jpg");
        assert_eq!(name_from_url("https://cdn.test/"), "remote-image");
        assert_eq!(name_from_url("not a url"), "remote-image");
    }

    #[test]
    fn fetch_url_builds_asset_from_response() -> anyhow::Result<()> {
        let (base, server) = serve_once(LoopbackResponse::ok(
            "image/png; charset=binary",
            encode_png(900, 1200)?,
        ));
        let normalizer = Normalizer::with_http(loopback_client()?);

        let asset = normalizer.normalize(ImageSource::Url(format!("{base}/looks/coat.png")))?;
        assert_eq!(asset.name, "coat.png");
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(asset.aspect_ratio, Some(AspectRatio::Portrait));

        let request = server.join().unwrap_or_default();
        assert!(request.starts_with("GET /looks/coat.png"));
        Ok(())
    }

    #[test]
    fn fetch_url_forbidden_is_fetch_failure() -> anyhow::Result<()> {
        let (base, _server) = serve_once(LoopbackResponse::status(403, "Forbidden"));
        let normalizer = Normalizer::with_http(loopback_client()?);

        match normalizer.fetch_url(&format!("{base}/private.png")) {
            Err(IngestError::Fetch { reason, .. }) => assert_eq!(reason, "HTTP 403"),
            other => panic!("expected fetch failure, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn fetch_url_connection_refused_is_fetch_failure() -> anyhow::Result<()> {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?.port()
        };
        let normalizer = Normalizer::with_http(loopback_client()?);
        let result = normalizer.fetch_url(&format!("http://127.0.0.1:{port}/gone.png"));
        assert!(matches!(result, Err(IngestError::Fetch { .. })));
        Ok(())
    }
}
