use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonical output ratios, in the order used to break classification ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AspectRatio {
    #[default]
    Square,
    Portrait,
    Landscape,
    Tall,
    Wide,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Tall,
        AspectRatio::Wide,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }

    pub fn value(self) -> f64 {
        match self {
            AspectRatio::Square => 1.0,
            AspectRatio::Portrait => 3.0 / 4.0,
            AspectRatio::Landscape => 4.0 / 3.0,
            AspectRatio::Tall => 9.0 / 16.0,
            AspectRatio::Wide => 16.0 / 9.0,
        }
    }

    /// Nearest canonical ratio by absolute distance. Equidistant candidates
    /// resolve to whichever comes first in [`AspectRatio::ALL`].
    pub fn classify(ratio: f64) -> AspectRatio {
        if !ratio.is_finite() || ratio <= 0.0 {
            return AspectRatio::Square;
        }
        let mut best = AspectRatio::Square;
        let mut best_delta = f64::MAX;
        for candidate in AspectRatio::ALL {
            let delta = (candidate.value() - ratio).abs();
            if delta < best_delta {
                best = candidate;
                best_delta = delta;
            }
        }
        best
    }

    pub fn from_dimensions(width: u32, height: u32) -> AspectRatio {
        if height == 0 {
            return AspectRatio::Square;
        }
        AspectRatio::classify(width as f64 / height as f64)
    }

    /// Pixel dimensions with the given longest edge, used for placeholder renders.
    pub fn dimensions(self, longest_edge: u32) -> (u32, u32) {
        let ratio = self.value();
        if ratio >= 1.0 {
            (longest_edge, ((longest_edge as f64) / ratio).round() as u32)
        } else {
            (((longest_edge as f64) * ratio).round() as u32, longest_edge)
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == trimmed)
            .ok_or_else(|| format!("unsupported aspect ratio '{trimmed}'"))
    }
}

impl Serialize for AspectRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A normalized image held by a workspace slot. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    /// Base64 image bytes without a `data:` prefix.
    pub data: String,
    pub mime_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
}

impl ImageAsset {
    pub fn from_bytes(
        bytes: &[u8],
        mime_type: impl Into<String>,
        name: impl Into<String>,
        aspect_ratio: AspectRatio,
    ) -> Self {
        Self {
            data: BASE64.encode(bytes),
            mime_type: mime_type.into(),
            name: name.into(),
            aspect_ratio: Some(aspect_ratio),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode_bytes(&self) -> anyhow::Result<Vec<u8>> {
        BASE64
            .decode(self.data.as_bytes())
            .with_context(|| format!("asset '{}' carries invalid base64", self.name))
    }
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and payload.
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    if mime.is_empty() {
        return None;
    }
    Some((mime, payload))
}

pub fn decode_data_url(url: &str) -> anyhow::Result<(String, Vec<u8>)> {
    let Some((mime, payload)) = parse_data_url(url) else {
        anyhow::bail!("not a base64 data URL");
    };
    let bytes = BASE64
        .decode(payload.as_bytes())
        .context("data URL payload is not valid base64")?;
    Ok((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classify_picks_nearest_canonical_ratio() {
        assert_eq!(AspectRatio::classify(1.0), AspectRatio::Square);
        assert_eq!(AspectRatio::classify(1.1), AspectRatio::Square);
        assert_eq!(AspectRatio::classify(1.2), AspectRatio::Landscape);
        assert_eq!(AspectRatio::classify(1.5), AspectRatio::Landscape);
        assert_eq!(AspectRatio::classify(2.4), AspectRatio::Wide);
        assert_eq!(AspectRatio::classify(0.7), AspectRatio::Portrait);
        assert_eq!(AspectRatio::classify(0.5), AspectRatio::Tall);
    }

    #[test]
    fn classify_ties_resolve_to_earlier_entry() {
        // 0.875 sits exactly between 3:4 (0.75) and 1:1 (1.0).
        assert_eq!(AspectRatio::classify(0.875), AspectRatio::Square);
    }

    #[test]
    fn classify_degenerate_inputs_fall_back_to_square() {
        assert_eq!(AspectRatio::classify(f64::NAN), AspectRatio::Square);
        assert_eq!(AspectRatio::classify(0.0), AspectRatio::Square);
        assert_eq!(AspectRatio::from_dimensions(640, 0), AspectRatio::Square);
    }

    #[test]
    fn from_dimensions_matches_common_sensors() {
        assert_eq!(AspectRatio::from_dimensions(1024, 768), AspectRatio::Landscape);
        assert_eq!(AspectRatio::from_dimensions(1080, 1920), AspectRatio::Tall);
        assert_eq!(AspectRatio::from_dimensions(1920, 1080), AspectRatio::Wide);
        assert_eq!(AspectRatio::from_dimensions(900, 1200), AspectRatio::Portrait);
    }

    #[test]
    fn aspect_ratio_serializes_as_label() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_value(AspectRatio::Wide)?, json!("16:9"));
        let parsed: AspectRatio = serde_json::from_value(json!("3:4"))?;
        assert_eq!(parsed, AspectRatio::Portrait);
        assert!(serde_json::from_value::<AspectRatio>(json!("2:3")).is_err());
        Ok(())
    }

    #[test]
    fn asset_without_ratio_deserializes() -> anyhow::Result<()> {
        let asset: ImageAsset = serde_json::from_value(json!({
            "data": "AAAA",
            "mimeType": "image/png",
            "name": "legacy.png",
        }))?;
        assert_eq!(asset.aspect_ratio, None);
        assert_eq!(asset.data_url(), "data:image/png;base64,AAAA");
        Ok(())
    }

    #[test]
    fn data_url_parsing() -> anyhow::Result<()> {
        assert_eq!(
            parse_data_url("data:image/png;base64,X"),
            Some(("image/png", "X"))
        );
        assert_eq!(parse_data_url("data:;base64,X"), None);
        assert_eq!(parse_data_url("https://example.test/a.png"), None);

        let asset = ImageAsset::from_bytes(b"pixels", "image/webp", "a.webp", AspectRatio::Square);
        let (mime, bytes) = decode_data_url(&asset.data_url())?;
        assert_eq!(mime, "image/webp");
        assert_eq!(bytes, b"pixels");
        Ok(())
    }

    #[test]
    fn dimensions_follow_ratio() {
        assert_eq!(AspectRatio::Square.dimensions(512), (512, 512));
        assert_eq!(AspectRatio::Landscape.dimensions(512), (512, 384));
        assert_eq!(AspectRatio::Tall.dimensions(512), (288, 512));
    }
}
