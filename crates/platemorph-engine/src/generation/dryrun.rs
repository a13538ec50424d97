use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::GenerationBackend;
use crate::directives::DirectivePayload;
use crate::error::GenerationError;

const DRYRUN_LONGEST_EDGE: u32 = 512;

/// Offline backend: renders a solid swatch whose color is derived from the
/// directive, sized to the requested aspect ratio.
#[derive(Debug, Clone)]
pub struct DryrunBackend {
    longest_edge: u32,
}

impl Default for DryrunBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DryrunBackend {
    pub fn new() -> Self {
        Self {
            longest_edge: DRYRUN_LONGEST_EDGE,
        }
    }

    pub fn with_longest_edge(longest_edge: u32) -> Self {
        Self {
            longest_edge: longest_edge.max(1),
        }
    }
}

impl GenerationBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, payload: &DirectivePayload) -> Result<String, GenerationError> {
        let (width, height) = payload.aspect_ratio.dimensions(self.longest_edge);
        let digest = directive_digest(payload);
        debug!(
            width,
            height,
            digest = %hex::encode(&digest[..4]),
            "rendering dryrun swatch"
        );
        let image = RgbImage::from_pixel(
            width.max(1),
            height.max(1),
            Rgb([digest[0], digest[1], digest[2]]),
        );
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut bytes, ImageFormat::Png)
            .map_err(|err| GenerationError::Upstream(format!("dryrun render failed: {err}")))?;
        Ok(format!(
            "data:image/png;base64,{}",
            BASE64.encode(bytes.into_inner())
        ))
    }
}

fn directive_digest(payload: &DirectivePayload) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(payload.directive.as_bytes());
    hasher.update(payload.aspect_ratio.as_str().as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use platemorph_contracts::assets::{decode_data_url, AspectRatio, ImageAsset};
    use platemorph_contracts::attributes::{AttributeKind, AttributeSelection};

    use super::*;
    use crate::directives::compose;

    fn payload(selection: &AttributeSelection, ratio: AspectRatio) -> DirectivePayload {
        let asset = ImageAsset::from_bytes(b"stub", "image/png", "stub.png", ratio);
        compose(&asset, &asset, selection, Some(ratio))
    }

    #[test]
    fn renders_png_sized_to_ratio() -> anyhow::Result<()> {
        let backend = DryrunBackend::with_longest_edge(160);
        let url = backend
            .generate(&payload(&AttributeSelection::default(), AspectRatio::Wide))
            .map_err(anyhow::Error::new)?;
        let (mime, bytes) = decode_data_url(&url)?;
        assert_eq!(mime, "image/png");
        let image = image::load_from_memory(&bytes)?;
        assert_eq!((image.width(), image.height()), (160, 90));
        Ok(())
    }

    #[test]
    fn color_is_stable_per_directive() -> anyhow::Result<()> {
        let backend = DryrunBackend::with_longest_edge(8);
        let expression = payload(&AttributeSelection::default(), AspectRatio::Square);
        let pose = payload(
            &AttributeSelection::from_kinds([AttributeKind::Pose]),
            AspectRatio::Square,
        );

        let first = backend.generate(&expression).map_err(anyhow::Error::new)?;
        let again = backend.generate(&expression).map_err(anyhow::Error::new)?;
        let other = backend.generate(&pose).map_err(anyhow::Error::new)?;
        assert_eq!(first, again);
        assert_ne!(first, other);
        Ok(())
    }
}
