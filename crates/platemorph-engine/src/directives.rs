//! Builds the instruction bundle sent to a generation backend.
//!
//! Composition is a pure function of its inputs: no IO, no clock, and the
//! selected attributes are always emitted in catalog order.

use platemorph_contracts::assets::{AspectRatio, ImageAsset};
use platemorph_contracts::attributes::{directive_for, AttributeSelection};
use serde_json::{json, Value};

pub const NO_OP_DIRECTIVE: &str = "Maintain PLATE A with zero modification.";
pub const DIRECTIVE_PREFIX: &str = "GENERATE_COMMAND: ";
pub const IDENTITY_LABEL: &str = "SOURCE IDENTITY (PLATE A):";
pub const ATTRIBUTE_LABEL: &str = "SKELETAL & CLOTHING BLUEPRINT (PLATE B):";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

impl ImagePart {
    fn from_asset(asset: &ImageAsset) -> Self {
        Self {
            mime_type: asset.mime_type.clone(),
            data: asset.data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadPart {
    Text(String),
    Image(ImagePart),
}

impl PayloadPart {
    /// Wire shape of a `generateContent` content part.
    pub fn to_json(&self) -> Value {
        match self {
            PayloadPart::Text(text) => json!({ "text": text }),
            PayloadPart::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.data,
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectivePayload {
    pub directive: String,
    pub identity: ImagePart,
    pub attribute: ImagePart,
    pub aspect_ratio: AspectRatio,
}

impl DirectivePayload {
    /// Ordered parts: directive, identity label and image, attribute label and image.
    pub fn parts(&self) -> Vec<PayloadPart> {
        vec![
            PayloadPart::Text(format!("{DIRECTIVE_PREFIX}{}", self.directive)),
            PayloadPart::Text(IDENTITY_LABEL.to_string()),
            PayloadPart::Image(self.identity.clone()),
            PayloadPart::Text(ATTRIBUTE_LABEL.to_string()),
            PayloadPart::Image(self.attribute.clone()),
        ]
    }
}

pub fn compose(
    identity: &ImageAsset,
    attribute: &ImageAsset,
    selection: &AttributeSelection,
    target_aspect_ratio: Option<AspectRatio>,
) -> DirectivePayload {
    let aspect_ratio = target_aspect_ratio.unwrap_or_default();
    DirectivePayload {
        directive: directive_text(selection, aspect_ratio),
        identity: ImagePart::from_asset(identity),
        attribute: ImagePart::from_asset(attribute),
        aspect_ratio,
    }
}

/// Full directive text. Only the selection and the ratio influence it.
pub fn directive_text(selection: &AttributeSelection, aspect_ratio: AspectRatio) -> String {
    let rules = transformation_rules(selection);
    format!(
        "ROLE: EXPERT NEURAL COMPOSITOR & FASHION RETOUCHER.

TASK: GENERATIVE RE-PROJECTION. You are not \"editing\" an image; you are generating a NEW image of a specific person.

INPUTS:
- PLATE A (IDENTITY MASTER): This person's face (eyes, nose, mouth, chin, skin tone, unique marks) is the ONLY face allowed in the final image. Identity = \"Subject Alpha\". Preserve it with high fidelity.
- PLATE B (STRUCTURE & ATTRIBUTE MASTER): This image supplies the attributes listed below. You MUST ignore the face of the person in PLATE B.

OBJECTIVE:
Generate a photorealistic image of \"Subject Alpha\" (from PLATE A) carrying the selected attributes of PLATE B.

TRANSFORMATION RULES:
{rules}

STRICT OPERATIONAL GUIDELINES:
1. FORCE SELECTED ATTRIBUTES: Every rule above fully replaces the matching aspect of PLATE A. Aspects without a rule stay exactly as in PLATE A.
2. IDENTITY ANCHOR: The face in the output MUST be a perfect, high-fidelity match for the person in PLATE A.
3. NO FACE BLENDING: Never blend identity features from PLATE B into the output. Face = 100% PLATE A.
4. BACKGROUND LOCK: Keep lighting and shadows physically consistent with the final scene around Subject Alpha.
5. ASPECT RATIO: {aspect_ratio}."
    )
}

fn transformation_rules(selection: &AttributeSelection) -> String {
    if selection.is_empty() {
        return NO_OP_DIRECTIVE.to_string();
    }
    selection
        .ordered()
        .into_iter()
        .map(directive_for)
        .collect::<Vec<&str>>()
        .join("\n")
}
