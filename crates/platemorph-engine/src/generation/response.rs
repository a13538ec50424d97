use serde::Deserialize;

use crate::error::GenerationError;

/// `generateContent` response, reduced to what image extraction needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    content: Option<RawContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<RawInlineData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawInlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    Image(InlineImage),
    Other,
}

impl From<RawPart> for ResponsePart {
    fn from(raw: RawPart) -> Self {
        if let Some(inline) = raw.inline_data {
            if let Some(data) = inline.data.filter(|data| !data.is_empty()) {
                return ResponsePart::Image(InlineImage {
                    mime_type: inline
                        .mime_type
                        .filter(|mime| !mime.trim().is_empty())
                        .unwrap_or_else(|| "image/png".to_string()),
                    data,
                });
            }
        }
        match raw.text {
            Some(text) => ResponsePart::Text(text),
            None => ResponsePart::Other,
        }
    }
}

impl Candidate {
    pub fn parts(&self) -> Vec<ResponsePart> {
        self.content
            .as_ref()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .cloned()
                    .map(ResponsePart::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// First inline image across candidates in order, as a `data:` URL.
pub fn extract_image_url(response: &GenerateContentResponse) -> Result<String, GenerationError> {
    let parts: Vec<ResponsePart> = response
        .candidates
        .iter()
        .flat_map(Candidate::parts)
        .collect();
    if parts.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    parts
        .into_iter()
        .find_map(|part| match part {
            ResponsePart::Image(image) => Some(image.data_url()),
            _ => None,
        })
        .ok_or(GenerationError::NoImageInResponse)
}
