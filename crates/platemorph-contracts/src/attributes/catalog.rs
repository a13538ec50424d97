use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKind {
    Expression,
    Pose,
    Lighting,
    Outfit,
    Hairstyle,
    Mood,
}

impl AttributeKind {
    /// Catalog order. Directive text is always emitted in this order.
    pub const ALL: [AttributeKind; 6] = [
        AttributeKind::Expression,
        AttributeKind::Pose,
        AttributeKind::Lighting,
        AttributeKind::Outfit,
        AttributeKind::Hairstyle,
        AttributeKind::Mood,
    ];

    pub fn id(self) -> &'static str {
        match self {
            AttributeKind::Expression => "Expression",
            AttributeKind::Pose => "Pose",
            AttributeKind::Lighting => "Lighting",
            AttributeKind::Outfit => "Outfit",
            AttributeKind::Hairstyle => "Hairstyle",
            AttributeKind::Mood => "Mood",
        }
    }

    pub fn entry(self) -> &'static AttributeEntry {
        &CATALOG[self.position()]
    }

    fn position(self) -> usize {
        match self {
            AttributeKind::Expression => 0,
            AttributeKind::Pose => 1,
            AttributeKind::Lighting => 2,
            AttributeKind::Outfit => 3,
            AttributeKind::Hairstyle => 4,
            AttributeKind::Mood => 5,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AttributeKind {
    type Err = String;

    /// Accepts the id, the catalog label, or a couple of loose aliases.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err("attribute name is empty".to_string());
        }
        let aliases = [
            ("accessories", AttributeKind::Outfit),
            ("outfit/accessories", AttributeKind::Outfit),
            ("hair", AttributeKind::Hairstyle),
            ("stance", AttributeKind::Pose),
        ];
        if let Some((_, kind)) = aliases.iter().find(|(alias, _)| *alias == normalized) {
            return Ok(*kind);
        }
        CATALOG
            .iter()
            .find(|entry| {
                entry.kind.id().to_ascii_lowercase() == normalized
                    || entry.label.to_ascii_lowercase() == normalized
            })
            .map(|entry| entry.kind)
            .ok_or_else(|| format!("unknown attribute '{}'", raw.trim()))
    }
}

impl Serialize for AttributeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl<'de> Deserialize<'de> for AttributeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeEntry {
    pub kind: AttributeKind,
    pub label: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
}

static CATALOG: [AttributeEntry; 6] = [
    AttributeEntry {
        kind: AttributeKind::Expression,
        label: "Expression",
        description: "Map the exact facial muscle movements, mouth shape, and eye state from the reference.",
        icon: "fa-face-laugh-wink",
    },
    AttributeEntry {
        kind: AttributeKind::Pose,
        label: "Body & Stance",
        description: "Transfer the full skeletal posture, standing position, and hand placement from the reference.",
        icon: "fa-user-ninja",
    },
    AttributeEntry {
        kind: AttributeKind::Lighting,
        label: "Atmosphere",
        description: "Transfer the shadow depth, light direction, and color grade of the reference scene.",
        icon: "fa-sun",
    },
    AttributeEntry {
        kind: AttributeKind::Outfit,
        label: "Full Outfit",
        description: "Replace the clothing of the target with the exact outfit, fabrics, and gear worn by the reference.",
        icon: "fa-shirt",
    },
    AttributeEntry {
        kind: AttributeKind::Hairstyle,
        label: "Hair Stylist",
        description: "Adopt the hair volume, texture, cut, and color while fitting it to the target face.",
        icon: "fa-scissors",
    },
    AttributeEntry {
        kind: AttributeKind::Mood,
        label: "Visual Vibe",
        description: "Capture the photographic style, grain, and artistic essence of the reference.",
        icon: "fa-palette",
    },
];

pub fn list_attributes() -> &'static [AttributeEntry] {
    &CATALOG
}

pub fn directive_for(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::Expression => {
            "- FACIAL MORPH: Synchronize the mouth shape, eye narrowing, and eyebrow position from PLATE B onto the face of PLATE A. Keep every identity feature of PLATE A unchanged."
        }
        AttributeKind::Pose => {
            "- SKELETAL OVERRIDE (CRITICAL): Discard PLATE A's original standing/sitting position. Reconstruct the person from PLATE A so they are standing, leaning, and gesturing EXACTLY like the person in PLATE B. This is a total physical reconfiguration; the face stays PLATE A."
        }
        AttributeKind::Lighting => {
            "- GLOBAL ILLUMINATION: Transfer the exact light source angle, shadows, and color temperature from PLATE B onto the final rendered subject without altering facial structure."
        }
        AttributeKind::Outfit => {
            "- FASHION TRANSPLANT (CRITICAL): Completely remove all existing clothing from the person in PLATE A. Clothe them in the EXACT garments, fabrics, textures, accessories, and layers shown in PLATE B. Ensure the clothes fold and fit according to the final pose."
        }
        AttributeKind::Hairstyle => {
            "- VOLUMETRIC GROOMING: Replace the hair of PLATE A with the volume, texture, and style from PLATE B, fitted to PLATE A's head shape and hairline."
        }
        AttributeKind::Mood => {
            "- CINEMATIC GRADE: Apply the photographic style, grain, and color palette of PLATE B to the entire final output while keeping PLATE A's skin tone recognizable."
        }
    }
}
