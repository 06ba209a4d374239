use std::fmt;

use serde::Deserialize;
use tracing::warn;

use crate::config::CONFIG;

/// The artistic styles offered to the user, in display order.
pub const ARTISTIC_STYLES: [ArtStyle; 5] = [
    ArtStyle::Photorealistic,
    ArtStyle::DigitalPainting,
    ArtStyle::Watercolor,
    ArtStyle::Anime,
    ArtStyle::Cinematic,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtStyle {
    Photorealistic,
    DigitalPainting,
    Watercolor,
    Anime,
    Cinematic,
}

impl ArtStyle {
    pub fn label(self) -> &'static str {
        match self {
            ArtStyle::Photorealistic => "Photorealistic",
            ArtStyle::DigitalPainting => "Digital Painting",
            ArtStyle::Watercolor => "Watercolor",
            ArtStyle::Anime => "Anime",
            ArtStyle::Cinematic => "Cinematic",
        }
    }

    /// Case-insensitive parse; accepts hyphens or underscores in place of
    /// spaces so `--style digital-painting` works from a shell.
    pub fn parse(value: &str) -> Option<ArtStyle> {
        let normalized = value.trim().to_lowercase().replace(['-', '_'], " ");
        ARTISTIC_STYLES
            .into_iter()
            .find(|style| style.label().to_lowercase() == normalized)
    }
}

impl fmt::Display for ArtStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Caller-supplied knobs for one analysis run. Not persisted anywhere.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub style: ArtStyle,
    pub creativity: f32,
    pub negative_prompt: Option<String>,
}

impl GenerationOptions {
    pub fn new(style: ArtStyle) -> Self {
        GenerationOptions {
            style,
            creativity: CONFIG.default_creativity,
            negative_prompt: None,
        }
    }

    pub fn with_creativity(mut self, creativity: f32) -> Self {
        if !(0.0..=1.0).contains(&creativity) {
            warn!(
                "Creativity {} is outside [0, 1]; clamping.",
                creativity
            );
        }
        self.creativity = creativity.clamp(0.0, 1.0);
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: Option<String>) -> Self {
        self.negative_prompt =
            negative_prompt.filter(|value| !value.trim().is_empty());
        self
    }
}

/// The eight-field structured scene description produced by the analyzer.
/// All fields default to empty so any JSON object the model returns parses;
/// blanks are filled in by [`SceneDescriptor::completed`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SceneDescriptor {
    pub subject: String,
    pub setting: String,
    pub action: String,
    pub style: String,
    pub lighting: String,
    pub composition: String,
    pub atmosphere: String,
    pub details: String,
}

impl SceneDescriptor {
    /// Returns a copy with every blank or whitespace-only field replaced by
    /// its default for the chosen style. An empty string from the model and
    /// an omitted field are treated identically.
    pub fn completed(&self, style: ArtStyle) -> SceneDescriptor {
        let label = style.label();
        SceneDescriptor {
            subject: non_blank_or(&self.subject, DEFAULT_SUBJECT),
            setting: non_blank_or(&self.setting, DEFAULT_SETTING),
            action: non_blank_or(&self.action, DEFAULT_ACTION),
            style: non_blank_or(&self.style, label),
            lighting: non_blank_or(&self.lighting, lighting_default(label)),
            composition: non_blank_or(&self.composition, DEFAULT_COMPOSITION),
            atmosphere: non_blank_or(&self.atmosphere, atmosphere_default(label)),
            details: non_blank_or(&self.details, DEFAULT_DETAILS),
        }
    }

    /// Renders the final narrative prompt. Fixed field order, deterministic.
    pub fn narrative(&self) -> String {
        format!(
            "{} {}, {}. {}. The scene is rendered in {} with {}. {}. {}.",
            self.subject,
            self.action,
            self.setting,
            self.atmosphere,
            self.style,
            self.lighting,
            self.composition,
            self.details
        )
    }
}

fn non_blank_or(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

const DEFAULT_SUBJECT: &str = "A carefully composed scene with rich visual detail";
const DEFAULT_ACTION: &str = "captured in a moment of natural, engaging activity";
const DEFAULT_SETTING: &str = "set in an atmospheric environment that complements the subject";
const DEFAULT_COMPOSITION: &str =
    "professionally framed with balanced composition and appropriate depth of field";
const DEFAULT_DETAILS: &str =
    "rendered with high-fidelity detail, realistic textures, and professional color grading";

/// Style-specific fallback lighting. Matching is on the style label so the
/// generic arm covers anything outside the named five.
pub fn lighting_default(style_label: &str) -> &'static str {
    match style_label {
        "Cinematic" => {
            "dramatic three-point lighting setup with strong key light, subtle fill light, \
             and rim lighting for depth and separation"
        }
        "Photorealistic" => {
            "natural, soft window light with gentle shadows, creating realistic skin tones \
             and material textures"
        }
        "Watercolor" => {
            "soft, diffused ambient lighting that enhances the translucent quality of \
             watercolor pigments"
        }
        "Anime" => {
            "vibrant, high-contrast cel-shaded lighting with clean shadow edges and bright \
             highlights"
        }
        "Digital Painting" => {
            "rich, painterly lighting with visible brush stroke textures and artistic color \
             temperature variations"
        }
        _ => "balanced, professional lighting that enhances the subject and mood",
    }
}

/// Style-specific fallback atmosphere.
pub fn atmosphere_default(style_label: &str) -> &'static str {
    match style_label {
        "Cinematic" => {
            "dramatic and emotionally engaging with a sense of narrative tension and visual \
             storytelling"
        }
        "Photorealistic" => {
            "authentic and lifelike with natural, believable environmental conditions"
        }
        "Watercolor" => {
            "soft and dreamy with an ethereal, flowing quality that evokes gentle emotions"
        }
        "Anime" => "vibrant and energetic with bold colors and dynamic visual impact",
        "Digital Painting" => {
            "artistic and expressive with rich textures and painterly aesthetic appeal"
        }
        _ => "harmonious and visually appealing with appropriate mood for the subject",
    }
}
