use std::env;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

/// Runtime configuration, loaded once from the environment. The API key is
/// only a fallback for the CLI; the network functions take the credential as
/// an explicit parameter.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub gemini_top_p: f32,
    pub default_creativity: f32,
    pub gemini_safety_settings: String,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

impl Config {
    pub fn load() -> Result<Config> {
        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info"),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_image_model: env_string(
                "GEMINI_IMAGE_MODEL",
                "gemini-2.5-flash-image-preview",
            ),
            gemini_top_p: env_f32("GEMINI_TOP_P", 0.95),
            default_creativity: normalize_creativity(env_f32("DEFAULT_CREATIVITY", 0.8)),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "standard",
            )),
        })
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn normalize_creativity(value: f32) -> f32 {
    if !(0.0..=1.0).contains(&value) {
        warn!("DEFAULT_CREATIVITY {} is outside [0, 1]; clamping.", value);
    }
    value.clamp(0.0, 1.0)
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let lowered = value.trim().to_lowercase();
    match lowered.as_str() {
        "" => "standard".to_string(),
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to standard.",
                value
            );
            "standard".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creativity_is_clamped_into_unit_range() {
        assert_eq!(normalize_creativity(1.5), 1.0);
        assert_eq!(normalize_creativity(-0.2), 0.0);
        assert_eq!(normalize_creativity(0.8), 0.8);
    }

    #[test]
    fn safety_profile_normalizes_aliases() {
        assert_eq!(
            normalize_gemini_safety_settings("off".to_string()),
            "permissive"
        );
        assert_eq!(
            normalize_gemini_safety_settings("Standard".to_string()),
            "standard"
        );
        assert_eq!(
            normalize_gemini_safety_settings("bogus".to_string()),
            "standard"
        );
    }
}
