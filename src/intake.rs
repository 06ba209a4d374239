use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use tracing::{info, warn};

use crate::errors::{OrderedMb, Result, StudioError};

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const RECOMMENDED_IMAGE_BYTES: usize = 4 * 1024 * 1024;

const ALLOWED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// A validated image ready to embed in a model request.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// Validates type and size and wraps the bytes. Rejections happen here,
    /// before any network call is possible.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<ImagePayload> {
        let mime_type = detect_mime_type(&bytes)
            .ok_or_else(|| StudioError::UnsupportedImageType("unknown".to_string()))?;
        if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(StudioError::UnsupportedImageType(mime_type));
        }

        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(StudioError::OversizedImage(OrderedMb::from_bytes(bytes.len())));
        }
        if bytes.len() > RECOMMENDED_IMAGE_BYTES {
            warn!(
                "Large image ({}MB). Analysis may take longer; under 4MB is recommended.",
                OrderedMb::from_bytes(bytes.len())
            );
        }

        Ok(ImagePayload { mime_type, bytes })
    }

    /// The embeddable data-URL form consumed by the analyzer.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

pub async fn load_image(path: &Path) -> Result<ImagePayload> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        StudioError::Unknown(format!("Failed to read {}: {}", path.display(), err))
    })?;
    info!("Loaded {} ({} bytes)", path.display(), bytes.len());
    ImagePayload::from_bytes(bytes)
}

/// Mime type by magic bytes. File extensions are not trusted.
pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| match kind.mime_type() {
        "image/jpg" => "image/jpeg".to_string(),
        other => other.to_string(),
    })
}
