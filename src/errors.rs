use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudioError>;

/// Which network-facing call an error came out of. Content-policy and
/// prompt-length classes only exist for image generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Analysis,
    Generation,
}

/// Every failure the studio can surface. Display strings double as the
/// user-facing messages; raw provider detail stays in the logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StudioError {
    #[error("API key is missing. Pass --api-key or set GEMINI_API_KEY.")]
    MissingCredential,
    #[error("Invalid image data format.")]
    InvalidImageEncoding,
    #[error("Invalid file type ({0}). Please upload a PNG, JPG, or WEBP image.")]
    UnsupportedImageType(String),
    #[error("File is too large ({0}MB). Please upload an image smaller than 10MB.")]
    OversizedImage(OrderedMb),
    #[error("The model returned an empty response.")]
    EmptyModelOutput,
    #[error("The AI model returned an invalid response format. Please try again.")]
    MalformedModelOutput,
    #[error("The model did not return any images.")]
    NoImageReturned,
    #[error("Invalid image data received from the model.")]
    EmptyImagePayload,
    #[error("Invalid API key. Please check your Gemini API key.")]
    Unauthorized,
    #[error("API rate limit exceeded. Please wait a moment and try again.")]
    RateLimited,
    #[error("Network error. Please check your internet connection and try again.")]
    NetworkFailure,
    #[error("Request timed out. Please try again, ideally with a smaller image.")]
    Timeout,
    #[error("Image is too large. Please try with a smaller image (under 4MB).")]
    OversizedInput,
    #[error("The prompt was blocked by content policy. Please try a different description.")]
    ContentPolicyRejected,
    #[error("The prompt is too long. Please try a shorter description.")]
    PromptTooLong,
    #[error("{0}")]
    Unknown(String),
}

/// File size in megabytes, kept to one decimal for display. Wrapped so the
/// error enum can stay `Eq` for test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedMb(u64);

impl OrderedMb {
    pub fn from_bytes(len: usize) -> Self {
        // tenths of a megabyte
        OrderedMb((len as u64 * 10) / (1024 * 1024))
    }
}

impl std::fmt::Display for OrderedMb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

const UNAUTHORIZED_KEYWORDS: [&str; 3] = ["api key", "unauthorized", "403"];
const RATE_LIMIT_KEYWORDS: [&str; 3] = ["quota", "rate limit", "429"];
const NETWORK_KEYWORDS: [&str; 3] = ["network", "connection", "dns"];
const TIMEOUT_KEYWORDS: [&str; 2] = ["timeout", "timed out"];
const CONTENT_POLICY_KEYWORDS: [&str; 3] = ["content policy", "safety", "blocked"];

const PASSTHROUGH_MAX_LEN: usize = 200;

fn contains_any(lowered: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

fn generic_failure(phase: CallPhase) -> StudioError {
    let message = match phase {
        CallPhase::Analysis => "Failed to analyze the image. Please try again.",
        CallPhase::Generation => "Failed to generate the image. Please try again.",
    };
    StudioError::Unknown(message.to_string())
}

/// Remaps raw transport/provider error text onto the fixed set of
/// user-facing conditions. Case-insensitive substring matching in priority
/// order, first match wins.
///
/// This is a heuristic over third-party error strings, which are not a
/// stable contract; when the provider rewords an error it falls through to
/// the generic message rather than misfiring.
pub fn classify_transport_error(phase: CallPhase, raw: &str) -> StudioError {
    let lowered = raw.to_lowercase();

    if contains_any(&lowered, &UNAUTHORIZED_KEYWORDS) {
        return StudioError::Unauthorized;
    }
    if contains_any(&lowered, &RATE_LIMIT_KEYWORDS) {
        return StudioError::RateLimited;
    }
    if contains_any(&lowered, &NETWORK_KEYWORDS) {
        return StudioError::NetworkFailure;
    }
    if contains_any(&lowered, &TIMEOUT_KEYWORDS) {
        return StudioError::Timeout;
    }

    match phase {
        CallPhase::Analysis => {
            if lowered.contains("image") && lowered.contains("size") {
                return StudioError::OversizedInput;
            }
        }
        CallPhase::Generation => {
            if contains_any(&lowered, &CONTENT_POLICY_KEYWORDS) {
                return StudioError::ContentPolicyRejected;
            }
            if lowered.contains("prompt") && lowered.contains("too long") {
                return StudioError::PromptTooLong;
            }
        }
    }

    // Short, clean provider messages are already usable as-is.
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.len() < PASSTHROUGH_MAX_LEN && !lowered.contains("stack") {
        return StudioError::Unknown(trimmed.to_string());
    }

    generic_failure(phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_classifies_as_rate_limit() {
        let err = classify_transport_error(
            CallPhase::Analysis,
            "Gemini request failed with status 429: resource exhausted",
        );
        assert_eq!(err, StudioError::RateLimited);
    }

    #[test]
    fn status_403_classifies_as_unauthorized() {
        let err = classify_transport_error(
            CallPhase::Generation,
            "Gemini request failed with status 403: permission denied",
        );
        assert_eq!(err, StudioError::Unauthorized);
    }

    #[test]
    fn credential_keywords_win_over_rate_limit_keywords() {
        let err = classify_transport_error(
            CallPhase::Analysis,
            "API key invalid (quota check skipped, would be 429)",
        );
        assert_eq!(err, StudioError::Unauthorized);
    }

    #[test]
    fn connection_errors_classify_as_network_failure() {
        let err = classify_transport_error(CallPhase::Analysis, "connection reset by peer");
        assert_eq!(err, StudioError::NetworkFailure);
    }

    #[test]
    fn safety_block_is_content_policy_only_during_generation() {
        let raw = "response blocked by safety filters";
        assert_eq!(
            classify_transport_error(CallPhase::Generation, raw),
            StudioError::ContentPolicyRejected
        );
        // During analysis the same text falls through to passthrough.
        assert_eq!(
            classify_transport_error(CallPhase::Analysis, raw),
            StudioError::Unknown(raw.to_string())
        );
    }

    #[test]
    fn prompt_too_long_classifies_during_generation() {
        let err = classify_transport_error(
            CallPhase::Generation,
            "the prompt is too long for this model",
        );
        assert_eq!(err, StudioError::PromptTooLong);
    }

    #[test]
    fn image_size_rejection_classifies_during_analysis() {
        let err = classify_transport_error(
            CallPhase::Analysis,
            "request image exceeds maximum size for inline data",
        );
        assert_eq!(err, StudioError::OversizedInput);
    }

    #[test]
    fn short_clean_messages_pass_through_verbatim() {
        let err = classify_transport_error(CallPhase::Analysis, "Model is overloaded.");
        assert_eq!(err, StudioError::Unknown("Model is overloaded.".to_string()));
    }

    #[test]
    fn long_messages_collapse_to_phase_generic() {
        let raw = "x".repeat(500);
        assert_eq!(
            classify_transport_error(CallPhase::Analysis, &raw),
            StudioError::Unknown("Failed to analyze the image. Please try again.".to_string())
        );
        assert_eq!(
            classify_transport_error(CallPhase::Generation, &raw),
            StudioError::Unknown("Failed to generate the image. Please try again.".to_string())
        );
    }

    #[test]
    fn empty_raw_text_collapses_to_generic() {
        assert_eq!(
            classify_transport_error(CallPhase::Generation, "   "),
            StudioError::Unknown("Failed to generate the image. Please try again.".to_string())
        );
    }

    #[test]
    fn oversized_mb_displays_one_decimal() {
        let mb = OrderedMb::from_bytes(11 * 1024 * 1024);
        assert_eq!(mb.to_string(), "11.0");
        let err = StudioError::OversizedImage(mb);
        assert!(err.to_string().contains("11.0MB"));
    }
}
