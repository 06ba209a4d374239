use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::errors::{classify_transport_error, CallPhase, Result, StudioError};
use crate::intake::detect_mime_type;
use crate::scene::{GenerationOptions, SceneDescriptor};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const OPTIMIZER_SYSTEM_INSTRUCTION: &str = "You are an expert visual analyst and prompt engineer specifically for Gemini 2.5 Flash Image (nano-banana). Your task is to analyze an uploaded image and create optimized prompts that leverage nano-banana's unique strengths:\n\n\
1. NARRATIVE DESCRIPTIONS: Describe scenes, don't just list keywords. Use descriptive paragraphs that tell a story.\n\
2. PHOTOREALISTIC EXCELLENCE: For realistic images, use photography terminology (camera angles, lens types, lighting setups, technical details).\n\
3. HIGH-FIDELITY TEXT RENDERING: When text is involved, be explicit about font styles, placement, and integration.\n\
4. DETAILED SCENE COMPOSITION: Include specific details about foreground, background, lighting conditions, and atmospheric elements.\n\
5. STYLE CONSISTENCY: Ensure all elements work cohesively within the chosen artistic style.\n\n\
Analyze the uploaded image thoroughly and populate the JSON schema with rich, descriptive content that will produce high-quality, coherent images when used with Gemini 2.5 Flash Image.";

static DATA_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:(image/\w+);base64,(.*)$").expect("valid data URL pattern"));

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

/// Image bytes returned by the generation model, carried inline.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    /// Directly displayable embedded-image reference.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

fn redact_api_key(text: &str, api_key: &str) -> String {
    let key = api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn build_safety_settings() -> Vec<Value> {
    let threshold = match CONFIG.gemini_safety_settings.as_str() {
        "permissive" => "OFF",
        _ => "BLOCK_MEDIUM_AND_ABOVE",
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

/// Strict output contract for the analysis call: all eight descriptor
/// fields, all strings, all required.
fn build_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "subject": {
                "type": "STRING",
                "description": "The main subject described narratively with rich detail, e.g., 'a weathered elderly craftsman with calloused hands and gentle eyes'."
            },
            "setting": {
                "type": "STRING",
                "description": "The environment described as a complete scene with atmospheric details, e.g., 'in a sun-drenched workshop filled with golden dust motes dancing in the air'."
            },
            "action": {
                "type": "STRING",
                "description": "What's happening in the scene described with movement and emotion, e.g., 'carefully examining a delicate piece with focused concentration'."
            },
            "style": {
                "type": "STRING",
                "description": "The artistic approach with specific technical details, e.g., 'photorealistic with studio-quality lighting and sharp focus'."
            },
            "lighting": {
                "type": "STRING",
                "description": "Detailed lighting setup using photography terminology, e.g., 'soft, diffused natural light from a large window creating gentle shadows'."
            },
            "composition": {
                "type": "STRING",
                "description": "Camera angle and framing described with technical precision, e.g., 'medium shot captured with an 85mm lens creating natural perspective and shallow depth of field'."
            },
            "atmosphere": {
                "type": "STRING",
                "description": "The mood and feeling of the scene, e.g., 'serene and contemplative with a sense of timeless craftsmanship'."
            },
            "details": {
                "type": "STRING",
                "description": "Specific visual elements that enhance realism and quality, e.g., 'fine texture details in fabric and skin, subtle color variations, professional color grading'."
            }
        },
        "required": ["subject", "setting", "style", "details", "action", "lighting", "composition", "atmosphere"]
    })
}

fn build_analysis_instruction(style_label: &str, negative_prompt: Option<&str>) -> String {
    let mut instruction = format!(
        "Analyze this image with the precision of a professional photographer and art director. \
         Create a comprehensive scene description optimized for Gemini 2.5 Flash Image generation.\n\n\
         Focus on:\n\
         - NARRATIVE DESCRIPTION: Tell the story of what you see, don't just list elements\n\
         - PHOTOGRAPHIC DETAILS: Include camera angles, lighting setups, and technical specifications\n\
         - ATMOSPHERIC ELEMENTS: Describe the mood, feeling, and environmental conditions\n\
         - STYLE CONSISTENCY: Ensure all elements align with the \"{style_label}\" aesthetic\n\
         - COMPOSITIONAL ELEMENTS: Detail the framing, perspective, and visual hierarchy\n\n\
         Fill out all JSON schema fields with rich, descriptive content that will produce a \
         high-quality, coherent image when used with Gemini 2.5 Flash Image. Each field should \
         contain complete, descriptive sentences rather than keyword lists."
    );

    if let Some(negative) = negative_prompt {
        let negative = negative.trim();
        if !negative.is_empty() {
            instruction.push_str(&format!(
                "\n\nIMPORTANT: Avoid including these concepts or elements in your description: \
                 \"{negative}\". Instead, focus on positive descriptions of what should be present."
            ));
        }
    }

    instruction
}

/// Splits an embeddable data URL into (mime type, base64 payload).
fn parse_data_url(image_data: &str) -> Result<(String, String)> {
    let captures = DATA_URL_RE
        .captures(image_data)
        .ok_or(StudioError::InvalidImageEncoding)?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

/// Parses the analyzer's raw text output into a descriptor. Empty output
/// and non-JSON output are distinct conditions.
fn parse_descriptor(raw_text: &str) -> Result<SceneDescriptor> {
    let trimmed = raw_text.trim();
    if trimmed.is_empty() {
        return Err(StudioError::EmptyModelOutput);
    }
    serde_json::from_str::<SceneDescriptor>(trimmed).map_err(|err| {
        warn!("Failed to parse scene descriptor JSON: {err}");
        StudioError::MalformedModelOutput
    })
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::Text { text } = part {
                        if !text.trim().is_empty() {
                            text_parts.push(text);
                        }
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_image_from_response(response: GeminiResponse) -> Result<GeneratedImage> {
    let mut inline_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::InlineData { inline_data } = part {
                        inline_parts.push(inline_data);
                    }
                }
            }
        }
    }

    let first = inline_parts
        .into_iter()
        .next()
        .ok_or(StudioError::NoImageReturned)?;
    let bytes = general_purpose::STANDARD
        .decode(first.data.trim())
        .map_err(|err| {
            warn!("Returned image data is not valid base64: {err}");
            StudioError::EmptyImagePayload
        })?;
    if bytes.is_empty() {
        return Err(StudioError::EmptyImagePayload);
    }

    let mime_type = if first.mime_type.starts_with("image/") {
        first.mime_type
    } else {
        detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string())
    };

    Ok(GeneratedImage { mime_type, bytes })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn summarize_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        summary.insert("systemInstruction".to_string(), json!(true));
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized = Vec::new();
        for content in contents {
            let parts: Vec<Value> = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| {
                    parts
                        .iter()
                        .map(|part| {
                            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                                json!({ "text": truncate_for_log(text, 200) })
                            } else if let Some(inline) = part.get("inlineData") {
                                let mime = inline
                                    .get("mimeType")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("unknown");
                                let data_len = inline
                                    .get("data")
                                    .and_then(|v| v.as_str())
                                    .map(|v| v.len())
                                    .unwrap_or(0);
                                json!({ "inlineData": { "mimeType": mime, "dataLen": data_len } })
                            } else {
                                json!({ "unknownPart": true })
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            summarized.push(json!({ "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized));
    }

    if let Some(config) = payload.get("generationConfig") {
        let mut config = config.clone();
        if let Some(object) = config.as_object_mut() {
            object.remove("responseSchema");
        }
        summary.insert("generationConfig".to_string(), config);
    }

    Value::Object(summary)
}

fn summarize_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        if let Some(content) = &candidate.content {
            if let Some(parts) = &content.parts {
                for part in parts {
                    match part {
                        GeminiPart::Text { .. } => text_parts += 1,
                        GeminiPart::InlineData { .. } => image_parts += 1,
                    }
                }
            }
        }
    }

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "imageParts": image_parts
    })
}

/// One `generateContent` round trip. No automatic retry: every failure is
/// terminal for this call and classified into a user-facing condition;
/// retry is the user's re-invocation.
async fn call_gemini_api(
    phase: CallPhase,
    model: &str,
    api_key: &str,
    payload: Value,
) -> Result<GeminiResponse> {
    let client = get_http_client();
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
        model
    );

    if tracing::enabled!(tracing::Level::DEBUG) {
        debug!(target: "llm.gemini", model = model, payload = %summarize_payload(&payload));
    }

    let response = match client
        .post(&url)
        .header("x-goog-api-key", api_key)
        .timeout(Duration::from_secs(90))
        .json(&payload)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            let err_text = redact_api_key(&err.to_string(), api_key);
            warn!(
                "Gemini request failed to send: {} (timeout={}, connect={}, status={:?})",
                err_text,
                err.is_timeout(),
                err.is_connect(),
                err.status()
            );
            return Err(if err.is_timeout() {
                StudioError::Timeout
            } else if err.is_connect() {
                StudioError::NetworkFailure
            } else {
                classify_transport_error(phase, &err_text)
            });
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        warn!("Gemini API error: status={}, body={}", status, body_summary);
        let detail = message.unwrap_or(body_summary);
        let raw = redact_api_key(&format!("status {}: {}", status, detail), api_key);
        return Err(classify_transport_error(phase, &raw));
    }

    match response.json::<GeminiResponse>().await {
        Ok(value) => {
            if tracing::enabled!(tracing::Level::DEBUG) {
                debug!(target: "llm.gemini", model = model, response = %summarize_response(&value));
            }
            Ok(value)
        }
        Err(err) => {
            warn!("Gemini response body did not parse: {err}");
            Err(StudioError::MalformedModelOutput)
        }
    }
}

/// Sends the image plus analysis instructions to the multimodal model and
/// parses the structured scene descriptor out of its reply. The returned
/// descriptor may still have blank fields; completion against style
/// defaults is the synthesizer's job.
pub async fn analyze_image(
    image_data: &str,
    options: &GenerationOptions,
    api_key: &str,
) -> Result<SceneDescriptor> {
    if api_key.trim().is_empty() {
        return Err(StudioError::MissingCredential);
    }

    let (mime_type, base64_data) = parse_data_url(image_data)?;
    let instruction =
        build_analysis_instruction(options.style.label(), options.negative_prompt.as_deref());

    let payload = json!({
        "systemInstruction": { "parts": [{ "text": OPTIMIZER_SYSTEM_INSTRUCTION }] },
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": mime_type, "data": base64_data } },
                { "text": instruction }
            ]
        }],
        "generationConfig": {
            "temperature": options.creativity,
            "topP": CONFIG.gemini_top_p,
            "responseMimeType": "application/json",
            "responseSchema": build_response_schema(),
        },
        "safetySettings": build_safety_settings(),
    });

    let model = CONFIG.gemini_model.as_str();
    log_llm_timing(
        "gemini",
        model,
        "analyze_image",
        Some(json!({ "style": options.style.label(), "creativity": options.creativity })),
        || async {
            let response = call_gemini_api(CallPhase::Analysis, model, api_key, payload).await?;
            parse_descriptor(&extract_text_from_response(response))
        },
    )
    .await
}

/// Sends the narrative prompt to the image-generation model and decodes the
/// first inline image part of the reply.
pub async fn generate_image(prompt: &str, api_key: &str) -> Result<GeneratedImage> {
    if api_key.trim().is_empty() {
        return Err(StudioError::MissingCredential);
    }

    let payload = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        "safetySettings": build_safety_settings(),
    });

    let model = CONFIG.gemini_image_model.as_str();
    log_llm_timing(
        "gemini",
        model,
        "generate_image",
        Some(json!({ "promptChars": prompt.chars().count() })),
        || async {
            let response = call_gemini_api(CallPhase::Generation, model, api_key, payload).await?;
            extract_image_from_response(response)
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::ArtStyle;

    fn response_from(value: Value) -> GeminiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn data_url_parses_into_mime_and_payload() {
        let (mime, data) = parse_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "aGVsbG8=");
    }

    #[test]
    fn non_data_url_is_invalid_encoding() {
        let err = parse_data_url("https://example.com/cat.png").unwrap_err();
        assert_eq!(err, StudioError::InvalidImageEncoding);
    }

    #[test]
    fn blank_model_output_is_empty_not_malformed() {
        assert_eq!(
            parse_descriptor("  \n ").unwrap_err(),
            StudioError::EmptyModelOutput
        );
    }

    #[test]
    fn non_json_model_output_is_malformed() {
        let err = parse_descriptor("I cannot describe this image.").unwrap_err();
        assert_eq!(err, StudioError::MalformedModelOutput);
    }

    #[test]
    fn descriptor_parses_with_omitted_fields_left_blank() {
        let descriptor = parse_descriptor(r#"{"subject": "a red fox", "style": ""}"#).unwrap();
        assert_eq!(descriptor.subject, "a red fox");
        assert!(descriptor.style.is_empty());
        assert!(descriptor.composition.is_empty());
    }

    #[test]
    fn response_schema_requires_all_eight_fields() {
        let schema = build_response_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 8);
        for field in required {
            let name = field.as_str().unwrap();
            assert_eq!(schema["properties"][name]["type"], "STRING");
        }
    }

    #[test]
    fn negative_prompt_is_embedded_only_when_non_blank() {
        let with = build_analysis_instruction("Anime", Some("blurry, text"));
        assert!(with.contains("\"blurry, text\""));
        let without = build_analysis_instruction("Anime", Some("   "));
        assert!(!without.contains("IMPORTANT: Avoid"));
        assert!(without.contains("\"Anime\" aesthetic"));
    }

    #[test]
    fn text_only_response_has_no_image() {
        let response = response_from(json!({
            "candidates": [{ "content": { "parts": [{ "text": "sorry, text only" }] } }]
        }));
        assert_eq!(
            extract_image_from_response(response).unwrap_err(),
            StudioError::NoImageReturned
        );
    }

    #[test]
    fn inline_part_with_empty_data_is_empty_payload() {
        let response = response_from(json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "" } }
            ] } }]
        }));
        assert_eq!(
            extract_image_from_response(response).unwrap_err(),
            StudioError::EmptyImagePayload
        );
    }

    #[test]
    fn inline_image_part_decodes_to_bytes() {
        let encoded = general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
        let response = response_from(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "here you go" },
                { "inlineData": { "mimeType": "image/png", "data": encoded } }
            ] } }]
        }));
        let image = extract_image_from_response(response).unwrap();
        assert_eq!(image.bytes, vec![1, 2, 3, 4]);
        assert_eq!(image.mime_type, "image/png");
        assert!(image.to_data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn multiple_text_parts_join_with_newlines() {
        let response = response_from(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "{\"subject\":" },
                { "text": "\"a fox\"}" }
            ] } }]
        }));
        assert_eq!(
            extract_text_from_response(response),
            "{\"subject\":\n\"a fox\"}"
        );
    }

    #[test]
    fn error_body_summary_prefers_nested_error_message() {
        let (message, _) = summarize_error_body(
            r#"{"error": {"code": 429, "message": "Resource has been exhausted"}}"#,
        );
        assert_eq!(message.as_deref(), Some("Resource has been exhausted"));
        let (none, summary) = summarize_error_body("plain text failure");
        assert!(none.is_none());
        assert_eq!(summary, "plain text failure");
    }

    #[test]
    fn api_key_is_redacted_from_error_text() {
        let text = "request to https://host?key=sk-secret failed";
        assert_eq!(
            redact_api_key(text, "sk-secret"),
            "request to https://host?key=[redacted] failed"
        );
        assert_eq!(redact_api_key(text, "  "), text);
    }

    #[tokio::test]
    async fn analyze_fails_without_credential_before_any_network_io() {
        let options = GenerationOptions::new(ArtStyle::Cinematic);
        let err = analyze_image("data:image/png;base64,AAAA", &options, "  ")
            .await
            .unwrap_err();
        assert_eq!(err, StudioError::MissingCredential);
    }

    #[tokio::test]
    async fn generate_fails_without_credential_before_any_network_io() {
        let err = generate_image("a fox", "").await.unwrap_err();
        assert_eq!(err, StudioError::MissingCredential);
    }

    #[tokio::test]
    async fn analyze_rejects_malformed_image_data_before_any_network_io() {
        let options = GenerationOptions::new(ArtStyle::Anime);
        let err = analyze_image("not-a-data-url", &options, "test-key")
            .await
            .unwrap_err();
        assert_eq!(err, StudioError::InvalidImageEncoding);
    }
}
