use serde_json::Value;

use super::{
    decode_base64, ensure_no_provider_error, non_empty_image, non_empty_str, ParseError,
    ResponseParser,
};
use crate::conversation::ImagePart;

/// Parser for Gemini `generateContent` payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeResponseParser;

impl NativeResponseParser {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseParser for NativeResponseParser {
    fn parse_image(&self, payload: &Value) -> Result<Option<ImagePart>, ParseError> {
        ensure_no_provider_error(payload)?;
        for part in first_candidate_parts(payload) {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let Some(data) = non_empty_str(inline.get("data")) else {
                continue;
            };
            let bytes = decode_base64(data, "Gemini inline image base64 decode failed")?;
            let mime = non_empty_str(inline.get("mimeType").or_else(|| inline.get("mime_type")))
                .unwrap_or("image/png");
            if let Some(image) = non_empty_image(mime, bytes) {
                return Ok(Some(image));
            }
        }
        Ok(None)
    }

    fn parse_text(&self, payload: &Value) -> Result<Option<String>, ParseError> {
        ensure_no_provider_error(payload)?;
        let mut out = String::new();
        for part in first_candidate_parts(payload) {
            if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        let trimmed = out.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
        Ok(stop_reason(payload))
    }
}

fn first_candidate(payload: &Value) -> Option<&Value> {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
}

fn first_candidate_parts(payload: &Value) -> impl Iterator<Item = &Value> {
    first_candidate(payload)
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| parts.iter())
        .into_iter()
        .flatten()
}

/// Explains an empty reply: a blocked prompt or an abnormal finish reason.
fn stop_reason(payload: &Value) -> Option<String> {
    if let Some(reason) = non_empty_str(
        payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason")),
    ) {
        return Some(format!("prompt blocked: {reason}"));
    }
    let candidate = first_candidate(payload)?;
    let reason = non_empty_str(candidate.get("finishReason"))?;
    if reason == "STOP" {
        return None;
    }
    Some(format!("generation stopped: {reason}"))
}
