//! Extraction of image bytes and assistant text from provider JSON payloads.
//!
//! Each provider family gets its own [`ResponseParser`]; the transport picks the
//! parser that matches its wire format when it is constructed.

mod gateway;
mod native;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::conversation::ImagePart;

pub use gateway::GatewayResponseParser;
pub use native::NativeResponseParser;

/// Parsed outcome of a single provider call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    pub image: Option<ImagePart>,
    pub text: String,
}

impl GenerationResult {
    pub fn has_image(&self) -> bool {
        self.image.as_ref().is_some_and(|image| !image.is_empty())
    }

    /// True when neither a non-empty image nor any non-blank text came back.
    pub fn is_empty(&self) -> bool {
        !self.has_image() && self.text.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The payload carried an explicit `error` object.
    #[error("{0}")]
    Provider(String),
    #[error("{context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    #[error("malformed data URL: {0}")]
    DataUrl(String),
}

pub trait ResponseParser: Send + Sync {
    fn parse_image(&self, payload: &Value) -> Result<Option<ImagePart>, ParseError>;

    fn parse_text(&self, payload: &Value) -> Result<Option<String>, ParseError>;

    fn parse(&self, payload: &Value) -> Result<GenerationResult, ParseError> {
        let image = self.parse_image(payload)?;
        let text = self.parse_text(payload)?.unwrap_or_default();
        Ok(GenerationResult { image, text })
    }
}

/// Returns the provider's message when the payload has a top-level `error`.
pub fn provider_error_message(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::Object(error) => Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| "provider returned an error without a message".to_string()),
        ),
        Value::String(message) if !message.trim().is_empty() => Some(message.trim().to_string()),
        _ => None,
    }
}

fn ensure_no_provider_error(payload: &Value) -> Result<(), ParseError> {
    match provider_error_message(payload) {
        Some(message) => Err(ParseError::Provider(message)),
        None => Ok(()),
    }
}

fn decode_base64(raw: &str, context: &'static str) -> Result<Vec<u8>, ParseError> {
    BASE64
        .decode(raw.trim().as_bytes())
        .map_err(|source| ParseError::Decode { context, source })
}

/// Decodes a `data:<mime>;base64,<payload>` URL. Anything that is not a data
/// URL (for example a remote `https://` link) or whose payload is empty
/// yields `Ok(None)`.
fn image_from_data_url(raw: &str) -> Result<Option<ImagePart>, ParseError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("data:") {
        return Ok(None);
    }
    let Some((meta, payload)) = trimmed.split_once(',') else {
        return Err(ParseError::DataUrl(truncate(trimmed, 64)));
    };
    let mime = meta
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("image/png");
    let bytes = decode_base64(payload, "image data URL base64 decode failed")?;
    Ok(non_empty_image(mime, bytes))
}

/// Reads `{b64_json | b64 | url}` from an image object.
fn image_from_object(obj: &Map<String, Value>) -> Result<Option<ImagePart>, ParseError> {
    for key in ["b64_json", "b64"] {
        if let Some(raw) = non_empty_str(obj.get(key)) {
            let bytes = decode_base64(raw, "image base64 decode failed")?;
            if let Some(image) = non_empty_image("image/png", bytes) {
                return Ok(Some(image));
            }
        }
    }
    match non_empty_str(obj.get("url")) {
        Some(url) => image_from_data_url(url),
        None => Ok(None),
    }
}

fn non_empty_image(mime: &str, bytes: Vec<u8>) -> Option<ImagePart> {
    (!bytes.is_empty()).then(|| ImagePart::new(mime, bytes))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
