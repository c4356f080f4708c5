use serde_json::Value;

use super::{
    decode_base64, ensure_no_provider_error, image_from_data_url, image_from_object,
    non_empty_image, non_empty_str, ParseError, ResponseParser,
};
use crate::conversation::ImagePart;

/// Parser for OpenAI-compatible payloads (chat completions, Responses API,
/// Images API) as returned by OpenRouter and similar gateways.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayResponseParser;

impl GatewayResponseParser {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseParser for GatewayResponseParser {
    fn parse_image(&self, payload: &Value) -> Result<Option<ImagePart>, ParseError> {
        ensure_no_provider_error(payload)?;

        if let Some(message) = first_choice_message(payload) {
            if let Some(attached) = message
                .get("images")
                .and_then(Value::as_array)
                .and_then(|images| images.first())
            {
                if let Some(image) = image_from_part(attached)? {
                    return Ok(Some(image));
                }
            }
            match message.get("content") {
                Some(Value::Array(parts)) => {
                    for part in parts {
                        if !has_type(part, &["image_url", "image", "output_image"]) {
                            continue;
                        }
                        if let Some(image) = image_from_part(part)? {
                            return Ok(Some(image));
                        }
                    }
                }
                Some(Value::String(raw)) => {
                    if let Some(image) = image_from_data_url(raw)? {
                        return Ok(Some(image));
                    }
                }
                _ => {}
            }
        }

        for item in array_at(payload, "output") {
            for part in array_at(item, "content") {
                if !has_type(part, &["output_image", "image", "image_url"]) {
                    continue;
                }
                if let Some(image) = image_from_part(part)? {
                    return Ok(Some(image));
                }
            }
        }

        for row in array_at(payload, "data") {
            let Some(obj) = row.as_object() else {
                continue;
            };
            if let Some(image) = image_from_object(obj)? {
                return Ok(Some(image));
            }
        }

        Ok(None)
    }

    fn parse_text(&self, payload: &Value) -> Result<Option<String>, ParseError> {
        ensure_no_provider_error(payload)?;

        if let Some(message) = first_choice_message(payload) {
            match message.get("content") {
                Some(Value::String(raw)) => {
                    if !raw.trim().is_empty() && !raw.trim_start().starts_with("data:") {
                        return Ok(Some(raw.clone()));
                    }
                }
                Some(Value::Array(parts)) => {
                    let joined = concat_text_parts(parts.iter());
                    if !joined.trim().is_empty() {
                        return Ok(Some(joined));
                    }
                }
                _ => {}
            }
        }

        let joined = concat_text_parts(
            array_at(payload, "output").flat_map(|item| array_at(item, "content")),
        );
        if !joined.trim().is_empty() {
            return Ok(Some(joined));
        }
        Ok(None)
    }
}

fn first_choice_message(payload: &Value) -> Option<&Value> {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .filter(|message| message.is_object())
}

fn array_at<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter())
        .into_iter()
        .flatten()
}

fn has_type(part: &Value, accepted: &[&str]) -> bool {
    part.get("type")
        .and_then(Value::as_str)
        .map(|kind| accepted.contains(&kind))
        .unwrap_or(false)
}

/// Handles the image-bearing part layouts: a nested `image` object, an
/// `image_url` wrapper (object or bare string), or `b64_json` on the part.
fn image_from_part(part: &Value) -> Result<Option<ImagePart>, ParseError> {
    if let Some(image) = part.get("image").and_then(Value::as_object) {
        if let Some(found) = image_from_object(image)? {
            return Ok(Some(found));
        }
    }
    match part.get("image_url") {
        Some(Value::Object(wrapper)) => {
            if let Some(url) = non_empty_str(wrapper.get("url")) {
                if let Some(found) = image_from_data_url(url)? {
                    return Ok(Some(found));
                }
            }
        }
        Some(Value::String(url)) => {
            if let Some(found) = image_from_data_url(url)? {
                return Ok(Some(found));
            }
        }
        _ => {}
    }
    if let Some(raw) = non_empty_str(part.get("b64_json")) {
        let bytes = decode_base64(raw, "image base64 decode failed")?;
        return Ok(non_empty_image("image/png", bytes));
    }
    Ok(None)
}

fn concat_text_parts<'a>(parts: impl Iterator<Item = &'a Value>) -> String {
    let mut out = String::new();
    for part in parts {
        if !has_type(part, &["text", "output_text"]) {
            continue;
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
    }
    out
}
