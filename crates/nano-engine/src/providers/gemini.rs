use nano_contracts::conversation::{Message, Part, Role};
use nano_contracts::parsing::{GenerationResult, NativeResponseParser, ResponseParser};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{
    http_client, response_json_or_error, transport_error, ConversationProvider, Modality,
    ProviderRequest,
};
use crate::config::RuntimeConfig;
use crate::error::{EngineError, Result};

const LABEL: &str = "Gemini";

/// Native `generateContent` transport.
pub struct GeminiProvider {
    api_base: String,
    api_key: String,
    model: String,
    http: HttpClient,
    parser: NativeResponseParser,
}

impl GeminiProvider {
    pub fn new(config: &RuntimeConfig, model: String) -> Result<Self> {
        let api_key = config.gemini.api_key.clone().ok_or_else(|| {
            EngineError::Credential("GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string())
        })?;
        Ok(Self {
            api_base: config.gemini.api_base.clone(),
            api_key,
            model,
            http: http_client(LABEL, config)?,
            parser: NativeResponseParser::new(),
        })
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl ConversationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<GenerationResult> {
        let endpoint = self.endpoint();
        let payload = build_payload(request.messages, request.modality);
        tracing::debug!(
            endpoint = %endpoint,
            turns = request.messages.len(),
            modality = ?request.modality,
            "sending Gemini request"
        );
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .map_err(transport_error(LABEL))?;
        let body = response_json_or_error(LABEL, response)?;
        self.parser
            .parse(&body)
            .map_err(|err| EngineError::from_parse(LABEL, err))
    }
}

fn build_payload(messages: &[Message], modality: Modality) -> Value {
    let contents: Vec<Value> = messages.iter().map(content_for_message).collect();
    let mut payload = Map::new();
    payload.insert("contents".to_string(), Value::Array(contents));
    if modality == Modality::Image {
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseModalities": ["TEXT", "IMAGE"] }),
        );
    }
    Value::Object(payload)
}

fn content_for_message(message: &Message) -> Value {
    let role = match message.role() {
        Role::User => "user",
        Role::Assistant => "model",
    };
    let parts: Vec<Value> = message
        .parts()
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.to_base64(),
                }
            }),
        })
        .collect();
    json!({ "role": role, "parts": parts })
}
