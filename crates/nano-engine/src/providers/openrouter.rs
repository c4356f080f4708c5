use nano_contracts::conversation::{Message, Part};
use nano_contracts::parsing::{GatewayResponseParser, GenerationResult, ResponseParser};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::{json, Value};

use super::{
    http_client, response_json_or_error, transport_error, ConversationProvider, ProviderRequest,
};
use crate::config::RuntimeConfig;
use crate::error::{EngineError, Result};

const LABEL: &str = "OpenRouter";

/// OpenAI-compatible `chat/completions` transport.
pub struct OpenRouterProvider {
    base_url: String,
    api_key: String,
    site: String,
    title: String,
    model: String,
    http: HttpClient,
    parser: GatewayResponseParser,
}

impl OpenRouterProvider {
    pub fn new(config: &RuntimeConfig, model: String) -> Result<Self> {
        let api_key = config
            .openrouter
            .api_key
            .clone()
            .ok_or_else(|| EngineError::Credential("OPENROUTER_API_KEY not set".to_string()))?;
        Ok(Self {
            base_url: config.openrouter.base_url.clone(),
            api_key,
            site: config.openrouter.site.clone(),
            title: config.openrouter.title.clone(),
            model,
            http: http_client(LABEL, config)?,
            parser: GatewayResponseParser::new(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl ConversationProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<GenerationResult> {
        let endpoint = self.endpoint();
        let payload = build_payload(&self.model, request.messages);
        tracing::debug!(
            endpoint = %endpoint,
            model = %self.model,
            turns = request.messages.len(),
            modality = ?request.modality,
            "sending OpenRouter request"
        );
        let response = self
            .http
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, "application/json")
            .header("HTTP-Referer", &self.site)
            .header("X-Title", &self.title)
            .json(&payload)
            .send()
            .map_err(transport_error(LABEL))?;
        let body = response_json_or_error(LABEL, response)?;
        self.parser
            .parse(&body)
            .map_err(|err| EngineError::from_parse(LABEL, err))
    }

    fn retries_without_images(&self) -> bool {
        true
    }
}

fn build_payload(model: &str, messages: &[Message]) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|message| {
            let content: Vec<Value> = message
                .parts()
                .iter()
                .map(|part| match part {
                    Part::Text(text) => json!({ "type": "text", "text": text }),
                    Part::Image(image) => json!({
                        "type": "image_url",
                        "image_url": { "url": image.to_data_url() },
                    }),
                })
                .collect();
            json!({ "role": message.role().as_str(), "content": content })
        })
        .collect();
    json!({ "model": model, "messages": messages })
}
