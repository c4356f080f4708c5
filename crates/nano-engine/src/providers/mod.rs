mod dryrun;
mod gemini;
mod openrouter;

use nano_contracts::conversation::Message;
use nano_contracts::parsing::GenerationResult;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;
pub use openrouter::OpenRouterProvider;

use crate::config::{ProviderKind, RuntimeConfig};
use crate::error::{EngineError, Result};

pub(crate) const USER_AGENT: &str = concat!("nano-agent/", env!("CARGO_PKG_VERSION"));

/// What the caller wants back from a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    /// Image output requested; text may come along.
    Image,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub messages: &'a [Message],
    pub modality: Modality,
}

impl<'a> ProviderRequest<'a> {
    pub fn image(messages: &'a [Message]) -> Self {
        Self {
            messages,
            modality: Modality::Image,
        }
    }

    pub fn text(messages: &'a [Message]) -> Self {
        Self {
            messages,
            modality: Modality::Text,
        }
    }
}

/// A multimodal chat backend. Implementations translate the role-tagged
/// history to their wire format and parse the reply.
pub trait ConversationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model id already normalized for this backend.
    fn model(&self) -> &str;

    fn complete(&self, request: &ProviderRequest<'_>) -> Result<GenerationResult>;

    /// Whether single-shot generation should fall back to a text-only
    /// request when calls carrying input images keep failing.
    fn retries_without_images(&self) -> bool {
        false
    }
}

pub fn provider_for(config: &RuntimeConfig) -> Result<Box<dyn ConversationProvider>> {
    config.warn_legacy_selection();
    let model = config.resolved_model();
    let provider: Box<dyn ConversationProvider> = match config.provider {
        ProviderKind::Gemini => Box::new(GeminiProvider::new(config, model)?),
        ProviderKind::OpenRouter => Box::new(OpenRouterProvider::new(config, model)?),
        ProviderKind::Dryrun => Box::new(DryrunProvider::new(model)),
    };
    tracing::debug!(kind = %config.provider, model = provider.model(), "provider ready");
    Ok(provider)
}

pub(crate) fn http_client(provider: &str, config: &RuntimeConfig) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(config.request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| EngineError::transport(provider, source))
}

/// Reads the body; non-2xx statuses become provider errors carrying the
/// provider's own message when the body has one.
pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|source| EngineError::transport(provider, source))?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|payload| nano_contracts::parsing::provider_error_message(&payload))
            .unwrap_or_else(|| truncate_text(body.trim(), 512));
        return Err(EngineError::Provider {
            provider: provider.to_string(),
            status: Some(code),
            message,
        });
    }
    serde_json::from_str(&body).map_err(|err| EngineError::InvalidJson {
        provider: provider.to_string(),
        message: format!("{err}; body: {}", truncate_text(body.trim(), 512)),
    })
}

pub(crate) fn transport_error(provider: &str) -> impl FnOnce(reqwest::Error) -> EngineError + '_ {
    move |source| EngineError::transport(provider, source)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
