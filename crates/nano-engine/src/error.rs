use std::io;
use std::path::Path;

use nano_contracts::parsing::ParseError;
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing credentials: {0}")]
    Credential(String),

    #[error("{provider} request failed{}: {message}", status_suffix(.status))]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} transport failure: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned an unreadable payload: {message}")]
    InvalidJson { provider: String, message: String },

    #[error("provider returned neither an image nor text")]
    NoResult,

    #[error("no image returned by model{}", detail_suffix(.text))]
    NoImage { text: String },

    #[error("invalid conversation state: {0}")]
    InvalidState(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Image {
        context: String,
        #[source]
        source: image::ImageError,
    },

    #[error("post-process transparency failed: {0}")]
    PostProcess(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

fn detail_suffix(text: &str) -> String {
    if text.is_empty() {
        String::new()
    } else {
        format!(": {text}")
    }
}

impl EngineError {
    /// Request URLs can carry credentials (Gemini's `?key=`), so they are
    /// stripped before the error travels further.
    pub fn transport(provider: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            provider: provider.into(),
            source: source.without_url(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn read(path: &Path, source: io::Error) -> Self {
        Self::io(format!("failed reading {}", path.display()), source)
    }

    pub(crate) fn write(path: &Path, source: io::Error) -> Self {
        Self::io(format!("failed writing {}", path.display()), source)
    }

    /// Maps a response parsing failure onto the provider that produced it.
    pub(crate) fn from_parse(provider: &str, err: ParseError) -> Self {
        match err {
            ParseError::Provider(message) => Self::Provider {
                provider: provider.to_string(),
                status: None,
                message,
            },
            other => Self::InvalidJson {
                provider: provider.to_string(),
                message: other.to_string(),
            },
        }
    }
}
