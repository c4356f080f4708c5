pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod postprocess;
pub mod providers;
pub mod thread;

#[cfg(test)]
mod testing;

pub use config::{ConfigOverrides, ProviderKind, RuntimeConfig};
pub use error::{EngineError, Result};
pub use orchestrator::{CritiqueLoop, CritiqueRequest, RunObserver, RunOutcome, RunRequest};
pub use providers::{provider_for, ConversationProvider};
