use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use nano_contracts::models::{normalize_model, Routing};
use serde::Deserialize;

use crate::error::{EngineError, Result};

const DEFAULT_CONFIG: &str = include_str!("../resources/defaults.toml");
const USER_CONFIG_FILE: &str = ".nano-agent.toml";
const ENV_PREFIX: &str = "NANO";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenRouter,
    Dryrun,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
            Self::Dryrun => "dryrun",
        }
    }

    pub fn routing(self) -> Routing {
        match self {
            Self::OpenRouter => Routing::Gateway,
            Self::Gemini | Self::Dryrun => Routing::Native,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" | "native" => Ok(Self::Gemini),
            "openrouter" | "gateway" => Ok(Self::OpenRouter),
            "dryrun" | "dry-run" => Ok(Self::Dryrun),
            other => Err(EngineError::Config(format!(
                "unknown provider {other:?} (expected gemini, openrouter or dryrun)"
            ))),
        }
    }
}

/// Values supplied on the command line; they win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Settings {
    model: String,
    provider: Option<String>,
    request_timeout_secs: u64,
    bg_fuzz: String,
    gemini_api_key: Option<String>,
    gemini_api_base: String,
    openrouter_api_key: Option<String>,
    openrouter_model: Option<String>,
    openrouter_base_url: String,
    openrouter_site: String,
    openrouter_title: String,
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub site: String,
    pub title: String,
    pub model_override: Option<String>,
}

#[derive(Debug)]
pub struct RuntimeConfig {
    pub provider: ProviderKind,
    /// Model exactly as requested; see [`RuntimeConfig::resolved_model`].
    pub model: String,
    pub request_timeout: Duration,
    pub background_fuzz: String,
    pub gemini: GeminiSettings,
    pub openrouter: OpenRouterSettings,
    legacy_selection: bool,
    legacy_warned: AtomicBool,
}

impl RuntimeConfig {
    /// Loads `.env`, then layers built-in defaults, the TOML file, `NANO_*`
    /// variables and `overrides`.
    ///
    /// An explicit `config_path` must exist; `~/.nano-agent.toml` is optional.
    pub fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let env: HashMap<String, String> = std::env::vars().collect();
        let (file, required) = match config_path {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (
                dirs::home_dir().map(|home| home.join(USER_CONFIG_FILE)),
                false,
            ),
        };
        Self::from_sources(file.as_deref(), required, &env, overrides)
    }

    pub fn from_sources(
        file: Option<&Path>,
        required: bool,
        env: &HashMap<String, String>,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
        if let Some(path) = file {
            builder = builder.add_source(
                File::from(PathBuf::from(path))
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }
        let prefixed: config::Map<String, String> = env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(prefixed)),
        );

        let settings: Settings = builder
            .build()
            .map_err(|err| EngineError::Config(format!("failed to build configuration: {err}")))?
            .try_deserialize()
            .map_err(|err| EngineError::Config(format!("failed to parse configuration: {err}")))?;

        let canonical = non_blank(overrides.provider.as_deref())
            .or_else(|| non_blank(settings.provider.as_deref()));
        let (provider, legacy_selection) = match canonical {
            Some(raw) => (raw.parse::<ProviderKind>()?, false),
            None if legacy_openrouter_requested(env) => (ProviderKind::OpenRouter, true),
            None => (ProviderKind::Gemini, false),
        };

        let model = non_blank(overrides.model.as_deref())
            .unwrap_or(settings.model.as_str())
            .trim()
            .to_string();

        if settings.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            provider,
            model,
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            background_fuzz: settings.bg_fuzz.trim().to_string(),
            gemini: GeminiSettings {
                api_key: env_value(env, "GEMINI_API_KEY")
                    .or_else(|| env_value(env, "GOOGLE_API_KEY"))
                    .or_else(|| owned_non_blank(settings.gemini_api_key)),
                api_base: env_value(env, "GEMINI_API_BASE")
                    .unwrap_or(settings.gemini_api_base)
                    .trim_end_matches('/')
                    .to_string(),
            },
            openrouter: OpenRouterSettings {
                api_key: env_value(env, "OPENROUTER_API_KEY")
                    .or_else(|| owned_non_blank(settings.openrouter_api_key)),
                base_url: env_value(env, "OPENROUTER_BASE_URL")
                    .unwrap_or(settings.openrouter_base_url)
                    .trim_end_matches('/')
                    .to_string(),
                site: env_value(env, "OPENROUTER_SITE").unwrap_or(settings.openrouter_site),
                title: env_value(env, "OPENROUTER_TITLE").unwrap_or(settings.openrouter_title),
                model_override: env_value(env, "OPENROUTER_MODEL")
                    .or_else(|| owned_non_blank(settings.openrouter_model)),
            },
            legacy_selection,
            legacy_warned: AtomicBool::new(false),
        })
    }

    /// Model id in the form the selected provider expects.
    pub fn resolved_model(&self) -> String {
        normalize_model(
            &self.model,
            self.provider.routing(),
            self.openrouter.model_override.as_deref(),
        )
    }

    /// Logs the `USE_OPENROUTER` deprecation once per config instance.
    /// Returns whether this call emitted the warning.
    pub fn warn_legacy_selection(&self) -> bool {
        if !self.legacy_selection || self.legacy_warned.swap(true, Ordering::Relaxed) {
            return false;
        }
        tracing::warn!(
            "USE_OPENROUTER is deprecated; set provider = \"openrouter\" in the config file, \
             NANO_PROVIDER=openrouter or pass --provider openrouter"
        );
        true
    }

    pub fn require_credentials(&self) -> Result<()> {
        match self.provider {
            ProviderKind::Gemini if self.gemini.api_key.is_none() => {
                Err(EngineError::Credential(
                    "GEMINI_API_KEY is not set; get one at https://aistudio.google.com/apikey and \
                     export GEMINI_API_KEY before running"
                        .to_string(),
                ))
            }
            ProviderKind::OpenRouter if self.openrouter.api_key.is_none() => {
                Err(EngineError::Credential(
                    "OPENROUTER_API_KEY is not set; export OPENROUTER_API_KEY before running"
                        .to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn legacy_openrouter_requested(env: &HashMap<String, String>) -> bool {
    env_value(env, "USE_OPENROUTER")
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

fn env_value(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn owned_non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn load(pairs: &[(&str, &str)], overrides: &ConfigOverrides) -> Result<RuntimeConfig> {
        RuntimeConfig::from_sources(None, false, &env(pairs), overrides)
    }

    #[test]
    fn defaults_select_gemini_and_free_model() -> anyhow::Result<()> {
        let config = load(&[], &ConfigOverrides::default())?;
        assert_eq!(config.provider, ProviderKind::Gemini);
        assert_eq!(config.model, "gemini-2.5-flash-image-preview:free");
        assert_eq!(config.resolved_model(), "models/gemini-2.5-flash-image-preview");
        assert_eq!(config.background_fuzz, "6%");
        assert_eq!(config.request_timeout, Duration::from_secs(180));
        assert_eq!(config.openrouter.site, "http://localhost");
        assert_eq!(config.openrouter.title, "nano-agent");
        Ok(())
    }

    #[test]
    fn layers_apply_file_then_env_then_flags() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nano.toml");
        fs::write(
            &path,
            "model = \"from-file\"\nprovider = \"openrouter\"\nrequest_timeout_secs = 30\n",
        )?;

        let from_file =
            RuntimeConfig::from_sources(Some(&path), true, &env(&[]), &ConfigOverrides::default())?;
        assert_eq!(from_file.model, "from-file");
        assert_eq!(from_file.provider, ProviderKind::OpenRouter);
        assert_eq!(from_file.request_timeout, Duration::from_secs(30));

        let vars = env(&[("NANO_MODEL", "from-env"), ("NANO_BG_FUZZ", "10%")]);
        let from_env =
            RuntimeConfig::from_sources(Some(&path), true, &vars, &ConfigOverrides::default())?;
        assert_eq!(from_env.model, "from-env");
        assert_eq!(from_env.background_fuzz, "10%");

        let overrides = ConfigOverrides {
            model: Some("from-flag".to_string()),
            provider: Some("dryrun".to_string()),
        };
        let from_flags = RuntimeConfig::from_sources(Some(&path), true, &vars, &overrides)?;
        assert_eq!(from_flags.model, "from-flag");
        assert_eq!(from_flags.provider, ProviderKind::Dryrun);
        Ok(())
    }

    #[test]
    fn explicit_config_file_must_exist() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("absent.toml");
        let err = RuntimeConfig::from_sources(
            Some(&missing),
            true,
            &env(&[]),
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let optional = RuntimeConfig::from_sources(
            Some(&missing),
            false,
            &env(&[]),
            &ConfigOverrides::default(),
        )?;
        assert_eq!(optional.provider, ProviderKind::Gemini);
        Ok(())
    }

    #[test]
    fn environment_credentials_win_over_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nano.toml");
        fs::write(
            &path,
            "gemini_api_key = \"file-gemini\"\nopenrouter_api_key = \"file-router\"\n",
        )?;

        let config = RuntimeConfig::from_sources(
            Some(&path),
            true,
            &env(&[("GOOGLE_API_KEY", "env-google")]),
            &ConfigOverrides::default(),
        )?;
        assert_eq!(config.gemini.api_key.as_deref(), Some("env-google"));
        assert_eq!(config.openrouter.api_key.as_deref(), Some("file-router"));

        let config = RuntimeConfig::from_sources(
            Some(&path),
            true,
            &env(&[("GEMINI_API_KEY", "env-gemini"), ("GOOGLE_API_KEY", "env-google")]),
            &ConfigOverrides::default(),
        )?;
        assert_eq!(config.gemini.api_key.as_deref(), Some("env-gemini"));
        Ok(())
    }

    #[test]
    fn legacy_flag_selects_openrouter_and_warns_once() -> anyhow::Result<()> {
        let config = load(&[("USE_OPENROUTER", "true")], &ConfigOverrides::default())?;
        assert_eq!(config.provider, ProviderKind::OpenRouter);
        assert!(config.legacy_selection);
        assert!(config.warn_legacy_selection());
        assert!(!config.warn_legacy_selection());
        assert!(!config.warn_legacy_selection());
        Ok(())
    }

    #[test]
    fn canonical_selection_beats_legacy_flag() -> anyhow::Result<()> {
        let config = load(
            &[("USE_OPENROUTER", "1"), ("NANO_PROVIDER", "gemini")],
            &ConfigOverrides::default(),
        )?;
        assert_eq!(config.provider, ProviderKind::Gemini);
        assert!(!config.legacy_selection);
        assert!(!config.warn_legacy_selection());

        let config = load(&[("USE_OPENROUTER", "yes")], &ConfigOverrides::default())?;
        assert_eq!(config.provider, ProviderKind::Gemini);
        Ok(())
    }

    #[test]
    fn gateway_model_override_applies_to_openrouter() -> anyhow::Result<()> {
        let overrides = ConfigOverrides {
            model: None,
            provider: Some("openrouter".to_string()),
        };
        let config = load(&[], &overrides)?;
        assert_eq!(
            config.resolved_model(),
            "google/gemini-2.5-flash-image-preview:free"
        );

        let config = load(&[("OPENROUTER_MODEL", "google/gemini-3-pro-image-preview")], &overrides)?;
        assert_eq!(config.resolved_model(), "google/gemini-3-pro-image-preview");
        Ok(())
    }

    #[test]
    fn credentials_are_checked_per_provider() -> anyhow::Result<()> {
        let config = load(&[], &ConfigOverrides::default())?;
        assert!(matches!(
            config.require_credentials(),
            Err(EngineError::Credential(_))
        ));

        let dryrun = ConfigOverrides {
            model: None,
            provider: Some("dryrun".to_string()),
        };
        load(&[], &dryrun)?.require_credentials()?;

        let config = load(&[("GEMINI_API_KEY", "  ")], &ConfigOverrides::default())?;
        assert!(config.gemini.api_key.is_none());
        Ok(())
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let overrides = ConfigOverrides {
            model: None,
            provider: Some("stability".to_string()),
        };
        assert!(matches!(load(&[], &overrides), Err(EngineError::Config(_))));
        assert_eq!("Gateway".parse::<ProviderKind>().ok(), Some(ProviderKind::OpenRouter));
    }

    #[test]
    fn provider_kind_display_parses_back() {
        for kind in [ProviderKind::Gemini, ProviderKind::OpenRouter, ProviderKind::Dryrun] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().ok(), Some(kind));
        }
        assert_eq!(ProviderKind::OpenRouter.to_string(), "openrouter");
    }
}
