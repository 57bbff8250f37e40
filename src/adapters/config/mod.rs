use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::openai::{ApiVersionPreference, DEFAULT_BASE_URL};
use crate::core::model::AssistantSpec;
use crate::core::run::PollPolicy;

/// Bump this when adding new fields with non-trivial defaults.
/// When a loaded config has a lower version, it is re-saved to disk
/// so that users see the new keys in their `config.toml`.
const CURRENT_CONFIG_VERSION: u32 = 1;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-05-13";
pub const DEFAULT_ASSISTANT_NAME: &str = "Document chatbot";
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are an expert assistant that answers questions based on the uploaded documents.";

fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_assistant_name() -> String {
    DEFAULT_ASSISTANT_NAME.to_string()
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_run_timeout_secs() -> u64 {
    120
}

fn default_index_timeout_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiKeyError {
    #[error("no API key configured; set {API_KEY_ENV} or openai_api_key in config.toml")]
    Missing,
    #[error("API key must start with 'sk-'")]
    Malformed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub config_version: u32,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    pub openai_api_key: Option<String>,
    pub api_version: ApiVersionPreference,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Enables exponential backoff between polls, capped at this value.
    pub poll_max_interval_ms: Option<u64>,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub registry_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_version: 0,
            api_base_url: default_api_base_url(),
            openai_api_key: None,
            api_version: ApiVersionPreference::Auto,
            model: default_model(),
            assistant_name: default_assistant_name(),
            instructions: default_instructions(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_interval_ms: None,
            run_timeout_secs: default_run_timeout_secs(),
            index_timeout_secs: default_index_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            registry_path: None,
        }
    }
}

impl Settings {
    fn global_config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docchat")
    }

    pub fn global_config_path() -> PathBuf {
        Self::global_config_dir().join("config.toml")
    }

    pub fn load_global() -> Self {
        Self::load_from(&Self::global_config_path())
    }

    /// Reads settings from `path`. A missing file yields defaults; an unreadable
    /// or malformed one is reported, left untouched, and also yields defaults.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    log::warn!("Failed to read {}: {e}. Using defaults.", path.display());
                    return Self {
                        config_version: CURRENT_CONFIG_VERSION,
                        ..Self::default()
                    };
                }
            };
            let mut settings: Self = match toml::from_str(&content) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("Failed to parse {}: {e}. Using defaults.", path.display());
                    return Self {
                        config_version: CURRENT_CONFIG_VERSION,
                        ..Self::default()
                    };
                }
            };

            // Re-save when config is from an older version so new fields
            // (with their defaults) appear in the file on disk.
            if settings.config_version < CURRENT_CONFIG_VERSION {
                settings.config_version = CURRENT_CONFIG_VERSION;
                if let Err(e) = settings.save_to(path) {
                    log::warn!("Failed to migrate config to v{CURRENT_CONFIG_VERSION}: {e}");
                }
            }

            settings
        } else {
            Self {
                config_version: CURRENT_CONFIG_VERSION,
                ..Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::global_config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, &content)?;
        Ok(())
    }

    /// A non-empty key from the environment replaces the one from the file.
    pub fn apply_env_key(&mut self, env_key: Option<String>) {
        if let Some(key) = env_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
        {
            self.openai_api_key = Some(key);
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env_key(std::env::var(API_KEY_ENV).ok());
        self
    }

    pub fn set_model(&mut self, model: &str) {
        let model = model.trim();
        if !model.is_empty() {
            self.model = model.to_string();
        }
    }

    pub fn api_key(&self) -> Result<&str, ApiKeyError> {
        let key = self
            .openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ApiKeyError::Missing)?;
        if key.starts_with("sk-") {
            Ok(key)
        } else {
            Err(ApiKeyError::Malformed)
        }
    }

    pub fn assistant_spec(&self) -> AssistantSpec {
        AssistantSpec {
            name: self.assistant_name.clone(),
            model: self.model.clone(),
            instructions: self.instructions.clone(),
        }
    }

    fn poll_policy(&self, timeout_secs: u64) -> PollPolicy {
        let policy = PollPolicy::fixed(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(timeout_secs),
        );
        match self.poll_max_interval_ms {
            Some(max) => policy.with_backoff(Duration::from_millis(max)),
            None => policy,
        }
    }

    pub fn run_poll_policy(&self) -> PollPolicy {
        self.poll_policy(self.run_timeout_secs)
    }

    pub fn index_poll_policy(&self) -> PollPolicy {
        self.poll_policy(self.index_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::global_config_dir().join("registry.json"))
    }
}
