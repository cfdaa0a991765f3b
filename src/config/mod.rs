//! Configuration values consumed by the agent.
//!
//! The agent and registry only ever receive an [`AppConfig`] value. Loading
//! from TOML files and environment variables lives here for front ends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::AgentError;

/// Supported LLM backends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
    /// Any OpenAI-compatible chat-completions endpoint.
    Custom,
}

impl ProviderKind {
    /// Model used when the configuration leaves `model` empty.
    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("gpt-4o-mini"),
            ProviderKind::Anthropic => Some("claude-3-5-sonnet-20241022"),
            ProviderKind::Gemini => Some("gemini-pro"),
            ProviderKind::Custom => None,
        }
    }
}

/// LLM connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            api_key: String::new(),
            base_url: None,
            model: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

impl LlmSettings {
    /// Whether a credential is present.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Model id to send, falling back to the provider default.
    pub fn resolved_model(&self) -> Option<String> {
        let model = self.model.trim();
        if !model.is_empty() {
            return Some(model.to_string());
        }
        self.provider.default_model().map(str::to_string)
    }

    /// Base URL override, ignoring blank values.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Check that the settings are complete enough to build a provider.
    pub fn validate(&self) -> Result<(), AgentError> {
        if !self.is_configured() {
            return Err(AgentError::Configuration(format!(
                "LLM not configured: no API key for provider '{}'. Set OPENAI_API_KEY, \
                 ANTHROPIC_API_KEY, GEMINI_API_KEY or CUSTOM_API_KEY, or add `api_key` under \
                 [llm] in the config file.",
                self.provider
            )));
        }
        if self.provider == ProviderKind::Custom && self.base_url().is_none() {
            return Err(AgentError::Configuration(
                "Provider 'custom' requires `base_url` (CUSTOM_BASE_URL)".into(),
            ));
        }
        if self.resolved_model().is_none() {
            return Err(AgentError::Configuration(format!(
                "No model configured for provider '{}'",
                self.provider
            )));
        }
        Ok(())
    }
}

/// Launch parameters for one stdio tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            enabled: true,
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Everything a front end hands to the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, AgentError> {
        toml::from_str(raw)
            .map_err(|e| AgentError::Configuration(format!("Invalid config file: {e}")))
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String, AgentError> {
        toml::to_string_pretty(self)
            .map_err(|e| AgentError::Configuration(format!("Cannot serialize config: {e}")))
    }

    /// Per-user config location (`<config dir>/toolbridge/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "toolbridge")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Build a config from environment variables only (loads `.env` if present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Overlay LLM settings from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay LLM settings from an arbitrary variable lookup.
    ///
    /// Vendor keys are checked in order (OpenAI, Anthropic, Gemini) and the
    /// first one present selects the provider. `CUSTOM_API_KEY` always wins.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let vendors: [(ProviderKind, &[&str], &str, &str); 3] = [
            (ProviderKind::OpenAi, &["OPENAI_API_KEY"], "OPENAI_MODEL", "OPENAI_BASE_URL"),
            (ProviderKind::Anthropic, &["ANTHROPIC_API_KEY"], "ANTHROPIC_MODEL", "ANTHROPIC_BASE_URL"),
            (ProviderKind::Gemini, &["GEMINI_API_KEY", "GOOGLE_API_KEY"], "GEMINI_MODEL", "GEMINI_BASE_URL"),
        ];

        for (provider, key_vars, model_var, url_var) in vendors {
            let key = key_vars.iter().find_map(|var| get(var));
            if let Some(key) = key {
                self.select(provider, key, get(model_var), get(url_var));
                break;
            }
        }

        if let Some(key) = get("CUSTOM_API_KEY") {
            self.select(
                ProviderKind::Custom,
                key,
                get("CUSTOM_MODEL"),
                get("CUSTOM_BASE_URL"),
            );
        }
    }

    fn select(
        &mut self,
        provider: ProviderKind,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
    ) {
        if self.llm.provider != provider {
            self.llm.model.clear();
            self.llm.base_url = None;
        }
        self.llm.provider = provider;
        self.llm.api_key = api_key;
        if let Some(model) = model {
            self.llm.model = model;
        }
        if base_url.is_some() {
            self.llm.base_url = base_url;
        }
    }

    /// Server configs with `enabled = true`, in declaration order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|server| server.enabled)
    }
}
