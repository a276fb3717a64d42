//! Engine configuration.
//!
//! Defaults, overridden by `HUDDLE_*` environment variables, overridden by
//! the TOML file named in `HUDDLE_CONFIG`, then validated.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pairwise::{DEFAULT_PREFIX_LEN, MAX_PREFIX_LEN, MIN_PREFIX_LEN};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// User-visible text for messages that cannot be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholders {
    /// Permanently undecryptable.
    pub cannot_decrypt: String,
    /// Waiting for a key distribution.
    pub missing_key: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            cannot_decrypt: "🔒 Unable to decrypt this message".to_string(),
            missing_key: "⏳ Waiting for this message's key".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub placeholders: Placeholders,
    /// Characters of the peer's encoded public key used in the pairwise
    /// cache key.
    pub pairwise_prefix_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            placeholders: Placeholders::default(),
            pairwise_prefix_len: DEFAULT_PREFIX_LEN,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and TOML file
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;

        if let Ok(config_path) = std::env::var("HUDDLE_CONFIG") {
            config.load_from_toml(&config_path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `HUDDLE_*` overrides from `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(text) = lookup("HUDDLE_PLACEHOLDER_CANNOT_DECRYPT") {
            self.placeholders.cannot_decrypt = text;
        }
        if let Some(text) = lookup("HUDDLE_PLACEHOLDER_MISSING_KEY") {
            self.placeholders.missing_key = text;
        }
        if let Some(len) = lookup("HUDDLE_PAIRWISE_PREFIX_LEN") {
            self.pairwise_prefix_len = len.parse().map_err(|e| {
                ConfigError::Invalid(format!("Invalid HUDDLE_PAIRWISE_PREFIX_LEN: {}", e))
            })?;
        }
        Ok(())
    }

    pub fn load_from_toml(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.apply_toml(&content)
    }

    /// Apply overrides from TOML text. Unknown keys are ignored.
    pub fn apply_toml(&mut self, content: &str) -> Result<(), ConfigError> {
        let toml_config: toml::Value = toml::from_str(content)?;

        if let Some(placeholders) = toml_config.get("placeholders") {
            if let Some(text) = placeholders.get("cannot_decrypt").and_then(|v| v.as_str()) {
                self.placeholders.cannot_decrypt = text.to_string();
            }
            if let Some(text) = placeholders.get("missing_key").and_then(|v| v.as_str()) {
                self.placeholders.missing_key = text.to_string();
            }
        }

        if let Some(len) = toml_config
            .get("pairwise_prefix_len")
            .and_then(|v| v.as_integer())
        {
            self.pairwise_prefix_len = usize::try_from(len).map_err(|_| {
                ConfigError::Invalid(format!("pairwise_prefix_len out of range: {}", len))
            })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PREFIX_LEN..=MAX_PREFIX_LEN).contains(&self.pairwise_prefix_len) {
            return Err(ConfigError::Invalid(format!(
                "pairwise_prefix_len must be in {}..={}",
                MIN_PREFIX_LEN, MAX_PREFIX_LEN
            )));
        }

        if self.placeholders.cannot_decrypt.is_empty() || self.placeholders.missing_key.is_empty() {
            return Err(ConfigError::Invalid("placeholders must not be empty".to_string()));
        }

        // The two states must stay distinguishable to the reader.
        if self.placeholders.cannot_decrypt == self.placeholders.missing_key {
            return Err(ConfigError::Invalid(
                "cannot_decrypt and missing_key placeholders must differ".to_string(),
            ));
        }

        Ok(())
    }
}
