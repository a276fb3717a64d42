//! Demo configuration

use std::path::PathBuf;

use huddle_core::config::{ConfigError, EngineConfig};

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub engine: EngineConfig,
    pub channel: String,
    /// The last participant joins late; the second leaves at the end.
    pub participants: Vec<String>,
    /// Per-participant SQLite files go here. In memory when unset.
    pub state_dir: Option<PathBuf>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            channel: "general".to_string(),
            participants: vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            state_dir: None,
        }
    }
}

impl DemoConfig {
    /// Load configuration from environment variables and TOML file
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self {
            engine: EngineConfig::load()?,
            ..Self::default()
        };

        if let Ok(channel) = std::env::var("HUDDLE_DEMO_CHANNEL") {
            config.channel = channel;
        }

        if let Ok(list) = std::env::var("HUDDLE_DEMO_PARTICIPANTS") {
            config.participants = split_list(&list);
        }

        if let Ok(dir) = std::env::var("HUDDLE_DEMO_STATE_DIR") {
            config.state_dir = Some(PathBuf::from(dir));
        }

        if let Ok(config_path) = std::env::var("HUDDLE_CONFIG") {
            config.load_from_toml(&config_path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads the `[demo]` table; engine keys are handled by [`EngineConfig`].
    fn load_from_toml(&mut self, path: &str) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.apply_toml(&content)
    }

    fn apply_toml(&mut self, content: &str) -> Result<(), ConfigError> {
        let toml_config: toml::Value = toml::from_str(content)?;
        let Some(demo) = toml_config.get("demo") else {
            return Ok(());
        };

        if let Some(channel) = demo.get("channel").and_then(|v| v.as_str()) {
            self.channel = channel.to_string();
        }

        if let Some(list) = demo.get("participants").and_then(|v| v.as_array()) {
            self.participants = list
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
        }

        if let Some(dir) = demo.get("state_dir").and_then(|v| v.as_str()) {
            self.state_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;

        if self.channel.is_empty() {
            return Err(ConfigError::Invalid("channel must not be empty".to_string()));
        }

        if self.participants.len() < 3 {
            return Err(ConfigError::Invalid(
                "at least three participants are needed".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        if !self.participants.iter().all(|p| seen.insert(p)) {
            return Err(ConfigError::Invalid("participants must be unique".to_string()));
        }

        Ok(())
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
