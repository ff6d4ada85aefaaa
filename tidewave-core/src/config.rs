use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

/// Render orchestration tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Hard deadline from render start to forced abort (milliseconds)
    pub stream_abort_timeout_ms: u64,
    /// Fixed delay between completion checks in the buffered channel path (milliseconds)
    pub buffered_poll_interval_ms: u64,
    /// Body channel capacity; writers suspend on a full channel until the
    /// consumer drains it
    pub body_channel_capacity: usize,
    /// Dev mode: inline diagnostic markup on post-commit errors, preview
    /// cache-control header name
    pub dev_mode: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            stream_abort_timeout_ms: 3_000,
            buffered_poll_interval_ms: 100,
            body_channel_capacity: 64,
            dev_mode: false,
        }
    }
}

impl RenderConfig {
    #[must_use]
    pub fn stream_abort_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_abort_timeout_ms)
    }

    #[must_use]
    pub fn buffered_poll_interval(&self) -> Duration {
        Duration::from_millis(self.buffered_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" for production, "pretty" for development
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (TIDEWAVE_RENDER_DEV_MODE, etc.)
        builder = builder.add_source(
            Environment::with_prefix("TIDEWAVE")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
