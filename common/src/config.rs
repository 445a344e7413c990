use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Camera stream URL. May be left empty and supplied on the command line.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Immutable per-session motion detection parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_downscale_width")]
    pub downscale_width: u32,
    #[serde(default = "default_downscale_height")]
    pub downscale_height: u32,
    /// Fraction of changed pixels at which motion is signaled (inclusive).
    #[serde(default = "default_ratio_threshold")]
    pub ratio_threshold: f32,
    /// A pixel is changed when any channel differs by strictly more than this.
    #[serde(default = "default_channel_threshold")]
    pub channel_threshold: u8,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Cap on bytes buffered while waiting for an end marker. Unbounded when unset.
    #[serde(default)]
    pub max_buffer_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            downscale_width: default_downscale_width(),
            downscale_height: default_downscale_height(),
            ratio_threshold: default_ratio_threshold(),
            channel_threshold: default_channel_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_buffer_bytes: None,
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CameraConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SessionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.downscale_width == 0 || self.downscale_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "downscale size must be non-zero, got {}x{}",
                self.downscale_width, self.downscale_height
            )));
        }
        if !(0.0..=1.0).contains(&self.ratio_threshold) {
            return Err(ConfigError::Invalid(format!(
                "ratio_threshold must be within [0, 1], got {}",
                self.ratio_threshold
            )));
        }
        if self.max_buffer_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "max_buffer_bytes must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.session.validate()?;
        if config.restart.initial_backoff_secs > config.restart.max_backoff_secs {
            return Err(ConfigError::Invalid(format!(
                "restart.initial_backoff_secs ({}) exceeds restart.max_backoff_secs ({})",
                config.restart.initial_backoff_secs, config.restart.max_backoff_secs
            )));
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_user_agent() -> String {
    format!("camwatch/{} (MJPEG)", env!("CARGO_PKG_VERSION"))
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_downscale_width() -> u32 {
    96
}
fn default_downscale_height() -> u32 {
    72
}
fn default_ratio_threshold() -> f32 {
    0.015
}
fn default_channel_threshold() -> u8 {
    18
}
fn default_cooldown_ms() -> u64 {
    2000
}
fn default_initial_backoff_secs() -> u64 {
    2
}
fn default_max_backoff_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
