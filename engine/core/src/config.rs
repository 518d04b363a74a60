//! Engine Configuration
//!
//! Centralized configuration loading with a TOML file at
//! `~/.config/parlor/engine.toml`, environment-variable overrides, and
//! built-in defaults.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. Environment variables (`PARLOR_*`)
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [api]
//! base_url = "https://chat.example.com"
//! request_timeout_ms = 15000
//!
//! [stream]
//! first_content_grace_secs = 10
//! liveness_timeout_secs = 300
//! tick_interval_ms = 250
//!
//! [images]
//! load_timeout_secs = 10
//! preload_timeout_ms = 1500
//!
//! [history]
//! page_size = 20
//! stagger_step_ms = 40
//!
//! [limits]
//! max_title_len = 60
//! max_retries = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Backend API settings.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Base URL of the chat backend, without a trailing slash.
    pub base_url: String,
    /// Timeout applied to non-streaming HTTP requests.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Stream coordinator timing.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Grace period after stream start before the "thinking" placeholder
    /// is shown (default: 10 seconds).
    pub first_content_grace: Duration,
    /// Maximum silence (no heartbeat/token/snapshot) before the stream is
    /// declared dead (default: 5 minutes).
    pub liveness_timeout: Duration,
    /// How often the run loop polls timers.
    pub tick_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            first_content_grace: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(300),
            tick_interval: Duration::from_millis(250),
        }
    }
}

impl StreamConfig {
    /// Short timings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            first_content_grace: Duration::from_millis(50),
            liveness_timeout: Duration::from_millis(200),
            tick_interval: Duration::from_millis(5),
        }
    }
}

/// Image loading behavior.
#[derive(Clone, Debug)]
pub struct ImageConfig {
    /// Hard ceiling on a single image load attempt (default: 10 seconds).
    pub load_timeout: Duration,
    /// Bound on the opportunistic first-image preload at finish.
    pub preload_timeout: Duration,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(10),
            preload_timeout: Duration::from_millis(1500),
        }
    }
}

impl ImageConfig {
    /// Short timings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            load_timeout: Duration::from_millis(100),
            preload_timeout: Duration::from_millis(20),
        }
    }
}

/// History pagination behavior.
#[derive(Clone, Debug)]
pub struct HistoryConfig {
    /// Messages requested per backward page.
    pub page_size: usize,
    /// Per-item delay step for the fade-in of a spliced batch.
    pub stagger_step: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            stagger_step: Duration::from_millis(40),
        }
    }
}

/// Input limits.
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    /// Maximum conversation title length in characters.
    pub max_title_len: usize,
    /// Maximum automatic retries tracked per session.
    pub max_retries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_title_len: 60,
            max_retries: 3,
        }
    }
}

/// Fully resolved engine configuration.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Backend API settings.
    pub api: ApiConfig,
    /// Stream coordinator timing.
    pub stream: StreamConfig,
    /// Image loading behavior.
    pub images: ImageConfig,
    /// History pagination behavior.
    pub history: HistoryConfig,
    /// Input limits.
    pub limits: LimitsConfig,
}

impl EngineConfig {
    /// Configuration with short timings suitable for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:0".to_string(),
                request_timeout: Duration::from_millis(200),
            },
            stream: StreamConfig::for_testing(),
            images: ImageConfig::for_testing(),
            history: HistoryConfig {
                page_size: 10,
                stagger_step: Duration::ZERO,
            },
            limits: LimitsConfig::default(),
        }
    }

    /// Check invariants the rest of the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "history.page_size must be greater than zero".to_string(),
            ));
        }
        if self.stream.tick_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "stream.tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.stream.liveness_timeout <= self.stream.first_content_grace {
            return Err(ConfigError::ValidationError(
                "stream.liveness_timeout_secs must exceed first_content_grace_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment overrides (`PARLOR_*`) on top of this config.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("PARLOR_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(secs) = env_u64("PARLOR_FIRST_CONTENT_GRACE_SECS") {
            self.stream.first_content_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("PARLOR_LIVENESS_TIMEOUT_SECS") {
            self.stream.liveness_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("PARLOR_IMAGE_TIMEOUT_SECS") {
            self.images.load_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("PARLOR_HISTORY_PAGE_SIZE") {
            self.history.page_size = n as usize;
        }
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[api]` section of the TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Base URL of the chat backend.
    pub base_url: Option<String>,
    /// Non-streaming request timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,
}

/// `[stream]` section of the TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// First-content grace in seconds.
    pub first_content_grace_secs: Option<u64>,
    /// Liveness timeout in seconds.
    pub liveness_timeout_secs: Option<u64>,
    /// Timer poll interval in milliseconds.
    pub tick_interval_ms: Option<u64>,
}

/// `[images]` section of the TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesToml {
    /// Per-image load timeout in seconds.
    pub load_timeout_secs: Option<u64>,
    /// First-image preload bound in milliseconds.
    pub preload_timeout_ms: Option<u64>,
}

/// `[history]` section of the TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryToml {
    /// Messages per backward page.
    pub page_size: Option<usize>,
    /// Fade-in stagger step in milliseconds.
    pub stagger_step_ms: Option<u64>,
}

/// `[limits]` section of the TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Maximum conversation title length.
    pub max_title_len: Option<usize>,
    /// Maximum tracked retries.
    pub max_retries: Option<u32>,
}

/// Root of the TOML configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// `[api]` section.
    pub api: ApiToml,
    /// `[stream]` section.
    pub stream: StreamToml,
    /// `[images]` section.
    pub images: ImagesToml,
    /// `[history]` section.
    pub history: HistoryToml,
    /// `[limits]` section.
    pub limits: LimitsToml,
}

impl EngineToml {
    /// Merge file values over the given base configuration.
    #[must_use]
    pub fn apply_to(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(ref url) = self.api.base_url {
            config.api.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = self.api.request_timeout_ms {
            config.api.request_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = self.stream.first_content_grace_secs {
            config.stream.first_content_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = self.stream.liveness_timeout_secs {
            config.stream.liveness_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.stream.tick_interval_ms {
            config.stream.tick_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.images.load_timeout_secs {
            config.images.load_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.images.preload_timeout_ms {
            config.images.preload_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.history.page_size {
            config.history.page_size = n;
        }
        if let Some(ms) = self.history.stagger_step_ms {
            config.history.stagger_step = Duration::from_millis(ms);
        }
        if let Some(n) = self.limits.max_title_len {
            config.limits.max_title_len = n;
        }
        if let Some(n) = self.limits.max_retries {
            config.limits.max_retries = n;
        }
        config
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Default config file path (`$XDG_CONFIG_HOME/parlor/engine.toml`).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("parlor").join("engine.toml"))
}

/// Load configuration from the default path, then env overrides.
///
/// A missing file is not an error; defaults are used.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    let base = match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path)?,
        _ => EngineConfig::default(),
    };
    let config = base.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Load configuration from an explicit TOML file path.
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let file: EngineToml = toml::from_str(&text)?;
    let config = file.apply_to(EngineConfig::default());
    tracing::debug!(path = %path.display(), "Loaded engine configuration");
    Ok(config)
}
