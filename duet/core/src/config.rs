//! TOML Configuration File Support
//!
//! Centralized configuration loading for duet, supporting a TOML
//! configuration file at `~/.config/duet/duet.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest
//! first):
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [upstream]
//! base_url = "https://api.openai.com/v1"
//! request_timeout_secs = 120
//!
//! [reasoning]
//! model = "deepseek-r1"
//! temperature = 0.6
//! max_tokens = 8192
//!
//! [answer]
//! model = "gpt-4.5-preview"
//! temperature = 0.7
//! max_tokens = 4096
//!
//! [session]
//! max_continuations = 3
//! inactivity_timeout_secs = 90
//!
//! [handoff]
//! use_heuristics = false
//! min_reasoning_chars = 200
//! token_threshold = 600
//!
//! [limits]
//! max_concurrent_exchanges = 16
//! snapshot_capacity = 64
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handoff::HandoffConfig;
use crate::protocol::ModelParams;
use crate::session::SessionConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where the configuration primarily came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Connection settings for the upstream completion endpoint
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Bearer token, if the endpoint requires one
    pub api_key: Option<String>,
    /// Whole-request timeout for the HTTP client
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Registry and snapshot-channel bounds
#[derive(Clone, Copy, Debug)]
pub struct LimitsConfig {
    /// Maximum live orchestrators at once
    pub max_concurrent_exchanges: usize,
    /// Capacity of each exchange's snapshot channel
    pub snapshot_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_exchanges: 16,
            snapshot_capacity: 64,
        }
    }
}

/// Complete configuration for a [`Duet`](crate::duet::Duet) instance
#[derive(Clone, Debug)]
pub struct DuetConfig {
    /// Upstream endpoint settings
    pub upstream: UpstreamConfig,
    /// Reasoning-stream model parameters
    pub reasoning: ModelParams,
    /// Answer-stream model parameters
    pub answer: ModelParams,
    /// Stream session behavior
    pub session: SessionConfig,
    /// Handoff detector tuning
    pub handoff: HandoffConfig,
    /// Concurrency bounds
    pub limits: LimitsConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Primary source of this configuration
    source: ConfigSource,
}

impl Default for DuetConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            reasoning: ModelParams::new("deepseek-r1").with_temperature(0.6),
            answer: ModelParams::new("gpt-4.5-preview"),
            session: SessionConfig::default(),
            handoff: HandoffConfig::default(),
            limits: LimitsConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DuetConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables only
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_env_config(&mut config);
        config
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "upstream.base_url must not be empty".to_string(),
            ));
        }
        if self.reasoning.model.is_empty() || self.answer.model.is_empty() {
            return Err(ConfigError::ValidationError(
                "reasoning.model and answer.model must not be empty".to_string(),
            ));
        }
        if self.session.max_continuations > 10 {
            return Err(ConfigError::ValidationError(format!(
                "session.max_continuations = {} is unreasonably high (max 10)",
                self.session.max_continuations
            )));
        }
        if self.session.inactivity_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "session.inactivity_timeout_secs must be positive".to_string(),
            ));
        }
        if self.limits.max_concurrent_exchanges == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_concurrent_exchanges must be at least 1".to_string(),
            ));
        }
        if self.limits.snapshot_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "limits.snapshot_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Upstream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Base URL of the OpenAI-compatible API
    pub base_url: Option<String>,

    /// Bearer token for the endpoint
    pub api_key: Option<String>,

    /// Whole-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Per-model section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelToml {
    /// Model identifier
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

/// Session section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Truncation-continuation retry ceiling
    pub max_continuations: Option<u32>,

    /// Inactivity timeout in seconds
    pub inactivity_timeout_secs: Option<u64>,

    /// Provider event channel capacity
    pub event_capacity: Option<usize>,
}

/// Handoff section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffToml {
    /// Enable heuristic fallback signals
    pub use_heuristics: Option<bool>,

    /// Minimum accumulated reasoning length for the marker heuristic
    pub min_reasoning_chars: Option<usize>,

    /// Approximate token count that fires the heuristic on its own
    pub token_threshold: Option<usize>,
}

/// Limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Maximum live orchestrators at once
    pub max_concurrent_exchanges: Option<usize>,

    /// Snapshot channel capacity
    pub snapshot_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuetToml {
    /// Upstream endpoint section
    pub upstream: UpstreamToml,

    /// Reasoning model section
    pub reasoning: ModelToml,

    /// Answer model section
    pub answer: ModelToml,

    /// Session behavior section
    pub session: SessionToml,

    /// Handoff tuning section
    pub handoff: HandoffToml,

    /// Concurrency bounds section
    pub limits: LimitsToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/duet/duet.toml` or `~/.config/duet/duet.toml`
/// if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("duet").join("duet.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resolved configuration fails validation. A missing config file is
/// not an error (defaults are used).
pub fn load_config() -> Result<DuetConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resolved configuration fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DuetConfig, ConfigError> {
    let mut config = DuetConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DuetToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DuetConfig, toml: &DuetToml) {
    // Upstream settings
    if let Some(ref url) = toml.upstream.base_url {
        config.upstream.base_url.clone_from(url);
    }
    if toml.upstream.api_key.is_some() {
        config.upstream.api_key.clone_from(&toml.upstream.api_key);
    }
    if let Some(secs) = toml.upstream.request_timeout_secs {
        config.upstream.request_timeout = Duration::from_secs(secs);
    }

    // Model settings
    apply_model_toml(&mut config.reasoning, &toml.reasoning);
    apply_model_toml(&mut config.answer, &toml.answer);

    // Session settings
    if let Some(max) = toml.session.max_continuations {
        config.session.max_continuations = max;
    }
    if let Some(secs) = toml.session.inactivity_timeout_secs {
        config.session.inactivity_timeout = Duration::from_secs(secs);
    }
    if let Some(capacity) = toml.session.event_capacity {
        config.session.event_capacity = capacity;
    }

    // Handoff settings
    if let Some(enabled) = toml.handoff.use_heuristics {
        config.handoff.use_heuristics = enabled;
    }
    if let Some(chars) = toml.handoff.min_reasoning_chars {
        config.handoff.min_reasoning_chars = chars;
    }
    if let Some(tokens) = toml.handoff.token_threshold {
        config.handoff.token_threshold = tokens;
    }

    // Limits settings
    if let Some(max) = toml.limits.max_concurrent_exchanges {
        config.limits.max_concurrent_exchanges = max;
    }
    if let Some(capacity) = toml.limits.snapshot_capacity {
        config.limits.snapshot_capacity = capacity;
    }
}

fn apply_model_toml(params: &mut ModelParams, toml: &ModelToml) {
    if let Some(ref model) = toml.model {
        params.model.clone_from(model);
    }
    if let Some(temperature) = toml.temperature {
        params.temperature = temperature.clamp(0.0, 2.0);
    }
    if let Some(max_tokens) = toml.max_tokens {
        params.max_tokens = max_tokens;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut DuetConfig) {
    // Upstream settings; OPENAI_* fallbacks match the providers this crate
    // is typically pointed at.
    if let Ok(url) = std::env::var("DUET_UPSTREAM_URL")
        .or_else(|_| std::env::var("OPENAI_BASE_URL"))
    {
        config.upstream.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(key) = std::env::var("DUET_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
    {
        if !key.is_empty() {
            config.upstream.api_key = Some(key);
            config.source = ConfigSource::Env;
        }
    }

    // Model settings from environment
    if let Ok(model) = std::env::var("DUET_REASONING_MODEL") {
        config.reasoning.model = model;
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("DUET_ANSWER_MODEL") {
        config.answer.model = model;
        config.source = ConfigSource::Env;
    }

    // Session settings from environment
    if let Ok(max) = std::env::var("DUET_MAX_CONTINUATIONS") {
        if let Ok(n) = max.parse::<u32>() {
            config.session.max_continuations = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("DUET_INACTIVITY_TIMEOUT_SECS") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.session.inactivity_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }

    // Handoff settings from environment
    if let Ok(enabled) = std::env::var("DUET_HEURISTIC_HANDOFF") {
        config.handoff.use_heuristics = enabled == "1" || enabled.to_lowercase() == "true";
        config.source = ConfigSource::Env;
    }

    // Limits from environment
    if let Ok(max) = std::env::var("DUET_MAX_EXCHANGES") {
        if let Ok(n) = max.parse::<usize>() {
            config.limits.max_concurrent_exchanges = n;
            config.source = ConfigSource::Env;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = DuetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.reasoning.model, "deepseek-r1");
        assert_eq!(config.answer.model, "gpt-4.5-preview");
        assert_eq!(config.session.max_continuations, 3);
        assert_eq!(config.limits.max_concurrent_exchanges, 16);
    }

    #[test]
    fn test_default_config_path_suffix() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("duet/duet.toml"));
        }
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config =
            load_config_from_path(Some(PathBuf::from("/nonexistent/duet.toml"))).unwrap();
        assert_eq!(config.upstream.base_url, "https://api.openai.com/v1");
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duet.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[upstream]
base_url = "http://localhost:8000/v1"

[reasoning]
model = "my-reasoner"
temperature = 0.2

[session]
max_continuations = 5
inactivity_timeout_secs = 30

[handoff]
use_heuristics = true
min_reasoning_chars = 50

[limits]
max_concurrent_exchanges = 4
"#
        )
        .unwrap();

        let config = load_config_from_path(Some(path.clone())).unwrap();
        assert_eq!(config.upstream.base_url, "http://localhost:8000/v1");
        assert_eq!(config.reasoning.model, "my-reasoner");
        assert!((config.reasoning.temperature - 0.2).abs() < f32::EPSILON);
        // Untouched sections keep defaults
        assert_eq!(config.answer.model, "gpt-4.5-preview");
        assert_eq!(config.session.max_continuations, 5);
        assert_eq!(config.session.inactivity_timeout, Duration::from_secs(30));
        assert!(config.handoff.use_heuristics);
        assert_eq!(config.handoff.min_reasoning_chars, 50);
        assert_eq!(config.limits.max_concurrent_exchanges, 4);
        assert_eq!(config.config_file_path, Some(path));
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duet.toml");
        std::fs::write(&path, "[upstream\nbase_url = oops").unwrap();

        let err = load_config_from_path(Some(path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validate_rejects_empty_model() {
        let mut config = DuetConfig::default();
        config.reasoning.model = String::new();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_rejects_excessive_continuations() {
        let mut config = DuetConfig::default();
        config.session.max_continuations = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = DuetConfig::default();
        config.session.inactivity_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
