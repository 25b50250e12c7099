//! TOML Configuration File Support
//!
//! Loads the builder configuration from `~/.config/agent-builder/builder.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! base_url = "https://studio.example.com/api"
//!
//! [stream]
//! connect_timeout_ms = 5000
//! read_timeout_ms = 0        # 0 = wait forever between chunks
//! event_buffer = 64
//!
//! [duplex]
//! connect_timeout_ms = 5000
//! event_buffer = 64
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Base URL used when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8081/api";

/// Environment variable overriding the base URL
pub const ENV_BASE_URL: &str = "AGENT_BUILDER_BASE_URL";
/// Environment variable overriding both connect timeouts (ms)
pub const ENV_CONNECT_TIMEOUT: &str = "AGENT_BUILDER_CONNECT_TIMEOUT";
/// Environment variable overriding the stream read timeout (ms)
pub const ENV_READ_TIMEOUT: &str = "AGENT_BUILDER_READ_TIMEOUT";

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

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in defaults
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Server addressing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Base URL; the plan endpoint and duplex path hang off it
    pub base_url: Url,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Opening stream settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// TCP/TLS connect timeout
    pub connect_timeout_ms: u64,
    /// Longest gap between body chunks (0 = none)
    pub read_timeout_ms: u64,
    /// Capacity of the event channel between driver and orchestrator
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            read_timeout_ms: 0,
            event_buffer: 64,
        }
    }
}

/// Duplex channel settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplexConfig {
    /// Handshake timeout
    pub connect_timeout_ms: u64,
    /// Capacity of the inbound frame channel
    pub event_buffer: usize,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            event_buffer: 64,
        }
    }
}

/// Complete builder configuration
#[derive(Clone, Debug)]
pub struct BuilderConfig {
    /// Server addressing
    pub server: ServerConfig,
    /// Opening stream settings
    pub stream: StreamConfig,
    /// Duplex channel settings
    pub duplex: DuplexConfig,
    /// File the configuration was read from, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            duplex: DuplexConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl BuilderConfig {
    /// Defaults pointed at `base_url`
    #[must_use]
    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            server: ServerConfig { base_url },
            ..Self::default()
        }
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }
}

fn default_base_url() -> Url {
    // Constant literal; parsing cannot fail
    Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid")
}

/// Parse and validate a base URL (http or https only)
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for malformed URLs or other schemes.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::ValidationError(format!("base_url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::ValidationError(format!(
            "base_url '{raw}' must use http or https, not {other}"
        ))),
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Base URL of the builder API
    pub base_url: Option<String>,
}

/// `[stream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Read timeout in milliseconds (0 = no timeout)
    pub read_timeout_ms: Option<u64>,
    /// Event channel capacity
    pub event_buffer: Option<usize>,
}

/// `[duplex]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexToml {
    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Inbound frame channel capacity
    pub event_buffer: Option<usize>,
}

/// Root of `builder.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderToml {
    /// `[server]`
    pub server: ServerToml,
    /// `[stream]`
    pub stream: StreamToml,
    /// `[duplex]`
    pub duplex: DuplexToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// `$XDG_CONFIG_HOME/agent-builder/builder.toml`, usually
/// `~/.config/agent-builder/builder.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agent-builder").join("builder.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or a
/// value fails validation. A missing file is not an error.
pub fn load_config() -> Result<BuilderConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or a value fails
/// validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<BuilderConfig, ConfigError> {
    let mut config = BuilderConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: BuilderToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

fn apply_toml_config(config: &mut BuilderConfig, toml: &BuilderToml) -> Result<(), ConfigError> {
    let mut touched = false;

    if let Some(ref raw) = toml.server.base_url {
        config.server.base_url = parse_base_url(raw)?;
        touched = true;
    }

    if let Some(timeout) = toml.stream.connect_timeout_ms {
        config.stream.connect_timeout_ms = timeout;
        touched = true;
    }
    if let Some(timeout) = toml.stream.read_timeout_ms {
        config.stream.read_timeout_ms = timeout;
        touched = true;
    }
    if let Some(buffer) = toml.stream.event_buffer {
        config.stream.event_buffer = validate_buffer("stream.event_buffer", buffer)?;
        touched = true;
    }

    if let Some(timeout) = toml.duplex.connect_timeout_ms {
        config.duplex.connect_timeout_ms = timeout;
        touched = true;
    }
    if let Some(buffer) = toml.duplex.event_buffer {
        config.duplex.event_buffer = validate_buffer("duplex.event_buffer", buffer)?;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::File;
    }
    Ok(())
}

/// Apply environment overrides using `lookup` to read variables
fn apply_env_config<F>(config: &mut BuilderConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(ENV_BASE_URL) {
        config.server.base_url = parse_base_url(&raw)?;
        config.source = ConfigSource::Env;
    }

    if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT) {
        match raw.trim().parse::<u64>() {
            Ok(ms) => {
                config.stream.connect_timeout_ms = ms;
                config.duplex.connect_timeout_ms = ms;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                var = ENV_CONNECT_TIMEOUT,
                value = %raw,
                "Ignoring non-numeric timeout"
            ),
        }
    }

    if let Some(raw) = lookup(ENV_READ_TIMEOUT) {
        match raw.trim().parse::<u64>() {
            Ok(ms) => {
                config.stream.read_timeout_ms = ms;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                var = ENV_READ_TIMEOUT,
                value = %raw,
                "Ignoring non-numeric timeout"
            ),
        }
    }

    Ok(())
}

fn validate_buffer(field: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be at least 1"
        )));
    }
    Ok(value)
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Values supplied on the command line; they win over everything else
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,
    /// Connect timeout override (both transports)
    pub connect_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the connect timeout
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Apply on top of a loaded configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an invalid base URL.
    pub fn apply(&self, config: &mut BuilderConfig) -> Result<(), ConfigError> {
        if let Some(ref raw) = self.base_url {
            config.server.base_url = parse_base_url(raw)?;
            config.source = ConfigSource::Cli;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.stream.connect_timeout_ms = ms;
            config.duplex.connect_timeout_ms = ms;
            config.source = ConfigSource::Cli;
        }
        Ok(())
    }
}
