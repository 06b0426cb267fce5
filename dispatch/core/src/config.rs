//! Dispatcher Configuration
//!
//! Loads [`DispatcherConfig`] from a TOML file at
//! `~/.config/frame-dispatch/dispatch.toml`, environment variables and
//! command-line overrides.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`DISPATCH_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! url = "ws://detector.local:8000/ws/inference"
//! response_timeout_ms = 10000
//! reconnect_attempts = 5
//! reconnect_base_delay_ms = 1000
//! reconnect_max_delay_ms = 5000
//!
//! [gate]
//! min_interval_ms = 50
//! persistent_cap = 3
//! fallback_cap = 2
//!
//! [fallback]
//! url = "http://detector.local:8000/api/inference"
//! health_url = "http://detector.local:8000/health"
//! timeout_ms = 30000
//!
//! [probe]
//! enabled = true
//! url = "http://detector.local:8000/api/capabilities"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::gate::GateConfig;
use crate::transport::config::{ConnectionConfig, FallbackConfig, ProbeConfig};

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

/// Where the effective configuration last came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in defaults
    #[default]
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
// Configuration
// =============================================================================

/// Complete dispatcher configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Persistent channel
    pub connection: ConnectionConfig,
    /// Backpressure gate
    pub gate: GateConfig,
    /// HTTP fallback
    pub fallback: FallbackConfig,
    /// Capability probe
    pub probe: ProbeConfig,

    #[serde(skip)]
    source: ConfigSource,
    #[serde(skip)]
    config_file_path: Option<PathBuf>,
}

impl DispatcherConfig {
    /// Defaults pointing every endpoint at `base` (e.g. `localhost:9000`)
    #[must_use]
    pub fn for_host(base: &str) -> Self {
        Self {
            connection: ConnectionConfig::for_url(format!("ws://{base}/ws/inference")),
            fallback: FallbackConfig {
                url: format!("http://{base}/api/inference"),
                health_url: format!("http://{base}/health"),
                ..FallbackConfig::default()
            },
            probe: ProbeConfig {
                url: format!("http://{base}/api/capabilities"),
                ..ProbeConfig::default()
            },
            ..Self::default()
        }
    }

    /// Where the configuration last came from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Config file that was loaded, if any
    #[must_use]
    pub fn config_file_path(&self) -> Option<&Path> {
        self.config_file_path.as_deref()
    }

    /// Check the configuration for values the dispatcher cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        let url = &self.connection.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return invalid("connection.url must be a ws:// or wss:// URL");
        }
        let url = &self.fallback.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return invalid("fallback.url must be an http:// or https:// URL");
        }
        if self.connection.response_timeout_ms == 0 {
            return invalid("connection.response_timeout_ms must be greater than zero");
        }
        if self.connection.connect_timeout_ms == 0 {
            return invalid("connection.connect_timeout_ms must be greater than zero");
        }
        if self.connection.reconnect_max_delay_ms < self.connection.reconnect_base_delay_ms {
            return invalid("connection.reconnect_max_delay_ms must not be below the base delay");
        }
        if self.fallback.timeout_ms == 0 {
            return invalid("fallback.timeout_ms must be greater than zero");
        }
        if self.gate.persistent_cap == 0 || self.gate.fallback_cap == 0 {
            return invalid("gate caps must be greater than zero");
        }
        Ok(())
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/frame-dispatch/dispatch.toml`, typically
/// `~/.config/frame-dispatch/dispatch.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("frame-dispatch").join("dispatch.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<DispatcherConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DispatcherConfig, ConfigError> {
    let mut config = load_file(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_file(path: Option<PathBuf>) -> Result<DispatcherConfig, ConfigError> {
    let Some(config_path) = path else {
        return Ok(DispatcherConfig::default());
    };

    if !config_path.exists() {
        tracing::debug!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(DispatcherConfig::default());
    }

    let toml_content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
            path: config_path.clone(),
            source: e,
        })?;

    let mut config: DispatcherConfig = toml::from_str(&toml_content)?;
    config.source = ConfigSource::File;
    tracing::info!(path = %config_path.display(), "Loaded configuration from file");
    config.config_file_path = Some(config_path);
    Ok(config)
}

/// Apply `DISPATCH_*` overrides using `lookup` to read variables
fn apply_env_config<F>(config: &mut DispatcherConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T, L>(lookup: L, key: &str) -> Option<T>
    where
        T: std::str::FromStr,
        L: Fn(&str) -> Option<String>,
    {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                None
            }
        }
    }

    let mut touched = false;

    if let Some(url) = lookup("DISPATCH_WS_URL") {
        config.connection.url = url;
        touched = true;
    }
    if let Some(url) = lookup("DISPATCH_HTTP_URL") {
        config.fallback.url = url;
        touched = true;
    }
    if let Some(url) = lookup("DISPATCH_CAPABILITIES_URL") {
        config.probe.url = url;
        touched = true;
    }
    if let Some(ms) = parsed(&lookup, "DISPATCH_RESPONSE_TIMEOUT_MS") {
        config.connection.response_timeout_ms = ms;
        touched = true;
    }
    if let Some(n) = parsed(&lookup, "DISPATCH_RECONNECT_ATTEMPTS") {
        config.connection.reconnect_attempts = n;
        touched = true;
    }
    if let Some(ms) = parsed(&lookup, "DISPATCH_RECONNECT_BASE_MS") {
        config.connection.reconnect_base_delay_ms = ms;
        touched = true;
    }
    if let Some(ms) = parsed(&lookup, "DISPATCH_MIN_INTERVAL_MS") {
        config.gate.min_interval_ms = ms;
        touched = true;
    }
    if let Some(cap) = parsed(&lookup, "DISPATCH_PERSISTENT_CAP") {
        config.gate.persistent_cap = cap;
        touched = true;
    }
    if let Some(cap) = parsed(&lookup, "DISPATCH_FALLBACK_CAP") {
        config.gate.fallback_cap = cap;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Persistent channel URL
    pub ws_url: Option<String>,
    /// Fallback inference URL
    pub http_url: Option<String>,
    /// Response timeout (milliseconds)
    pub response_timeout_ms: Option<u64>,
    /// Minimum interval between admissions (milliseconds)
    pub min_interval_ms: Option<u64>,
    /// Persistent-path cap
    pub persistent_cap: Option<usize>,
    /// Fallback-path cap
    pub fallback_cap: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistent channel URL
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Set the fallback inference URL
    #[must_use]
    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = Some(url.into());
        self
    }

    /// Set the minimum admission interval
    #[must_use]
    pub fn with_min_interval_ms(mut self, ms: u64) -> Self {
        self.min_interval_ms = Some(ms);
        self
    }

    fn is_empty(&self) -> bool {
        self.ws_url.is_none()
            && self.http_url.is_none()
            && self.response_timeout_ms.is_none()
            && self.min_interval_ms.is_none()
            && self.persistent_cap.is_none()
            && self.fallback_cap.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DispatcherConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref url) = self.ws_url {
            config.connection.url = url.clone();
        }
        if let Some(ref url) = self.http_url {
            config.fallback.url = url.clone();
        }
        if let Some(ms) = self.response_timeout_ms {
            config.connection.response_timeout_ms = ms;
        }
        if let Some(ms) = self.min_interval_ms {
            config.gate.min_interval_ms = ms;
        }
        if let Some(cap) = self.persistent_cap {
            config.gate.persistent_cap = cap;
        }
        if let Some(cap) = self.fallback_cap {
            config.gate.fallback_cap = cap;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
