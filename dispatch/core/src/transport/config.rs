//! Transport Configuration
//!
//! Configuration for the persistent channel, the fallback transport and
//! the capability probe. Defaults target a detection service on
//! `localhost:8000`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Persistent channel configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket endpoint (ws:// or wss://)
    pub url: String,

    /// How long a single connection attempt may take in milliseconds
    pub connect_timeout_ms: u64,

    /// Deadline for each correlated response in milliseconds
    pub response_timeout_ms: u64,

    /// Reconnection attempts before the channel is abandoned
    pub reconnect_attempts: u32,

    /// Backoff step in milliseconds; attempt `n` waits `n` steps
    pub reconnect_base_delay_ms: u64,

    /// Upper bound on a single backoff delay in milliseconds
    pub reconnect_max_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/inference".to_string(),
            connect_timeout_ms: 5000,
            response_timeout_ms: 10_000,
            reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 5000,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for a specific endpoint with default timings
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Connect timeout as a [`Duration`]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Response timeout as a [`Duration`]
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Fallback (HTTP) transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Inference endpoint accepting one JSON request per call
    pub url: String,

    /// Service health endpoint
    pub health_url: String,

    /// Per-request timeout in milliseconds.
    ///
    /// Longer than the persistent deadline: a stateless call may pay
    /// model cold-start cost on the remote side.
    pub timeout_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/api/inference".to_string(),
            health_url: "http://localhost:8000/health".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl FallbackConfig {
    /// Request timeout as a [`Duration`]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Capability probe configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Whether to query the service at all
    pub enabled: bool,

    /// Capabilities endpoint
    pub url: String,

    /// Probe timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:8000/api/capabilities".to_string(),
            timeout_ms: 3000,
        }
    }
}

impl ProbeConfig {
    /// A probe that never contacts the service
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Probe timeout as a [`Duration`]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.response_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_max_delay_ms, 5000);
    }

    #[test]
    fn test_fallback_timeout_exceeds_response_timeout() {
        assert!(FallbackConfig::default().timeout() > ConnectionConfig::default().response_timeout());
    }

    #[test]
    fn test_partial_toml_section_keeps_defaults() {
        let config: ConnectionConfig = toml::from_str("reconnect_attempts = 2").unwrap();
        assert_eq!(config.reconnect_attempts, 2);
        assert_eq!(config.url, "ws://localhost:8000/ws/inference");
    }
}
