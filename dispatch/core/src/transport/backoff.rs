//! Reconnect Backoff
//!
//! Linear backoff with a ceiling: attempt `n` waits `n × base`, capped at
//! `max_delay`. After `max_attempts` failed attempts the channel is abandoned.

use std::time::Duration;

use super::config::ConnectionConfig;

/// Reconnection schedule for the persistent channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay step
    pub base: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Failed attempts allowed before giving up
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Build the policy from connection configuration
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            base: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: config.reconnect_attempts,
        }
    }

    /// Delay before attempt number `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt.max(1)).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}
