//! Capability Probe
//!
//! Asks the detection service once, at startup, whether it offers the
//! optimized inference path. The answer is written into a write-once
//! [`CapabilityCell`]; submissions read it but never wait for it.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::transport::config::ProbeConfig;

/// What the remote service supports for this session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCapabilities {
    /// Whether requests may ask for the optimized numeric path
    #[serde(default)]
    pub optimized_path_available: bool,
}

/// Write-once holder for [`SessionCapabilities`]
#[derive(Clone, Debug, Default)]
pub struct CapabilityCell(Arc<OnceLock<SessionCapabilities>>);

impl CapabilityCell {
    /// Empty cell
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities, if the probe has finished
    #[must_use]
    pub fn get(&self) -> Option<SessionCapabilities> {
        self.0.get().copied()
    }

    /// Store the result. Returns false if a value was already stored.
    pub fn set(&self, capabilities: SessionCapabilities) -> bool {
        self.0.set(capabilities).is_ok()
    }

    /// Whether the optimized path may be requested
    #[must_use]
    pub fn optimized_path_available(&self) -> bool {
        self.get().is_some_and(|c| c.optimized_path_available)
    }
}

/// One-shot query of the service's capabilities endpoint
#[derive(Clone, Debug)]
pub struct CapabilityProbe {
    config: ProbeConfig,
    http_client: reqwest::Client,
}

impl CapabilityProbe {
    /// Create a probe from configuration
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// Query the service. Any failure yields the defaults.
    pub async fn probe(&self) -> SessionCapabilities {
        if !self.config.enabled {
            return SessionCapabilities::default();
        }

        match self.fetch().await {
            Ok(capabilities) => {
                tracing::info!(
                    optimized_path_available = capabilities.optimized_path_available,
                    "session capabilities probed"
                );
                capabilities
            }
            Err(e) => {
                tracing::warn!(
                    url = %self.config.url,
                    error = %e,
                    "capability probe failed, using defaults"
                );
                SessionCapabilities::default()
            }
        }
    }

    async fn fetch(&self) -> Result<SessionCapabilities, reqwest::Error> {
        self.http_client
            .get(&self.config.url)
            .timeout(self.config.timeout())
            .send()
            .await?
            .error_for_status()?
            .json::<SessionCapabilities>()
            .await
    }

    /// Run the probe in the background and fill `cell` when done
    pub fn spawn(self, cell: CapabilityCell) -> JoinHandle<()> {
        tokio::spawn(async move {
            let capabilities = self.probe().await;
            if !cell.set(capabilities) {
                tracing::debug!("capabilities already set, probe result ignored");
            }
        })
    }
}
