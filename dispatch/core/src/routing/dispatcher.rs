//! Dispatcher
//!
//! The facade every camera loop calls. For each submission it picks a path,
//! asks the gate for admission, sends over the persistent channel or the
//! HTTP fallback, and normalizes the answer into an [`InferenceResult`].
//!
//! # Routing
//!
//! | Connection state                     | Downgraded | Path       |
//! |--------------------------------------|------------|------------|
//! | Connected                            | no         | persistent |
//! | Connecting, previously connected     | no         | persistent |
//! | Connecting (first), Reconnecting     | -          | fallback   |
//! | Disconnected, Abandoned              | -          | fallback   |
//! | any                                  | yes        | fallback   |
//!
//! A persistent submission that finds the channel gone after admission is
//! rerouted to the fallback with the same permit. A transport failure while
//! sending downgrades the session to the fallback until the next successful
//! connection.
//!
//! [`Dispatcher::shutdown`] is global: it cancels requests in flight on
//! either path, and every later submission fails with
//! [`DispatchError::Cancelled`].

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::gate::{Admission, AdmissionPermit, BackpressureGate, DispatchPath, GateStats};
use super::metrics::{DispatchMetrics, DispatchStats};
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::messages::{FrameMessage, InferenceRequest, InferenceResult, ServedBy};
use crate::probe::{CapabilityCell, CapabilityProbe, SessionCapabilities};
use crate::transport::connection::{ConnectionManager, ConnectionState};
use crate::transport::fallback::FallbackTransport;
use crate::transport::traits::ChannelConnector;
use crate::transport::websocket::WebSocketConnector;

/// Routes frame-analysis requests to the remote detection service
///
/// Share one instance between all producers (`Arc<Dispatcher>`).
pub struct Dispatcher {
    manager: ConnectionManager,
    gate: BackpressureGate,
    fallback: FallbackTransport,
    capabilities: CapabilityCell,
    /// Connected epoch at which the session was downgraded
    downgraded_at: Mutex<Option<u64>>,
    metrics: DispatchMetrics,
    shutdown_tx: watch::Sender<bool>,
}

impl Dispatcher {
    /// Create a dispatcher talking WebSocket to `config.connection.url`.
    ///
    /// Starts the connection cycle and the capability probe. Must be called
    /// from within a tokio runtime.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let connector = WebSocketConnector::new(
            config.connection.url.clone(),
            config.connection.connect_timeout(),
        );
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a dispatcher over a custom persistent-channel connector
    #[must_use]
    pub fn with_connector(config: DispatcherConfig, connector: Arc<dyn ChannelConnector>) -> Self {
        let capabilities = CapabilityCell::new();
        if config.probe.enabled {
            CapabilityProbe::new(config.probe.clone()).spawn(capabilities.clone());
        } else {
            capabilities.set(SessionCapabilities::default());
        }

        let manager = ConnectionManager::new(connector, &config.connection);
        manager.start();

        tracing::info!(
            endpoint = %manager.endpoint(),
            fallback = %config.fallback.url,
            persistent_cap = config.gate.persistent_cap,
            fallback_cap = config.gate.fallback_cap,
            min_interval_ms = config.gate.min_interval_ms,
            "dispatcher started"
        );

        Self {
            manager,
            gate: BackpressureGate::new(config.gate),
            fallback: FallbackTransport::new(config.fallback),
            capabilities,
            downgraded_at: Mutex::new(None),
            metrics: DispatchMetrics::new(),
            shutdown_tx: watch::channel(false).0,
        }
    }

    /// Analyze one frame.
    ///
    /// Never waits for admission: a submission the gate refuses fails at
    /// once with [`DispatchError::AdmissionDropped`]. Otherwise suspends
    /// until the response, the deadline, or shutdown.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`]; see [`DispatchError::is_routine`] for which
    /// ones mean "skip this frame".
    pub async fn submit(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResult, DispatchError> {
        self.metrics.record_submitted();
        let started = Instant::now();

        let outcome = self.dispatch(&request).await;

        match &outcome {
            Ok(result) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics.record_served(result.served_by, elapsed_ms);
                tracing::debug!(
                    source = %request.source_id,
                    served_by = %result.served_by,
                    detections = result.detections.len(),
                    elapsed_ms,
                    "frame analyzed"
                );
            }
            Err(e) => {
                self.metrics.record_failure(e);
                if e.is_routine() {
                    tracing::debug!(source = %request.source_id, error = %e, "frame skipped");
                } else {
                    tracing::warn!(source = %request.source_id, error = %e, "frame failed");
                }
            }
        }

        outcome
    }

    async fn dispatch(&self, request: &InferenceRequest) -> Result<InferenceResult, DispatchError> {
        if self.is_shut_down() {
            return Err(DispatchError::Cancelled);
        }

        let frame = FrameMessage::from_request(request, self.optimization_hint(request));
        let path = self.route();

        let permit = match self.gate.admit(path) {
            Admission::Admitted(permit) => permit,
            Admission::Dropped(reason) => return Err(DispatchError::AdmissionDropped(reason)),
        };

        match path {
            DispatchPath::Fallback => self.send_fallback(&frame, permit).await,
            DispatchPath::Persistent => self.send_persistent(&frame, permit).await,
        }
    }

    async fn send_persistent(
        &self,
        frame: &FrameMessage,
        permit: AdmissionPermit,
    ) -> Result<InferenceResult, DispatchError> {
        let epoch = self.manager.connected_epoch();
        match self.manager.send(frame) {
            Ok(pending) => {
                let outcome = pending.await;
                drop(permit);
                match outcome {
                    Ok(message) => message.into_result(ServedBy::Persistent),
                    Err(e) => {
                        if matches!(e, DispatchError::Transport(_)) {
                            self.downgrade(&e, epoch);
                        }
                        Err(e)
                    }
                }
            }
            Err(DispatchError::NotConnected) => {
                let permit = permit
                    .reroute(DispatchPath::Fallback)
                    .map_err(DispatchError::AdmissionDropped)?;
                self.metrics.record_rerouted();
                tracing::debug!("persistent channel unavailable, rerouting to fallback");
                self.send_fallback(frame, permit).await
            }
            Err(e) => {
                if matches!(e, DispatchError::Transport(_)) {
                    self.downgrade(&e, epoch);
                }
                Err(e)
            }
        }
    }

    async fn send_fallback(
        &self,
        frame: &FrameMessage,
        _permit: AdmissionPermit,
    ) -> Result<InferenceResult, DispatchError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            response = self.fallback.send(frame, self.fallback.timeout()) => {
                response?.into_result(ServedBy::Fallback)
            }
            _ = shutdown_rx.wait_for(|shut_down| *shut_down) => {
                tracing::debug!("fallback request cancelled by shutdown");
                Err(DispatchError::Cancelled)
            }
        }
    }

    /// `quantized` flag for the wire message
    fn optimization_hint(&self, request: &InferenceRequest) -> Option<bool> {
        request
            .optimized
            .or_else(|| self.capabilities.optimized_path_available().then_some(true))
    }

    /// Suspend persistent sends. `epoch` is the connected epoch the failed
    /// frame was sent on, so a reconnect that lands before this runs still
    /// clears the downgrade.
    fn downgrade(&self, cause: &DispatchError, epoch: u64) {
        let mut downgraded_at = self.downgraded_at.lock();
        if downgraded_at.is_none() {
            self.metrics.record_downgrade();
            tracing::warn!(error = %cause, epoch, "session downgraded to fallback transport");
        }
        *downgraded_at = Some(downgraded_at.map_or(epoch, |at| at.max(epoch)));
    }

    /// Whether persistent sends are suspended after a transport failure.
    ///
    /// Clears itself once the channel has connected again.
    #[must_use]
    pub fn is_downgraded(&self) -> bool {
        let mut downgraded_at = self.downgraded_at.lock();
        match *downgraded_at {
            Some(epoch) if self.manager.connected_epoch() > epoch => {
                *downgraded_at = None;
                tracing::info!("reconnected, downgrade cleared");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Path the next submission would take
    #[must_use]
    pub fn route(&self) -> DispatchPath {
        if self.is_downgraded() {
            return DispatchPath::Fallback;
        }
        match self.manager.state() {
            ConnectionState::Connected => DispatchPath::Persistent,
            ConnectionState::Connecting if self.manager.connected_epoch() > 0 => {
                DispatchPath::Persistent
            }
            _ => DispatchPath::Fallback,
        }
    }

    /// Persistent channel state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Watch persistent channel state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_state()
    }

    /// Session capabilities, once probed
    #[must_use]
    pub fn capabilities(&self) -> Option<SessionCapabilities> {
        self.capabilities.get()
    }

    /// Outcome counters
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.metrics.snapshot()
    }

    /// Gate counters
    #[must_use]
    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    /// Persistent channel manager
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Whether the service's health endpoint answers
    pub async fn health_check(&self) -> bool {
        self.fallback.health_check().await
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Close the persistent channel and cancel every pending request on
    /// both paths. Terminal.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        tracing::info!("dispatcher shutting down");
        self.manager.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connection", &self.manager)
            .field("fallback", &self.fallback.url())
            .field("downgraded", &self.downgraded_at.lock().is_some())
            .finish()
    }
}
