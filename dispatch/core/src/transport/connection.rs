//! Connection Manager
//!
//! Owns the single persistent channel to the detection service and
//! multiplexes every in-flight request over it.
//!
//! # State Machine
//!
//! ```text
//!                start()
//! Disconnected ─────────▶ Connecting ──── session open ────▶ Connected
//!      ▲                    ▲     │                              │
//!      │ shutdown()         │     │ connect failed               │ session lost
//!      │ (from any state)   │     ▼                              ▼
//!      │                    └── Reconnecting ◀───────────────────┘
//!      │                          │
//!      │                          │ attempts exhausted
//!      │                          ▼
//!      └──────────────────── Abandoned ── start() ──▶ Connecting
//! ```
//!
//! A supervisor task drives the machine; callers only observe it. Every
//! Connected transition starts a new *connected epoch*, which the dispatcher
//! uses to tell a fresh connection from the one that failed it.
//!
//! Losing the session does not fail pending requests: each one still ends
//! by its own response, its own deadline, or shutdown.
//!
//! The service reports some failures without a `clientId`. Such an error
//! fails the pending request only when exactly one is in flight; otherwise
//! it cannot be attributed and the affected request ends at its deadline.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::backoff::ReconnectPolicy;
use super::config::ConnectionConfig;
use super::correlation::{CorrelationTable, PendingCompletion};
use super::traits::{ChannelConnector, ChannelSession, TransportError};
use crate::error::DispatchError;
use crate::messages::{CorrelationId, FrameMessage, ServerMessage};

/// Lifecycle state of the persistent channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started, or shut down
    Disconnected,
    /// A connection attempt is in progress
    Connecting,
    /// A session is open and accepting requests
    Connected,
    /// Waiting out the backoff delay before the next attempt
    Reconnecting,
    /// Reconnection attempts exhausted; nothing further is tried
    Abandoned,
}

impl ConnectionState {
    /// Whether the state machine has an edge from `self` to `next`
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Abandoned, Connected, Connecting, Disconnected, Reconnecting};

        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected | Abandoned | Reconnecting, Connecting) => true,
            (Connecting, Connected | Reconnecting) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Abandoned) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// One encoded frame waiting for the session writer
struct Outbound {
    id: CorrelationId,
    text: String,
}

/// Per-connection bookkeeping
struct SessionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Client id the server assigned to this connection
    client_id: Option<String>,
    seq: u64,
}

struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    supervisor_running: bool,
    shut_down: bool,
    session: Option<SessionHandle>,
}

enum SessionEnd {
    Shutdown,
    Lost(TransportError),
}

struct Shared {
    connector: Arc<dyn ChannelConnector>,
    policy: ReconnectPolicy,
    table: CorrelationTable,
    lifecycle: Mutex<Lifecycle>,
    epoch: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Shared {
    /// Must be called with the lifecycle lock held
    fn transition(&self, lifecycle: &mut Lifecycle, to: ConnectionState) {
        let from = lifecycle.state;
        if from == to {
            return;
        }
        debug_assert!(from.can_transition_to(to), "invalid transition {from} -> {to}");
        lifecycle.state = to;
        self.state_tx.send_replace(to);
        tracing::info!(
            endpoint = %self.connector.endpoint(),
            from = %from,
            to = %to,
            attempts = lifecycle.attempts,
            "connection state changed"
        );
    }

    fn on_connected(&self) -> Option<mpsc::UnboundedReceiver<Outbound>> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.shut_down {
            return None;
        }
        let (outbound, rx) = mpsc::unbounded_channel();
        lifecycle.session = Some(SessionHandle {
            outbound,
            client_id: None,
            seq: 0,
        });
        lifecycle.attempts = 0;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.transition(&mut lifecycle, ConnectionState::Connected);
        Some(rx)
    }

    /// Route one inbound text frame to its pending caller
    fn demultiplex(&self, text: &str) {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        let Some(client_id) = message.client_id.clone() else {
            match message.remote_failure() {
                Some(failure) => match self.table.reject_sole(DispatchError::Remote(failure.clone()))
                {
                    Some(id) => tracing::debug!(
                        correlation_id = %id,
                        error = %failure,
                        "uncorrelated error delivered"
                    ),
                    None => tracing::warn!(
                        error = %failure,
                        pending = self.table.len(),
                        "uncorrelated service error"
                    ),
                },
                None => tracing::debug!("dropping uncorrelated message"),
            }
            return;
        };

        let id = CorrelationId(client_id);
        let Some(unmatched) = self.table.try_resolve(&id, message) else {
            return;
        };

        let mut lifecycle = self.lifecycle.lock();
        if let Some(session) = lifecycle.session.as_mut() {
            if session.client_id.is_none() {
                tracing::info!(
                    client_id = %id,
                    greeting = unmatched.is_greeting(),
                    "server assigned client id"
                );
                session.client_id = Some(id.0);
                return;
            }
        }
        tracing::debug!(correlation_id = %id, "dropping unmatched response");
    }
}

/// Resolves once shutdown has been signalled
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_session(
    shared: &Shared,
    session: ChannelSession,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let ChannelSession {
        mut sink,
        mut stream,
    } = session;

    loop {
        tokio::select! {
            _ = shutdown_signalled(shutdown_rx) => {
                let _ = sink.close().await;
                return SessionEnd::Shutdown;
            }
            frame = outbound_rx.recv() => {
                let Some(Outbound { id, text }) = frame else {
                    return SessionEnd::Lost(TransportError::ConnectionClosed);
                };
                if let Err(e) = sink.send(text).await {
                    tracing::warn!(correlation_id = %id, error = %e, "frame write failed");
                    shared.table.reject(&id, DispatchError::from(e.clone()));
                    return SessionEnd::Lost(e);
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(text)) => shared.demultiplex(&text),
                Some(Err(e)) => return SessionEnd::Lost(e),
                None => return SessionEnd::Lost(TransportError::ConnectionClosed),
            },
        }
    }
}

async fn supervise(shared: Arc<Shared>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    loop {
        let outcome = tokio::select! {
            _ = shutdown_signalled(&mut shutdown_rx) => break,
            outcome = shared.connector.connect() => outcome,
        };

        match outcome {
            Ok(session) => {
                let Some(outbound_rx) = shared.on_connected() else {
                    break;
                };
                match run_session(&shared, session, outbound_rx, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(e) => {
                        tracing::warn!(error = %e, "persistent session lost");
                        shared.lifecycle.lock().session = None;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %shared.connector.endpoint(),
                    error = %e,
                    "connection attempt failed"
                );
            }
        }

        let delay = {
            let mut lifecycle = shared.lifecycle.lock();
            if lifecycle.shut_down {
                break;
            }
            if !shared.policy.allows(lifecycle.attempts) {
                shared.transition(&mut lifecycle, ConnectionState::Reconnecting);
                shared.transition(&mut lifecycle, ConnectionState::Abandoned);
                lifecycle.supervisor_running = false;
                tracing::error!(
                    attempts = lifecycle.attempts,
                    "reconnection attempts exhausted, persistent channel abandoned"
                );
                return;
            }
            lifecycle.attempts += 1;
            shared.transition(&mut lifecycle, ConnectionState::Reconnecting);
            shared.policy.delay_for(lifecycle.attempts)
        };

        tracing::debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
        tokio::select! {
            _ = shutdown_signalled(&mut shutdown_rx) => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let mut lifecycle = shared.lifecycle.lock();
        if lifecycle.shut_down {
            break;
        }
        shared.transition(&mut lifecycle, ConnectionState::Connecting);
    }

    shared.lifecycle.lock().supervisor_running = false;
}

/// Single owner of the persistent channel
///
/// Dropping the manager shuts it down.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager in the Disconnected state. Nothing is opened until
    /// [`start`](Self::start).
    pub fn new(connector: Arc<dyn ChannelConnector>, config: &ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                connector,
                policy: ReconnectPolicy::from_config(config),
                table: CorrelationTable::new(config.response_timeout()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                    supervisor_running: false,
                    shut_down: false,
                    session: None,
                }),
                epoch: AtomicU64::new(0),
                state_tx,
                shutdown_tx,
            }),
        }
    }

    /// Begin a connection cycle.
    ///
    /// No-op while a cycle is already running or after shutdown. After
    /// Abandoned this starts over with a fresh attempt counter. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.shut_down || lifecycle.supervisor_running {
                return;
            }
            lifecycle.supervisor_running = true;
            lifecycle.attempts = 0;
            self.shared
                .transition(&mut lifecycle, ConnectionState::Connecting);
        }

        tokio::spawn(supervise(Arc::clone(&self.shared)));
    }

    /// Send a frame over the persistent channel.
    ///
    /// Returns immediately with the pending completion; the caller awaits it
    /// for the correlated response. A send while Disconnected kicks off a
    /// connection cycle but still fails.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotConnected`] unless the channel is Connected
    /// - [`DispatchError::Transport`] if the session closed underneath us
    pub fn send(&self, frame: &FrameMessage) -> Result<PendingCompletion, DispatchError> {
        let (id, outbound) = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state != ConnectionState::Connected {
                let idle = lifecycle.state == ConnectionState::Disconnected
                    && !lifecycle.shut_down
                    && !lifecycle.supervisor_running;
                drop(lifecycle);
                if idle {
                    self.start();
                }
                return Err(DispatchError::NotConnected);
            }
            let Some(session) = lifecycle.session.as_mut() else {
                return Err(DispatchError::NotConnected);
            };
            session.seq += 1;
            let id = match session.client_id.as_deref() {
                Some(client_id) => CorrelationId::scoped(client_id, session.seq),
                None => CorrelationId::provisional(),
            };
            (id, session.outbound.clone())
        };

        let text = serde_json::to_string(&frame.correlated(&id))
            .map_err(|e| DispatchError::Transport(format!("failed to encode frame: {e}")))?;

        let pending = self.shared.table.register(id.clone())?;

        if outbound
            .send(Outbound {
                id: id.clone(),
                text,
            })
            .is_err()
        {
            self.shared
                .table
                .reject(&id, DispatchError::Transport("session closed".into()));
            return Err(DispatchError::Transport(
                "persistent session closed before send".into(),
            ));
        }

        tracing::trace!(correlation_id = %id, "frame queued");
        Ok(pending)
    }

    /// Stop the channel and cancel every pending request. Terminal.
    pub fn shutdown(&self) {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.shut_down {
                return;
            }
            lifecycle.shut_down = true;
            lifecycle.session = None;
            self.shared
                .transition(&mut lifecycle, ConnectionState::Disconnected);
        }

        self.shared.shutdown_tx.send_replace(true);
        let cancelled = self.shared.table.reject_all(&DispatchError::Cancelled);
        tracing::info!(cancelled, "connection manager shut down");
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.lock().state
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Number of Connected transitions so far
    #[must_use]
    pub fn connected_epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    /// Reconnection attempts made since the last Connected
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.shared.lifecycle.lock().attempts
    }

    /// Requests awaiting a response
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.table.len()
    }

    /// Whether `id` is still awaiting a response
    #[must_use]
    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.shared.table.contains(id)
    }

    /// Client id the server assigned to the current connection
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        self.shared
            .lifecycle
            .lock()
            .session
            .as_ref()
            .and_then(|s| s.client_id.clone())
    }

    /// Endpoint of the underlying connector
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.shared.connector.endpoint()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector for driving the manager without sockets

    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    use super::*;

    /// Server side of one scripted session
    pub(crate) struct RemoteEnd {
        pub(crate) inbound: fmpsc::UnboundedReceiver<String>,
        pub(crate) outbound: fmpsc::UnboundedSender<Result<String, TransportError>>,
    }

    impl RemoteEnd {
        pub(crate) async fn recv_frame(&mut self) -> FrameMessage {
            let text = self.inbound.next().await.expect("client closed session");
            serde_json::from_str(&text).expect("client sent invalid frame")
        }

        pub(crate) fn reply(&self, value: serde_json::Value) {
            let _ = self.outbound.unbounded_send(Ok(value.to_string()));
        }

        pub(crate) fn greet(&self, client_id: &str) {
            self.reply(serde_json::json!({"status": "connected", "clientId": client_id}));
        }
    }

    pub(crate) fn session_pair() -> (ChannelSession, RemoteEnd) {
        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, TransportError>>();

        let sink = client_tx.sink_map_err(|e| TransportError::SendFailed(e.to_string()));
        let session = ChannelSession::new(Box::pin(sink), Box::pin(client_rx));

        (
            session,
            RemoteEnd {
                inbound: server_rx,
                outbound: server_tx,
            },
        )
    }

    /// Hands out pre-built sessions in order, then refuses
    #[derive(Default)]
    pub(crate) struct ScriptedConnector {
        sessions: parking_lot::Mutex<VecDeque<Result<ChannelSession, TransportError>>>,
        calls: AtomicUsize,
        call_times: parking_lot::Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedConnector {
        pub(crate) fn push_session(&self) -> RemoteEnd {
            let (session, remote) = session_pair();
            self.sessions.lock().push_back(Ok(session));
            remote
        }

        pub(crate) fn push_failure(&self) {
            self.sessions
                .lock()
                .push_back(Err(TransportError::ConnectionFailed("refused".into())));
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn call_times(&self) -> Vec<tokio::time::Instant> {
            self.call_times.lock().clone()
        }
    }

    #[async_trait]
    impl ChannelConnector for ScriptedConnector {
        fn endpoint(&self) -> String {
            "memory://scripted".to_string()
        }

        async fn connect(&self) -> Result<ChannelSession, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().push(tokio::time::Instant::now());
            self.sessions
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::ConnectionFailed("refused".into())))
        }
    }

    pub(crate) async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        state: ConnectionState,
    ) {
        tokio::time::timeout(std::time::Duration::from_secs(60), rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }
}
