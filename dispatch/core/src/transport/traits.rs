//! Transport Traits
//!
//! The seam between the connection manager and the wire. A
//! [`ChannelConnector`] opens one persistent session and hands back a
//! text-frame sink and stream; the manager owns everything above that
//! (correlation, reconnection, state).

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use thiserror::Error;

use crate::error::DispatchError;

/// Errors from the persistent channel transport
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TransportError {
    /// Could not open the channel
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Opening the channel took too long
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// Peer closed the channel
    #[error("connection closed")]
    ConnectionClosed,

    /// Writing a frame failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading a frame failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        DispatchError::Transport(err.to_string())
    }
}

/// Outbound half of a session: accepts encoded text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a session: yields text frames until the channel ends
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open persistent session
pub struct ChannelSession {
    /// Frames to the remote service
    pub sink: FrameSink,
    /// Frames from the remote service
    pub stream: FrameStream,
}

impl ChannelSession {
    /// Bundle a sink and stream into a session
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession").finish_non_exhaustive()
    }
}

/// Opens persistent sessions to the remote service
///
/// Implementations handle the wire specifics (WebSocket handshake, TLS,
/// ping/pong). Each call to [`connect`](ChannelConnector::connect) is one
/// connection attempt; retry policy belongs to the connection manager.
#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    /// Human-readable endpoint, for logs
    fn endpoint(&self) -> String;

    /// Attempt to open a new session
    async fn connect(&self) -> Result<ChannelSession, TransportError>;
}
