//! Transport Layer
//!
//! Everything below the dispatcher: the persistent multiplexed channel and
//! its supervision, the correlation table that pairs replies with callers,
//! and the stateless HTTP fallback.
//!
//! # Structure
//!
//! - `traits` - [`ChannelConnector`] seam between the manager and the wire
//! - `websocket` - WebSocket implementation of the connector
//! - `connection` - [`ConnectionManager`] and its reconnect state machine
//! - `correlation` - [`CorrelationTable`] of pending completions
//! - `backoff` - [`ReconnectPolicy`]
//! - `fallback` - [`FallbackTransport`] over HTTP
//! - `config` - per-transport configuration sections

pub mod backoff;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod fallback;
pub mod traits;
pub mod websocket;

pub use backoff::ReconnectPolicy;
pub use config::{ConnectionConfig, FallbackConfig, ProbeConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use correlation::{CorrelationTable, PendingCompletion};
pub use fallback::FallbackTransport;
pub use traits::{ChannelConnector, ChannelSession, FrameSink, FrameStream, TransportError};
pub use websocket::WebSocketConnector;
