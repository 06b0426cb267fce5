//! WebSocket Connector
//!
//! [`ChannelConnector`] over `tokio-tungstenite`. Text frames carry the JSON
//! wire messages; control frames are handled by tungstenite and never reach
//! the connection manager.

use std::time::Duration;

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use super::traits::{ChannelConnector, ChannelSession, TransportError};

/// Connects to the detection service's WebSocket endpoint
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `url` (ws:// or wss://)
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Map an inbound WebSocket message to a text frame.
///
/// Returns `None` for frames the manager should not see.
fn inbound_text(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => Some(Ok(text)),
            Err(_) => {
                tracing::warn!("dropping non-UTF-8 binary frame");
                None
            }
        },
        Ok(Message::Close(frame)) => {
            tracing::debug!(?frame, "close frame received");
            Some(Err(TransportError::ConnectionClosed))
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::ReceiveFailed(e.to_string()))),
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<ChannelSession, TransportError> {
        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to connect to {}: {}", self.url, e))
            })?;

        tracing::debug!(url = %self.url, "WebSocket handshake complete");

        let (ws_sink, ws_source) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));

        let stream = ws_source.filter_map(|message| future::ready(inbound_text(message)));

        Ok(ChannelSession::new(Box::pin(sink), Box::pin(stream)))
    }
}
