//! Fallback Transport
//!
//! Stateless request/response over HTTP, used whenever the persistent
//! channel is unavailable or the session has been downgraded. One POST per
//! frame; no correlation id and no internal retry.

use std::time::Duration;

use super::config::FallbackConfig;
use crate::error::DispatchError;
use crate::messages::{FrameMessage, ServerMessage};

/// HTTP client for the detection service's inference endpoint
#[derive(Clone, Debug)]
pub struct FallbackTransport {
    config: FallbackConfig,
    http_client: reqwest::Client,
}

impl FallbackTransport {
    /// Create a transport from configuration
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "HTTP client builder failed, using defaults");
                reqwest::Client::new()
            });

        Self {
            config,
            http_client,
        }
    }

    /// Inference endpoint
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Configured per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// POST one frame and wait for the service's answer.
    ///
    /// The frame is sent without a `clientId`. A `status: "error"` body comes
    /// back as a normal [`ServerMessage`]; [`ServerMessage::into_result`]
    /// turns it into [`DispatchError::Remote`].
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ResponseTimeout`] if `timeout` elapses
    /// - [`DispatchError::Remote`] for a non-2xx response with an error body
    /// - [`DispatchError::Transport`] for connect/IO failures and bare non-2xx
    pub async fn send(
        &self,
        frame: &FrameMessage,
        timeout: Duration,
    ) -> Result<ServerMessage, DispatchError> {
        let body = FrameMessage {
            client_id: None,
            ..frame.clone()
        };

        let response = self
            .http_client
            .post(&self.config.url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(e, timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_request_error(e, timeout))?;

        if !status.is_success() {
            let failure = serde_json::from_str::<ServerMessage>(&text)
                .ok()
                .and_then(|m| m.remote_failure().or(m.message));
            tracing::warn!(status = %status, url = %self.config.url, "fallback request failed");
            return Err(match failure {
                Some(message) => DispatchError::Remote(message),
                None => DispatchError::Transport(format!("HTTP {}", status.as_u16())),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| DispatchError::Transport(format!("invalid response body: {e}")))
    }

    /// Whether the service health endpoint answers with 2xx
    pub async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(&self.config.health_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, url = %self.config.health_url, "health check failed");
                false
            }
        }
    }
}

fn map_request_error(error: reqwest::Error, timeout: Duration) -> DispatchError {
    if error.is_timeout() {
        DispatchError::ResponseTimeout(timeout)
    } else {
        DispatchError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::messages::{InferenceRequest, ServedBy};

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn transport(addr: SocketAddr) -> FallbackTransport {
        FallbackTransport::new(FallbackConfig {
            url: format!("http://{addr}/api/inference"),
            health_url: format!("http://{addr}/health"),
            timeout_ms: 30_000,
        })
    }

    fn frame() -> FrameMessage {
        let request = InferenceRequest::new("cam-1", "models/yolov8n.pt", "aGk=");
        FrameMessage::from_request(&request, Some(true))
    }

    #[tokio::test]
    async fn test_success_body_is_returned() {
        let app = Router::new().route(
            "/api/inference",
            post(|Json(body): Json<Value>| async move {
                assert!(body.get("clientId").is_none());
                assert_eq!(body["quantized"], true);
                Json(json!({
                    "status": "success",
                    "detections": [{"id": "d1", "label": "Car", "confidence": 0.8,
                                    "bbox": {"x1": 1, "y1": 2, "x2": 3, "y2": 4}}],
                    "inferenceTime": 12.0,
                    "processedAt": "server"
                }))
            }),
        );
        let addr = serve(app).await;

        let message = transport(addr)
            .send(&frame(), Duration::from_secs(5))
            .await
            .unwrap();
        let result = message.into_result(ServedBy::Fallback).unwrap();

        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].label, "Car");
        assert_eq!(result.processing_time_ms, 12.0);
    }

    #[tokio::test]
    async fn test_error_status_with_message_is_remote() {
        let app = Router::new().route(
            "/api/inference",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"status": "error", "message": "Inference failed: bad image"})),
                )
            }),
        );
        let addr = serve(app).await;

        let outcome = transport(addr).send(&frame(), Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            Err(DispatchError::Remote("Inference failed: bad image".into()))
        );
    }

    #[tokio::test]
    async fn test_bare_error_status_is_transport() {
        let app = Router::new().route(
            "/api/inference",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let addr = serve(app).await;

        let outcome = transport(addr).send(&frame(), Duration::from_secs(5)).await;
        assert_eq!(outcome, Err(DispatchError::Transport("HTTP 502".into())));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let app = Router::new().route(
            "/api/inference",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"status": "success"}))
            }),
        );
        let addr = serve(app).await;

        let timeout = Duration::from_millis(100);
        let outcome = transport(addr).send(&frame(), timeout).await;
        assert_eq!(outcome, Err(DispatchError::ResponseTimeout(timeout)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = transport(addr).send(&frame(), Duration::from_secs(2)).await;
        assert!(matches!(outcome, Err(DispatchError::Transport(_))));
        assert!(!transport(addr).health_check().await);
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = Router::new().route("/health", get(|| async { Json(json!({"status": "healthy"})) }));
        let addr = serve(app).await;

        assert!(transport(addr).health_check().await);
    }
}
