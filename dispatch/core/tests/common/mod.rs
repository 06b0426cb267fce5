//! Mock detection service for integration tests
//!
//! Speaks the same protocol as the real service: a WebSocket endpoint that
//! greets each connection with a client id and echoes `clientId` on every
//! reply, plus the HTTP inference, capabilities and health routes.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use dispatch_core::DispatcherConfig;

/// How the WebSocket endpoint treats inbound frames
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WsMode {
    /// Reply to every frame
    Echo = 0,
    /// Read frames, never reply
    Silent = 1,
    /// Close the connection on the next frame without replying, then echo
    CloseOnNextFrame = 2,
}

#[derive(Default)]
pub struct MockInner {
    pub ws_connections: AtomicUsize,
    pub ws_frames: AtomicUsize,
    pub http_requests: AtomicUsize,
    pub optimized_path_available: AtomicBool,
    pub http_fail: AtomicBool,
    /// Hold HTTP inference responses far past any test's patience
    pub http_stall: AtomicBool,
    mode: AtomicU8,
    pub last_quantized: Mutex<Option<Option<bool>>>,
}

/// Handle to a running mock service
#[derive(Clone)]
pub struct MockService {
    pub addr: SocketAddr,
    pub inner: Arc<MockInner>,
}

impl MockService {
    pub async fn start() -> Self {
        let inner = Arc::new(MockInner::default());
        let app = Router::new()
            .route("/ws/inference", get(ws_handler))
            .route("/api/inference", post(http_inference))
            .route("/api/capabilities", get(capabilities))
            .route("/health", get(|| async { Json(json!({"status": "healthy"})) }))
            .with_state(inner.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, inner }
    }

    pub fn set_mode(&self, mode: WsMode) {
        self.inner.mode.store(mode as u8, Ordering::SeqCst);
    }

    fn mode(inner: &MockInner) -> WsMode {
        match inner.mode.load(Ordering::SeqCst) {
            1 => WsMode::Silent,
            2 => WsMode::CloseOnNextFrame,
            _ => WsMode::Echo,
        }
    }

    /// Dispatcher configuration pointed at this service with fast timings
    pub fn config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig::for_host(&self.addr.to_string());
        config.probe.enabled = false;
        config.gate.min_interval_ms = 0;
        config.connection.response_timeout_ms = 1000;
        config.connection.reconnect_base_delay_ms = 50;
        config.connection.reconnect_max_delay_ms = 200;
        config.fallback.timeout_ms = 2000;
        config
    }

    pub fn ws_connections(&self) -> usize {
        self.inner.ws_connections.load(Ordering::SeqCst)
    }

    pub fn http_requests(&self) -> usize {
        self.inner.http_requests.load(Ordering::SeqCst)
    }

    pub fn last_quantized(&self) -> Option<Option<bool>> {
        *self.inner.last_quantized.lock()
    }
}

/// Address nothing listens on
pub async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Detections every reply carries, whichever transport
pub fn inference_body() -> Value {
    json!({
        "detections": [
            {"id": "det1", "label": "Person", "confidence": 0.95,
             "bbox": {"x1": 100, "y1": 200, "x2": 300, "y2": 400, "width": 200, "height": 200}},
            {"id": "det2", "label": "Car", "confidence": 0.87,
             "bbox": {"x1": 400, "y1": 300, "x2": 600, "y2": 450, "width": 200, "height": 150}}
        ],
        "inferenceTime": 42.0,
        "processedAt": "server",
        "timestamp": "2024-05-01T10:00:00"
    })
}

fn record_frame(inner: &MockInner, frame: &Value) {
    *inner.last_quantized.lock() = Some(frame.get("quantized").and_then(Value::as_bool));
}

async fn ws_handler(ws: WebSocketUpgrade, State(inner): State<Arc<MockInner>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, inner))
}

async fn handle_socket(mut socket: WebSocket, inner: Arc<MockInner>) {
    let n = inner.ws_connections.fetch_add(1, Ordering::SeqCst) + 1;
    let client_id = format!("client-{n}");
    let greeting = json!({"status": "connected", "clientId": client_id});
    if socket.send(Message::Text(greeting.to_string())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        inner.ws_frames.fetch_add(1, Ordering::SeqCst);

        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            let error = json!({"error": "invalid JSON", "timestamp": "now"});
            let _ = socket.send(Message::Text(error.to_string())).await;
            continue;
        };
        record_frame(&inner, &frame);

        match MockService::mode(&inner) {
            WsMode::Silent => continue,
            WsMode::CloseOnNextFrame => {
                inner.mode.store(WsMode::Echo as u8, Ordering::SeqCst);
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            WsMode::Echo => {}
        }

        let mut reply = inference_body();
        reply["clientId"] = frame.get("clientId").cloned().unwrap_or(Value::Null);
        if socket.send(Message::Text(reply.to_string())).await.is_err() {
            return;
        }
    }
}

async fn http_inference(
    State(inner): State<Arc<MockInner>>,
    Json(frame): Json<Value>,
) -> (StatusCode, Json<Value>) {
    inner.http_requests.fetch_add(1, Ordering::SeqCst);
    record_frame(&inner, &frame);

    if inner.http_fail.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": "Inference failed: model not loaded"})),
        );
    }

    // Model work takes a moment
    let work = if inner.http_stall.load(Ordering::SeqCst) {
        Duration::from_secs(60)
    } else {
        Duration::from_millis(20)
    };
    tokio::time::sleep(work).await;

    let mut body = inference_body();
    body["status"] = json!("success");
    (StatusCode::OK, Json(body))
}

async fn capabilities(State(inner): State<Arc<MockInner>>) -> Json<Value> {
    Json(json!({
        "optimizedPathAvailable": inner.optimized_path_available.load(Ordering::SeqCst)
    }))
}
