//! Dispatch Messages
//!
//! Caller-facing request/result types and the JSON wire messages exchanged
//! with the remote detection service.
//!
//! # Wire Format
//!
//! Both transports carry the same logical fields. The persistent channel
//! additionally uses `clientId` to correlate replies with requests:
//!
//! ```text
//! client -> server  { clientId?, modelPath, threshold, imageData, quantized? }
//! server -> client  { clientId?, status?, detections?, inferenceTime?,
//!                     processedAt?, timestamp?, error?, message? }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

// ============================================================================
// Correlation
// ============================================================================

/// Identifier echoed by the remote service so a reply finds its caller
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Id used before the server has assigned a client id to the connection
    #[must_use]
    pub fn provisional() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Id derived from the server-assigned client id and a per-connection sequence
    #[must_use]
    pub fn scoped(client_id: &str, seq: u64) -> Self {
        Self(format!("{client_id}:{seq}"))
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Caller-facing types
// ============================================================================

/// A frame-analysis request submitted by one camera loop
#[derive(Clone, Debug)]
pub struct InferenceRequest {
    /// Camera or session the frame came from
    pub source_id: String,
    /// Model reference understood by the remote service
    pub model_path: String,
    /// Minimum detection confidence (0.0-1.0)
    pub threshold: f32,
    /// Encoded image (base64 or data URL)
    pub image_data: String,
    /// Caller override for the optimized inference path.
    ///
    /// `None` lets the dispatcher decide from the session capabilities.
    pub optimized: Option<bool>,
}

impl InferenceRequest {
    /// Create a request with the default threshold (0.5)
    pub fn new(
        source_id: impl Into<String>,
        model_path: impl Into<String>,
        image_data: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            model_path: model_path.into(),
            threshold: 0.5,
            image_data: image_data.into(),
            optimized: None,
        }
    }

    /// Set the confidence threshold
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Force the optimized path on or off
    #[must_use]
    pub fn with_optimized(mut self, optimized: bool) -> Self {
        self.optimized = Some(optimized);
        self
    }
}

/// Which transport produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServedBy {
    /// The multiplexed persistent channel
    Persistent,
    /// The stateless request/response transport
    Fallback,
}

impl fmt::Display for ServedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistent => write!(f, "persistent"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Bounding box in image pixel coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
}

/// One detected object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detection id assigned by the service (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Class label
    pub label: String,
    /// Confidence score (0.0-1.0)
    pub confidence: f32,
    /// Location in the frame
    pub bbox: BoundingBox,
}

/// Successful outcome of a dispatched request
///
/// Results from both transports carry identical fields; only `served_by`
/// tells them apart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    /// Objects found in the frame
    pub detections: Vec<Detection>,
    /// Processing time reported by the service
    pub processing_time_ms: f64,
    /// Transport that carried the exchange
    pub served_by: ServedBy,
    /// Where the service ran inference ("edge", "server", ...)
    pub processed_at: Option<String>,
    /// When the result was received
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Wire messages
// ============================================================================

/// Outbound frame-analysis message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMessage {
    /// Correlation id (persistent channel only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Model reference
    pub model_path: String,
    /// Minimum detection confidence
    pub threshold: f32,
    /// Encoded image
    pub image_data: String,
    /// Ask the service for its optimized numeric path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantized: Option<bool>,
}

impl FrameMessage {
    /// Build the wire message for a request with the resolved optimization hint
    #[must_use]
    pub fn from_request(request: &InferenceRequest, quantized: Option<bool>) -> Self {
        Self {
            client_id: None,
            model_path: request.model_path.clone(),
            threshold: request.threshold,
            image_data: request.image_data.clone(),
            quantized,
        }
    }

    /// Copy of this message stamped with a correlation id
    #[must_use]
    pub fn correlated(&self, id: &CorrelationId) -> Self {
        Self {
            client_id: Some(id.0.clone()),
            ..self.clone()
        }
    }
}

/// Inbound message from the detection service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ServerMessage {
    #[serde(default)]
    pub client_id: Option<String>,
    /// "connected" on the greeting, "success"/"error" on the fallback path
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub detections: Option<Vec<Detection>>,
    #[serde(default)]
    pub inference_time: Option<f64>,
    #[serde(default)]
    pub processed_at: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerMessage {
    /// Whether this is the connection greeting
    #[must_use]
    pub fn is_greeting(&self) -> bool {
        self.status.as_deref() == Some("connected")
    }

    /// Failure reported by the service, if any
    #[must_use]
    pub fn remote_failure(&self) -> Option<String> {
        if let Some(ref error) = self.error {
            return Some(error.clone());
        }
        if self.status.as_deref() == Some("error") {
            return Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| "unspecified remote failure".to_string()),
            );
        }
        None
    }

    /// Normalize into the caller-facing result
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Remote`] if the service reported a failure.
    pub fn into_result(self, served_by: ServedBy) -> Result<InferenceResult, DispatchError> {
        if let Some(failure) = self.remote_failure() {
            return Err(DispatchError::Remote(failure));
        }

        Ok(InferenceResult {
            detections: self.detections.unwrap_or_default(),
            processing_time_ms: self.inference_time.unwrap_or(0.0),
            served_by,
            processed_at: self.processed_at,
            timestamp: Utc::now(),
        })
    }
}
