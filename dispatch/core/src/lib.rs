//! Dispatch Core - Real-Time Inference Dispatch Client
//!
//! Sends video frames to a remote detection service and hands the
//! detections back to the camera loop that produced them. Frames travel over
//! one persistent multiplexed WebSocket channel when it is healthy and over
//! stateless HTTP when it is not.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Camera loops                              │
//! │   ┌─────────┐  ┌─────────┐  ┌─────────┐        ┌─────────┐       │
//! │   │  cam-1  │  │  cam-2  │  │  cam-3  │  ...   │  cam-N  │       │
//! │   └────┬────┘  └────┬────┘  └────┬────┘        └────┬────┘       │
//! │        └────────────┴─────┬──────┴──────────────────┘            │
//! │                    submit(InferenceRequest)                      │
//! └───────────────────────────┼──────────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────────┐
//! │                     DISPATCH CORE                                │
//! │  ┌────────────────────────┴─────────────────────────────────┐    │
//! │  │                      Dispatcher                          │    │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │    │
//! │  │  │ Backpressure │  │  Capability  │  │    Dispatch    │  │    │
//! │  │  │     Gate     │  │    Probe     │  │    Metrics     │  │    │
//! │  │  └──────────────┘  └──────────────┘  └────────────────┘  │    │
//! │  └───────────┬───────────────────────────────┬──────────────┘    │
//! │  ┌───────────┴────────────┐      ┌───────────┴──────────────┐    │
//! │  │  Connection Manager    │      │   Fallback Transport     │    │
//! │  │  + Correlation Table   │      │   (HTTP POST)            │    │
//! │  │  (WebSocket)           │      │                          │    │
//! │  └────────────────────────┘      └──────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: the facade shared by every producer
//! - [`InferenceRequest`] / [`InferenceResult`]: what goes in and comes out
//! - [`DispatchError`]: every way a submission can fail
//! - [`ConnectionState`]: lifecycle of the persistent channel
//! - [`DispatcherConfig`]: configuration, loaded with [`load_config`]
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dispatch_core::{load_config, Dispatcher, InferenceRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let dispatcher = Arc::new(Dispatcher::new(config));
//!
//!     let request = InferenceRequest::new("cam-1", "models/yolov8n.pt", frame_base64);
//!     match dispatcher.submit(request).await {
//!         Ok(result) => println!("{} detections via {}", result.detections.len(), result.served_by),
//!         Err(e) if e.is_routine() => {} // skip this frame
//!         Err(e) => eprintln!("inference failed: {e}"),
//!     }
//!
//!     dispatcher.shutdown();
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod messages;
pub mod probe;
pub mod routing;
pub mod transport;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DispatcherConfig,
};
pub use error::{DispatchError, DropReason};
pub use messages::{
    BoundingBox, CorrelationId, Detection, FrameMessage, InferenceRequest, InferenceResult,
    ServedBy, ServerMessage,
};
pub use probe::{CapabilityCell, CapabilityProbe, SessionCapabilities};

// Routing exports
pub use routing::{
    Admission, AdmissionPermit, BackpressureGate, DispatchPath, DispatchStats, Dispatcher,
    GateConfig, GateStats,
};

// Transport exports
pub use transport::{
    ChannelConnector, ChannelSession, ConnectionConfig, ConnectionManager, ConnectionState,
    CorrelationTable, FallbackConfig, FallbackTransport, PendingCompletion, ProbeConfig,
    ReconnectPolicy, TransportError, WebSocketConnector,
};
