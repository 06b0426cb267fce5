//! Submission Routing
//!
//! Decides, for each frame, whether it goes out at all and over which path.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |    Dispatcher    |  <-- Entry point for every submission
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! | BackpressureGate |  <-- Admit or drop, never queue
//! +--------+---------+
//!          |
//!    +-----+------+
//!    |            |
//!    v            v
//! +--------+ +---------+
//! |   WS   | |  HTTP   |  <-- Persistent channel / fallback transport
//! +--------+ +---------+
//! ```

pub mod dispatcher;
pub mod gate;
pub mod metrics;

pub use dispatcher::Dispatcher;
pub use gate::{Admission, AdmissionPermit, BackpressureGate, DispatchPath, GateConfig, GateStats};
pub use metrics::{DispatchMetrics, DispatchStats, LatencySnapshot};
