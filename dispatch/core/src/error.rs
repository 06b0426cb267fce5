//! Dispatch Error Surface
//!
//! Every failure a caller of [`Dispatcher::submit`](crate::Dispatcher::submit)
//! can observe. Callers are expected to skip the frame on routine errors and
//! surface the rest.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the backpressure gate refused a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// A submission was admitted less than the minimum interval ago
    RateLimited,
    /// The chosen path already has its maximum number of requests in flight
    TooManyPending,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::TooManyPending => write!(f, "too many pending"),
        }
    }
}

/// Failure of a single dispatched request
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DispatchError {
    /// The backpressure gate dropped the submission
    #[error("submission dropped: {0}")]
    AdmissionDropped(DropReason),

    /// The persistent channel is not connected
    #[error("persistent channel not connected")]
    NotConnected,

    /// No response arrived before the deadline
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// Socket or network failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote service reported a failure
    #[error("remote error: {0}")]
    Remote(String),

    /// The dispatcher was shut down while the request was pending
    #[error("request cancelled by shutdown")]
    Cancelled,
}

impl DispatchError {
    /// Whether this failure is expected under normal load.
    ///
    /// Routine failures mean "skip this frame"; everything else deserves
    /// the caller's attention.
    #[must_use]
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            Self::AdmissionDropped(_) | Self::ResponseTimeout(_) | Self::NotConnected
        )
    }
}
