//! Camera Producer Loops
//!
//! One loop per simulated camera. Each tick submits the frame without
//! waiting for earlier submissions, the way a live capture loop keeps
//! sampling while analysis is in flight; the dispatcher's gate decides what
//! actually goes out.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use dispatch_core::{DispatchError, Dispatcher, InferenceRequest, InferenceResult, ServedBy};

/// What one camera submits
#[derive(Clone, Debug)]
pub struct CameraFeed {
    /// Source id sent with each request
    pub source_id: String,
    /// Model reference
    pub model_path: String,
    /// Confidence threshold
    pub threshold: f32,
    /// Encoded frame replayed on every tick
    pub frame: Arc<str>,
    /// Time between frames
    pub period: Duration,
}

/// Per-camera outcome tally
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CameraReport {
    pub source_id: String,
    pub submitted: u64,
    pub served_persistent: u64,
    pub served_fallback: u64,
    /// Routine failures: dropped by the gate, timed out, not connected
    pub skipped: u64,
    pub failed: u64,
    pub detections: u64,
}

impl CameraReport {
    fn record(&mut self, outcome: Result<InferenceResult, DispatchError>) {
        match outcome {
            Ok(result) => {
                match result.served_by {
                    ServedBy::Persistent => self.served_persistent += 1,
                    ServedBy::Fallback => self.served_fallback += 1,
                }
                self.detections += result.detections.len() as u64;
                debug!(
                    source = %self.source_id,
                    served_by = %result.served_by,
                    detections = result.detections.len(),
                    processing_ms = result.processing_time_ms,
                    "result"
                );
            }
            Err(e) if e.is_routine() => {
                self.skipped += 1;
                debug!(source = %self.source_id, error = %e, "frame skipped");
            }
            Err(e) => {
                self.failed += 1;
                warn!(source = %self.source_id, error = %e, "frame failed");
            }
        }
    }
}

/// Run one camera until `shutdown` flips to true, then wait for its
/// outstanding submissions.
pub async fn run_camera(
    dispatcher: Arc<Dispatcher>,
    feed: CameraFeed,
    mut shutdown: watch::Receiver<bool>,
) -> CameraReport {
    let mut report = CameraReport {
        source_id: feed.source_id.clone(),
        ..CameraReport::default()
    };
    let mut in_flight = JoinSet::new();
    let mut ticker = tokio::time::interval(feed.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        source = %feed.source_id,
        period_ms = feed.period.as_millis() as u64,
        "camera started"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let request = InferenceRequest::new(
                    feed.source_id.clone(),
                    feed.model_path.clone(),
                    feed.frame.as_ref(),
                )
                .with_threshold(feed.threshold);
                let dispatcher = Arc::clone(&dispatcher);
                in_flight.spawn(async move { dispatcher.submit(request).await });
                report.submitted += 1;
            }
            Some(joined) = in_flight.join_next() => match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => warn!(source = %feed.source_id, error = %e, "submission task failed"),
            },
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(outcome) => report.record(outcome),
            Err(e) => warn!(source = %feed.source_id, error = %e, "submission task failed"),
        }
    }

    info!(
        source = %report.source_id,
        submitted = report.submitted,
        persistent = report.served_persistent,
        fallback = report.served_fallback,
        skipped = report.skipped,
        failed = report.failed,
        "camera stopped"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(served_by: ServedBy) -> InferenceResult {
        InferenceResult {
            detections: Vec::new(),
            processing_time_ms: 1.0,
            served_by,
            processed_at: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_report_tallies_outcomes() {
        let mut report = CameraReport::default();
        report.record(Ok(result(ServedBy::Persistent)));
        report.record(Ok(result(ServedBy::Fallback)));
        report.record(Err(DispatchError::AdmissionDropped(
            dispatch_core::DropReason::RateLimited,
        )));
        report.record(Err(DispatchError::Remote("bad image".into())));

        assert_eq!(report.served_persistent, 1);
        assert_eq!(report.served_fallback, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
    }
}
