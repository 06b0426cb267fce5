//! Dispatch Metrics
//!
//! Counters for every way a submission can end, plus a round-trip latency
//! histogram per path. Updated only by the dispatcher; read through
//! [`DispatchMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::{DispatchError, DropReason};
use crate::messages::ServedBy;

// ============================================================================
// Primitives
// ============================================================================

/// A monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Bucketed latency histogram (milliseconds)
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    total: AtomicU64,
    sum_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(vec![
            5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
        ])
    }
}

impl LatencyHistogram {
    /// Histogram with the given upper bucket bounds
    #[must_use]
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            max_ms: AtomicU64::new(0),
        }
    }

    /// Record one observation
    pub fn record(&self, value_ms: f64) {
        if self.buckets.is_empty() {
            return;
        }
        let index = self
            .buckets
            .iter()
            .position(|&bound| value_ms <= bound)
            .unwrap_or(self.buckets.len() - 1);

        self.counts[index].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(value_ms as u64, Ordering::Relaxed);
        self.max_ms.fetch_max(value_ms as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy
    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let sum = self.sum_ms.load(Ordering::Relaxed);
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();

        let percentile = |p: f64| -> f64 {
            if total == 0 {
                return 0.0;
            }
            let target = ((total as f64 * p).ceil() as u64).max(1);
            let mut cumulative = 0u64;
            for (i, &count) in counts.iter().enumerate() {
                cumulative += count;
                if cumulative >= target {
                    return self.buckets[i];
                }
            }
            self.buckets.last().copied().unwrap_or(0.0)
        };

        LatencySnapshot {
            count: total,
            mean_ms: if total > 0 {
                sum as f64 / total as f64
            } else {
                0.0
            },
            p50_ms: percentile(0.5),
            p99_ms: percentile(0.99),
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

/// Summary of a [`LatencyHistogram`]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_ms: f64,
    /// Upper bound of the bucket holding the median
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub max_ms: u64,
}

// ============================================================================
// Dispatcher metrics
// ============================================================================

/// Outcome counters for the dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    submitted: Counter,
    served_persistent: Counter,
    served_fallback: Counter,
    rerouted: Counter,
    dropped_rate_limited: Counter,
    dropped_too_many_pending: Counter,
    timeouts: Counter,
    transport_errors: Counter,
    remote_errors: Counter,
    cancelled: Counter,
    downgrades: Counter,
    persistent_latency: LatencyHistogram,
    fallback_latency: LatencyHistogram,
}

impl DispatchMetrics {
    /// Fresh metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.inc();
    }

    pub(crate) fn record_served(&self, served_by: ServedBy, elapsed_ms: f64) {
        match served_by {
            ServedBy::Persistent => {
                self.served_persistent.inc();
                self.persistent_latency.record(elapsed_ms);
            }
            ServedBy::Fallback => {
                self.served_fallback.inc();
                self.fallback_latency.record(elapsed_ms);
            }
        }
    }

    pub(crate) fn record_rerouted(&self) {
        self.rerouted.inc();
    }

    pub(crate) fn record_downgrade(&self) {
        self.downgrades.inc();
    }

    pub(crate) fn record_failure(&self, error: &DispatchError) {
        match error {
            DispatchError::AdmissionDropped(DropReason::RateLimited) => {
                self.dropped_rate_limited.inc()
            }
            DispatchError::AdmissionDropped(DropReason::TooManyPending) => {
                self.dropped_too_many_pending.inc()
            }
            DispatchError::ResponseTimeout(_) => self.timeouts.inc(),
            DispatchError::Transport(_) | DispatchError::NotConnected => {
                self.transport_errors.inc()
            }
            DispatchError::Remote(_) => self.remote_errors.inc(),
            DispatchError::Cancelled => self.cancelled.inc(),
        }
    }

    /// Point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.get(),
            served_persistent: self.served_persistent.get(),
            served_fallback: self.served_fallback.get(),
            rerouted: self.rerouted.get(),
            dropped_rate_limited: self.dropped_rate_limited.get(),
            dropped_too_many_pending: self.dropped_too_many_pending.get(),
            timeouts: self.timeouts.get(),
            transport_errors: self.transport_errors.get(),
            remote_errors: self.remote_errors.get(),
            cancelled: self.cancelled.get(),
            downgrades: self.downgrades.get(),
            persistent_latency: self.persistent_latency.snapshot(),
            fallback_latency: self.fallback_latency.snapshot(),
        }
    }
}

/// Snapshot of [`DispatchMetrics`]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct DispatchStats {
    pub submitted: u64,
    pub served_persistent: u64,
    pub served_fallback: u64,
    /// Admitted on the persistent path, then served by fallback
    pub rerouted: u64,
    pub dropped_rate_limited: u64,
    pub dropped_too_many_pending: u64,
    pub timeouts: u64,
    pub transport_errors: u64,
    pub remote_errors: u64,
    pub cancelled: u64,
    /// Times the session was downgraded to fallback
    pub downgrades: u64,
    pub persistent_latency: LatencySnapshot,
    pub fallback_latency: LatencySnapshot,
}

impl DispatchStats {
    /// Submissions that ended with a result
    #[must_use]
    pub fn served(&self) -> u64 {
        self.served_persistent + self.served_fallback
    }

    /// Submissions the gate refused
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped_rate_limited + self.dropped_too_many_pending
    }
}
