//! Backpressure Gate
//!
//! Non-blocking admission control for frame submissions. The gate bounds
//! in-flight requests separately for the persistent and fallback paths and
//! enforces a minimum interval between accepted submissions.
//!
//! # Design
//!
//! Frames are produced faster than they can be analyzed. Excess work is
//! dropped at admission rather than queued:
//!
//! - Admission never waits; it either admits or drops immediately
//! - Dropping the newest frame keeps end-to-end latency bounded
//! - No buffered images accumulate under load
//!
//! Counters are only ever touched through [`BackpressureGate::admit`],
//! [`BackpressureGate::release`] and the [`AdmissionPermit`] guard, whose
//! `Drop` performs the release.
//!
//! # Usage
//!
//! ```
//! use dispatch_core::routing::gate::{Admission, BackpressureGate, DispatchPath, GateConfig};
//!
//! let gate = BackpressureGate::new(GateConfig::default());
//!
//! match gate.admit(DispatchPath::Persistent) {
//!     Admission::Admitted(permit) => {
//!         // send the request; the permit releases the slot when dropped
//!         drop(permit);
//!     }
//!     Admission::Dropped(reason) => println!("skipping frame: {reason}"),
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::DropReason;

// =============================================================================
// Configuration
// =============================================================================

/// Transport path a submission is routed through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPath {
    /// Multiplexed persistent channel
    Persistent,
    /// Stateless request/response transport
    Fallback,
}

impl fmt::Display for DispatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistent => write!(f, "persistent"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Configuration for the backpressure gate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum time between accepted submissions on any path (milliseconds)
    pub min_interval_ms: u64,

    /// Maximum in-flight requests on the persistent channel
    pub persistent_cap: usize,

    /// Maximum in-flight requests on the fallback transport
    pub fallback_cap: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 50,
            persistent_cap: 3,
            fallback_cap: 2,
        }
    }
}

impl GateConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum interval between accepted submissions
    #[must_use]
    pub fn with_min_interval_ms(mut self, interval: u64) -> Self {
        self.min_interval_ms = interval;
        self
    }

    /// Set the persistent-path concurrency cap
    #[must_use]
    pub fn with_persistent_cap(mut self, cap: usize) -> Self {
        self.persistent_cap = cap;
        self
    }

    /// Set the fallback-path concurrency cap
    #[must_use]
    pub fn with_fallback_cap(mut self, cap: usize) -> Self {
        self.fallback_cap = cap;
        self
    }

    /// Minimum interval as a [`Duration`]
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Cap for a path
    #[must_use]
    pub fn cap_for(&self, path: DispatchPath) -> usize {
        match path {
            DispatchPath::Persistent => self.persistent_cap,
            DispatchPath::Fallback => self.fallback_cap,
        }
    }
}

// =============================================================================
// Admission
// =============================================================================

/// Outcome of an admission check
#[derive(Debug)]
pub enum Admission {
    /// The submission may proceed; the permit holds its in-flight slot
    Admitted(AdmissionPermit),

    /// The submission was dropped
    Dropped(DropReason),
}

impl Admission {
    /// Check if the submission was admitted
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    /// Get the drop reason if any
    #[must_use]
    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Self::Dropped(reason) => Some(*reason),
            Self::Admitted(_) => None,
        }
    }
}

/// An admitted submission's in-flight slot (RAII guard)
///
/// Dropping the permit releases the slot exactly once.
pub struct AdmissionPermit {
    gate: Arc<GateInner>,
    path: DispatchPath,
}

impl AdmissionPermit {
    /// Path this permit holds a slot on
    #[must_use]
    pub fn path(&self) -> DispatchPath {
        self.path
    }

    /// Move this submission's slot to another path.
    ///
    /// Only the target path's cap is checked: a reroute is the same
    /// submission, not a new one, so the interval rule does not apply.
    ///
    /// # Errors
    ///
    /// Returns [`DropReason::TooManyPending`] if the target path is full; the
    /// original slot is released in that case.
    pub fn reroute(mut self, to: DispatchPath) -> Result<Self, DropReason> {
        if self.path == to {
            return Ok(self);
        }
        if self.gate.transfer(self.path, to) {
            self.path = to;
            Ok(self)
        } else {
            Err(DropReason::TooManyPending)
        }
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release(self.path);
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Snapshot of gate counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// Requests currently in flight on the persistent channel
    pub persistent_in_flight: usize,
    /// Requests currently in flight on the fallback transport
    pub fallback_in_flight: usize,
    /// Total admitted submissions
    pub admitted: u64,
    /// Submissions dropped by the interval rule
    pub dropped_rate_limited: u64,
    /// Submissions dropped by a concurrency cap
    pub dropped_too_many_pending: u64,
}

#[derive(Debug, Default)]
struct Counters {
    last_admitted: Option<Instant>,
    persistent: usize,
    fallback: usize,
}

impl Counters {
    fn slot(&mut self, path: DispatchPath) -> &mut usize {
        match path {
            DispatchPath::Persistent => &mut self.persistent,
            DispatchPath::Fallback => &mut self.fallback,
        }
    }
}

#[derive(Debug)]
struct GateInner {
    config: GateConfig,
    counters: Mutex<Counters>,
    admitted: AtomicU64,
    dropped_rate_limited: AtomicU64,
    dropped_too_many_pending: AtomicU64,
}

impl GateInner {
    fn release(&self, path: DispatchPath) {
        let mut counters = self.counters.lock();
        let slot = counters.slot(path);
        if *slot == 0 {
            tracing::warn!(%path, "release without matching admission");
        }
        *slot = slot.saturating_sub(1);
    }

    fn transfer(&self, from: DispatchPath, to: DispatchPath) -> bool {
        let mut counters = self.counters.lock();
        if *counters.slot(to) >= self.config.cap_for(to) {
            self.dropped_too_many_pending
                .fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let source = counters.slot(from);
        *source = source.saturating_sub(1);
        *counters.slot(to) += 1;
        true
    }
}

/// Admission control shared by every caller of one dispatcher
#[derive(Clone, Debug)]
pub struct BackpressureGate {
    inner: Arc<GateInner>,
}

impl BackpressureGate {
    /// Create a new gate
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            inner: Arc::new(GateInner {
                config,
                counters: Mutex::new(Counters::default()),
                admitted: AtomicU64::new(0),
                dropped_rate_limited: AtomicU64::new(0),
                dropped_too_many_pending: AtomicU64::new(0),
            }),
        }
    }

    /// Gate configuration
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.inner.config
    }

    /// Decide whether a submission on `path` may proceed.
    ///
    /// Rules, in order:
    /// 1. Less than the minimum interval since the last admission: drop (rate limited)
    /// 2. Path already at its cap: drop (too many pending)
    /// 3. Otherwise take a slot and record the admission time
    pub fn admit(&self, path: DispatchPath) -> Admission {
        let now = Instant::now();
        let mut counters = self.inner.counters.lock();

        if let Some(last) = counters.last_admitted {
            if now.duration_since(last) < self.inner.config.min_interval() {
                self.inner
                    .dropped_rate_limited
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%path, "submission dropped: rate limited");
                return Admission::Dropped(DropReason::RateLimited);
            }
        }

        let cap = self.inner.config.cap_for(path);
        let slot = counters.slot(path);
        if *slot >= cap {
            self.inner
                .dropped_too_many_pending
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%path, cap, "submission dropped: too many pending");
            return Admission::Dropped(DropReason::TooManyPending);
        }

        *slot += 1;
        counters.last_admitted = Some(now);
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);

        Admission::Admitted(AdmissionPermit {
            gate: Arc::clone(&self.inner),
            path,
        })
    }

    /// Release one in-flight slot on `path` (clamped at zero).
    ///
    /// [`AdmissionPermit`] calls this on drop; call it directly only for
    /// slots not held by a permit.
    pub fn release(&self, path: DispatchPath) {
        self.inner.release(path);
    }

    /// Requests currently in flight on `path`
    #[must_use]
    pub fn in_flight(&self, path: DispatchPath) -> usize {
        let mut counters = self.inner.counters.lock();
        *counters.slot(path)
    }

    /// Snapshot of gate counters
    #[must_use]
    pub fn stats(&self) -> GateStats {
        let counters = self.inner.counters.lock();
        GateStats {
            persistent_in_flight: counters.persistent,
            fallback_in_flight: counters.fallback,
            admitted: self.inner.admitted.load(Ordering::Relaxed),
            dropped_rate_limited: self.inner.dropped_rate_limited.load(Ordering::Relaxed),
            dropped_too_many_pending: self
                .inner
                .dropped_too_many_pending
                .load(Ordering::Relaxed),
        }
    }
}
