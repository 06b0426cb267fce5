//! Correlation Table
//!
//! Maps in-flight correlation ids to the callers awaiting them. Every entry
//! carries its own deadline and is completed exactly once: by a matching
//! response, by an explicit rejection, or by its expiry timer. Whichever
//! path removes the entry from the table delivers the outcome; the others
//! find nothing and do nothing.
//!
//! Expired entries are removed actively by a per-entry timer task, so the
//! table never holds an entry past its deadline even if the caller has
//! stopped polling.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::DispatchError;
use crate::messages::{CorrelationId, ServerMessage};

type Outcome = Result<ServerMessage, DispatchError>;

struct PendingEntry {
    created_at: Instant,
    deadline: Instant,
    resolver: oneshot::Sender<Outcome>,
    expiry: Option<AbortHandle>,
}

impl PendingEntry {
    fn finish(self, id: &CorrelationId, outcome: Outcome) {
        if let Some(expiry) = self.expiry {
            expiry.abort();
        }
        if self.resolver.send(outcome).is_err() {
            tracing::debug!(correlation_id = %id, "caller gone before completion");
        }
    }
}

/// Caller-side handle for one pending request
///
/// Resolves to the correlated [`ServerMessage`], or to the failure that
/// ended the request (timeout, rejection, cancellation).
#[derive(Debug)]
pub struct PendingCompletion {
    id: CorrelationId,
    created_at: Instant,
    deadline: Instant,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCompletion {
    /// Correlation id of the request
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// When the request was registered
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the request expires
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for PendingCompletion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The table always sends before dropping a resolver, so a closed
        // channel only happens if the table itself was torn down.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DispatchError::Cancelled)))
    }
}

/// Table of pending completions, keyed by correlation id
#[derive(Clone)]
pub struct CorrelationTable {
    entries: Arc<Mutex<HashMap<CorrelationId, PendingEntry>>>,
    timeout: Duration,
}

impl CorrelationTable {
    /// Create a table whose entries expire after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Per-entry timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a new pending request and arm its expiry timer.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Transport`] if `id` is already in flight.
    pub fn register(&self, id: CorrelationId) -> Result<PendingCompletion, DispatchError> {
        let created_at = Instant::now();
        let deadline = created_at + self.timeout;
        let (resolver, rx) = oneshot::channel();

        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&id) {
                tracing::error!(correlation_id = %id, "correlation id collision");
                return Err(DispatchError::Transport(format!(
                    "correlation id {id} already in flight"
                )));
            }
            entries.insert(
                id.clone(),
                PendingEntry {
                    created_at,
                    deadline,
                    resolver,
                    expiry: None,
                },
            );
        }

        let table = self.clone();
        let expiring = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            table.expire(&expiring);
        });

        match self.entries.lock().get_mut(&id) {
            Some(entry) => entry.expiry = Some(timer.abort_handle()),
            None => timer.abort(),
        }

        Ok(PendingCompletion {
            id,
            created_at,
            deadline,
            rx,
        })
    }

    /// Deliver a response to its caller.
    ///
    /// Returns the message back if no entry matches `id` (already expired,
    /// never registered, or not a correlated reply).
    pub fn try_resolve(&self, id: &CorrelationId, message: ServerMessage) -> Option<ServerMessage> {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                tracing::trace!(
                    correlation_id = %id,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "response correlated"
                );
                entry.finish(id, Ok(message));
                None
            }
            None => Some(message),
        }
    }

    /// Fail a pending request. Returns false if it was no longer pending.
    pub fn reject(&self, id: &CorrelationId, error: DispatchError) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.finish(id, Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail the only pending request, if exactly one is pending.
    ///
    /// Used for service errors that carry no correlation id: with a single
    /// request in flight the error can only belong to it.
    pub fn reject_sole(&self, error: DispatchError) -> Option<CorrelationId> {
        let sole = {
            let mut entries = self.entries.lock();
            if entries.len() != 1 {
                return None;
            }
            let id = entries.keys().next().cloned()?;
            entries.remove(&id).map(|entry| (id, entry))
        };
        let (id, entry) = sole?;
        entry.finish(&id, Err(error));
        Some(id)
    }

    /// Expire a pending request whose deadline has passed.
    ///
    /// Returns false if it had already completed.
    pub fn expire(&self, id: &CorrelationId) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    correlation_id = %id,
                    overdue_ms = Instant::now().saturating_duration_since(entry.deadline).as_millis() as u64,
                    "response timeout"
                );
                // The timer is the one running this; nothing to abort.
                let PendingEntry { resolver, .. } = entry;
                let _ = resolver.send(Err(DispatchError::ResponseTimeout(self.timeout)));
                true
            }
            None => false,
        }
    }

    /// Fail every pending request. Returns how many were pending.
    pub fn reject_all(&self, error: &DispatchError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.finish(&id, Err(error.clone()));
        }
        count
    }

    /// Whether `id` is pending
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of pending requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
