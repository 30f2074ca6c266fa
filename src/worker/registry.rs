//! In-flight request tracking keyed by correlation ID.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value as Json;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{Error, Result};

/// Outcome delivered to a waiting caller.
pub type Outcome = Result<Json>;

/// One request waiting for its response.
#[derive(Debug)]
struct PendingRequest {
    tx: oneshot::Sender<Outcome>,
    created_at: Instant,
    timeout: Option<AbortHandle>,
}

/// Registry of in-flight requests.
///
/// Each registration arms its own timeout. The first settlement of an ID
/// wins; later settlements (a response racing its timeout, a duplicate
/// delivery) find no entry and are ignored.
#[derive(Debug, Clone)]
pub struct CorrelationRegistry {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
    timeout: Duration,
}

impl CorrelationRegistry {
    /// Create a registry whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a new request.
    ///
    /// Returns its correlation ID and the receiver the outcome is delivered
    /// on. Must be called from within a tokio runtime.
    pub fn register(&self) -> (String, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();

        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };

        // The timer blocks on the lock until the entry below is in place.
        let registry = self.clone();
        let timer_id = id.clone();
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if registry.settle(&timer_id, Err(Error::Timeout(timeout))) {
                tracing::debug!(message_id = %timer_id, "request timed out");
            }
        });

        pending.insert(
            id.clone(),
            PendingRequest {
                tx,
                created_at: Instant::now(),
                timeout: Some(timer.abort_handle()),
            },
        );

        (id, rx)
    }

    /// Deliver the outcome for `id`.
    ///
    /// Returns `false` if no request with that ID is pending.
    pub fn settle(&self, id: &str, outcome: Outcome) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            tracing::trace!(message_id = %id, "no pending request, ignoring");
            return false;
        };

        if let Some(timer) = &entry.timeout {
            timer.abort();
        }
        tracing::trace!(
            message_id = %id,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "settled request"
        );
        // The caller may have stopped waiting.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Reject every pending request with an error built by `make_error`.
    pub fn reject_all(&self, make_error: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            if let Some(timer) = &entry.timeout {
                timer.abort();
            }
            let _ = entry.tx.send(Err(make_error()));
        }
        count
    }

    /// Number of requests still waiting.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no requests are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        // Entries stay consistent even if a holder panicked.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
