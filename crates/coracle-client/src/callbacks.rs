//! Callback registry: correlation id → pending caller
//!
//! Exclusive owner of pending-request state between send and completion.
//! The map lock is never held across the completion sink or the retry
//! hook.

use crate::counters::ClientCounters;
use coracle_core::{
    ClientError, CorrelationId, Message, RejectionKind, ResponseBody, Result, TimeProvider,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives the outcome of one two-way request, exactly once
pub(crate) type CompletionSink = oneshot::Sender<Result<ResponseBody>>;

/// Invoked when the response timer fires; returns true to keep waiting
///
/// The hook owns the resend decision and the re-submission itself.
pub(crate) type RetryHook = Arc<dyn Fn(&mut Message) -> bool + Send + Sync>;

struct CallbackEntry {
    sink: CompletionSink,
    timer: JoinHandle<()>,
}

/// Pending-caller state for all in-flight two-way requests
pub(crate) struct CallbackRegistry {
    entries: Mutex<HashMap<CorrelationId, CallbackEntry>>,
    response_timeout: Duration,
    time: Arc<dyn TimeProvider>,
    counters: ClientCounters,
}

impl CallbackRegistry {
    pub(crate) fn new(
        response_timeout: Duration,
        time: Arc<dyn TimeProvider>,
        counters: ClientCounters,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            response_timeout,
            time,
            counters,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("callback registry poisoned").len()
    }

    fn contains(&self, id: CorrelationId) -> bool {
        self.entries
            .lock()
            .expect("callback registry poisoned")
            .contains_key(&id)
    }

    fn remove(&self, id: CorrelationId) -> Option<CallbackEntry> {
        self.entries
            .lock()
            .expect("callback registry poisoned")
            .remove(&id)
    }

    /// Register the pending caller for `message` and start its timer
    ///
    /// The timeout is fixed here; it is not re-read on resend. The timer
    /// re-arms for as long as the retry hook keeps the request alive.
    pub(crate) fn register(self: &Arc<Self>, message: Message, sink: CompletionSink, retry: RetryHook) {
        let id = message.id;
        let registry = Arc::clone(self);
        let timer = tokio::spawn(async move {
            let mut message = message;
            loop {
                registry.time.sleep(registry.response_timeout).await;
                if !registry.contains(id) {
                    break;
                }
                if !(retry)(&mut message) {
                    registry.expire(id);
                    break;
                }
            }
        });

        let prior = self
            .entries
            .lock()
            .expect("callback registry poisoned")
            .insert(id, CallbackEntry { sink, timer });
        if let Some(prior) = prior {
            // Correlation ids are unique by construction; a collision means
            // a caller reused a message.
            warn!(correlation = %id, "duplicate callback registration replaced");
            prior.timer.abort();
        }
    }

    /// Give up on `id` and surface a timeout to its caller
    fn expire(&self, id: CorrelationId) {
        let Some(entry) = self.remove(id) else {
            return;
        };
        self.counters.requests_timed_out.increment();
        debug!(correlation = %id, timeout_ms = self.response_timeout.as_millis() as u64,
            "request timed out");
        let _ = entry.sink.send(Err(ClientError::ResponseTimeout {
            correlation: id.to_string(),
            timeout_ms: self.response_timeout.as_millis() as u64,
        }));
    }

    /// Deliver an inbound response to its waiting caller
    pub(crate) fn complete(&self, response: Message) {
        let id = response.id;
        let Some(body) = response.response_body() else {
            warn!(correlation = %id, "response message without response body dropped");
            return;
        };

        // A duplicate-request rejection is an artifact of an idempotent
        // resend; the real response is still coming. Keep waiting.
        if matches!(body, ResponseBody::Rejection(RejectionKind::DuplicateRequest)) {
            self.counters.rejections_dropped.increment();
            debug!(correlation = %id, "duplicate-request rejection discarded");
            return;
        }

        let Some(entry) = self.remove(id) else {
            self.counters.dropped_unknown_correlation.increment();
            warn!(correlation = %id, "response for unknown correlation id dropped");
            return;
        };

        entry.timer.abort();
        self.counters.responses_completed.increment();
        let _ = entry.sink.send(Ok(body.clone()));
    }

    /// Drop the pending caller for `id`, if any
    pub(crate) fn unregister(&self, id: CorrelationId) {
        if let Some(entry) = self.remove(id) {
            entry.timer.abort();
        }
    }
}
