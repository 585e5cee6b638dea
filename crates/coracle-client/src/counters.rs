//! The client's counter set
//!
//! Names follow the `client.` prefix convention; counters that feed the
//! statistics table are log+table, purely diagnostic ones stay log-only.

use coracle_stats::{Counter, CounterRegistry, StorageClass};
use std::sync::Arc;

/// Counters recorded by the runtime's hot paths
#[derive(Debug, Clone)]
pub struct ClientCounters {
    pub requests_sent: Arc<Counter>,
    pub requests_resent: Arc<Counter>,
    pub requests_timed_out: Arc<Counter>,
    pub messages_received: Arc<Counter>,
    pub responses_completed: Arc<Counter>,
    pub rejections_dropped: Arc<Counter>,
    pub dropped_unknown_correlation: Arc<Counter>,
    pub dropped_unknown_target: Arc<Counter>,
    pub dropped_expired: Arc<Counter>,
    pub targets_collected: Arc<Counter>,
}

impl ClientCounters {
    /// Register the full counter set with `registry`
    pub fn register(registry: &CounterRegistry) -> Self {
        use StorageClass::*;
        Self {
            requests_sent: registry.register("client.requests.sent", LogAndTable),
            requests_resent: registry.register("client.requests.resent", LogAndTable),
            requests_timed_out: registry.register("client.requests.timed_out", LogAndTable),
            messages_received: registry.register("client.messages.received", LogAndTable),
            responses_completed: registry.register("client.responses.completed", LogAndTable),
            rejections_dropped: registry.register("client.rejections.dropped", LogOnly),
            dropped_unknown_correlation: registry
                .register("client.dropped.unknown_correlation", LogOnly),
            dropped_unknown_target: registry.register("client.dropped.unknown_target", LogOnly),
            dropped_expired: registry.register("client.dropped.expired", LogAndTable),
            targets_collected: registry.register("client.observers.collected", LogOnly),
        }
    }
}
