//! Local object registry and per-object pumps
//!
//! Remote grains call back into client-side objects through here. The
//! registry holds the relation only: object references are weak, so an
//! entry never extends its target's lifetime. Each object drains its own
//! FIFO queue with at most one pump task at a time.

use crate::context::ClientContext;
use crate::outbound;
use async_trait::async_trait;
use bytes::Bytes;
use coracle_core::{ClientError, GrainId, InvocationRequest, Message, Result};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// A client-side object exposed to remote grains
pub type ObserverTarget = Arc<dyn Any + Send + Sync>;

/// Dispatches a decoded invocation onto a concrete observer object
#[async_trait]
pub trait ObserverInvoker: Send + Sync {
    /// Invoke the method named by `invocation` on `target`
    ///
    /// `Ok(None)` denotes a fire-and-forget method with no result.
    async fn invoke(
        &self,
        target: ObserverTarget,
        invocation: &InvocationRequest,
    ) -> Result<Option<Bytes>>;
}

/// Reference bound to a registered local object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverRef {
    grain: GrainId,
}

impl ObserverRef {
    pub(crate) fn new(grain: GrainId) -> Self {
        Self { grain }
    }

    pub fn grain_id(&self) -> GrainId {
        self.grain
    }
}

impl std::fmt::Display for ObserverRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.grain)
    }
}

#[derive(Debug)]
struct ObjectQueue {
    queue: VecDeque<Message>,
    /// True iff a pump task is draining the queue right now
    running: bool,
}

/// One registered local object: weak target, invoker, serial queue
pub(crate) struct LocalObjectEntry {
    grain: GrainId,
    target: Weak<dyn Any + Send + Sync>,
    invoker: Arc<dyn ObserverInvoker>,
    inner: Mutex<ObjectQueue>,
}

impl LocalObjectEntry {
    /// Queue a message; spawn the pump if the queue was idle
    fn enqueue(
        self: &Arc<Self>,
        message: Message,
        registry: &Arc<LocalObjectRegistry>,
        ctx: &Arc<ClientContext>,
    ) {
        let spawn_pump = {
            let mut inner = self.inner.lock().expect("object queue poisoned");
            inner.queue.push_back(message);
            if inner.running {
                false
            } else {
                inner.running = true;
                true
            }
        };

        if spawn_pump {
            let entry = Arc::clone(self);
            let registry = Arc::clone(registry);
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                entry.drain(&registry, &ctx).await;
            });
        }
    }

    /// Drain the queue in FIFO order, one invocation at a time
    async fn drain(self: &Arc<Self>, registry: &Arc<LocalObjectRegistry>, ctx: &Arc<ClientContext>) {
        loop {
            let message = {
                let mut inner = self.inner.lock().expect("object queue poisoned");
                match inner.queue.pop_front() {
                    Some(message) => message,
                    None => {
                        inner.running = false;
                        return;
                    }
                }
            };

            if message.is_expired(ctx.time.now_ms()) {
                ctx.counters.dropped_expired.increment();
                debug!(correlation = %message.id, target = %self.grain,
                    "expired request dropped before invocation");
                continue;
            }

            let Some(target) = self.target.upgrade() else {
                self.evict_collected(registry, ctx, &message);
                return;
            };

            let Some(invocation) = message.invocation().cloned() else {
                warn!(correlation = %message.id, target = %self.grain,
                    "unsupported message body dropped");
                continue;
            };

            match self.invoker.invoke(target, &invocation).await {
                Ok(Some(payload)) => {
                    if !message.is_one_way() {
                        outbound::send_response(ctx, &message, payload);
                    }
                }
                // The invoker declared the method one-way.
                Ok(None) => {}
                Err(e) => outbound::send_exception(ctx, &message, &e),
            }
        }
    }

    /// The target was dropped: evict, unregister upstream, drop the message
    fn evict_collected(
        &self,
        registry: &LocalObjectRegistry,
        ctx: &Arc<ClientContext>,
        message: &Message,
    ) {
        warn!(target = %self.grain, correlation = %message.id,
            "local object dropped; evicting entry and unregistering observer");
        ctx.counters.targets_collected.increment();
        registry.remove(&self.grain);

        let pending = {
            let mut inner = self.inner.lock().expect("object queue poisoned");
            inner.running = false;
            inner.queue.drain(..).count()
        };
        if pending > 0 {
            warn!(target = %self.grain, count = pending,
                "pending messages dropped with collected object");
        }

        // Unregistration failures are logged, never propagated.
        let transport = Arc::clone(&ctx.transport);
        let grain = self.grain;
        tokio::spawn(async move {
            if let Err(e) = transport.unregister_observer(grain).await {
                warn!(target = %grain, error = %e, "observer unregistration failed");
            }
        });
    }
}

/// Map from client-addressable grain id to registered local object
#[derive(Default)]
pub(crate) struct LocalObjectRegistry {
    entries: Mutex<HashMap<GrainId, Arc<LocalObjectEntry>>>,
}

impl LocalObjectRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("object registry poisoned").len()
    }

    /// Install an entry for `grain`
    ///
    /// The caller has already registered the grain with the transport.
    pub(crate) fn insert(
        &self,
        grain: GrainId,
        target: &ObserverTarget,
        invoker: Arc<dyn ObserverInvoker>,
    ) -> Result<Arc<LocalObjectEntry>> {
        let entry = Arc::new(LocalObjectEntry {
            grain,
            target: Arc::downgrade(target),
            invoker,
            inner: Mutex::new(ObjectQueue {
                queue: VecDeque::new(),
                running: false,
            }),
        });

        let mut entries = self.entries.lock().expect("object registry poisoned");
        if entries.contains_key(&grain) {
            return Err(ClientError::ObserverAlreadyRegistered {
                grain: grain.to_string(),
            });
        }
        entries.insert(grain, Arc::clone(&entry));
        Ok(entry)
    }

    pub(crate) fn remove(&self, grain: &GrainId) -> Option<Arc<LocalObjectEntry>> {
        self.entries
            .lock()
            .expect("object registry poisoned")
            .remove(grain)
    }

    pub(crate) fn lookup(&self, grain: &GrainId) -> Option<Arc<LocalObjectEntry>> {
        self.entries
            .lock()
            .expect("object registry poisoned")
            .get(grain)
            .cloned()
    }
}

/// Route an inbound request or one-way to its local object
pub(crate) fn dispatch(
    registry: &Arc<LocalObjectRegistry>,
    ctx: &Arc<ClientContext>,
    message: Message,
) {
    let grain = message.target_grain;
    let Some(entry) = registry.lookup(&grain) else {
        ctx.counters.dropped_unknown_target.increment();
        warn!(target = %grain, correlation = %message.id,
            "request for unknown local object dropped");
        return;
    };
    entry.enqueue(message, registry, ctx);
}
