//! Inbound message pump
//!
//! Single long-running consumer of application-category messages. Routes
//! responses to the callback registry and requests to the local object
//! registry; anything unexpected costs one iteration, never the pump.

use crate::callbacks::CallbackRegistry;
use crate::context::ClientContext;
use crate::local_objects::{self, LocalObjectRegistry};
use coracle_core::{Direction, MessageCategory};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) struct InboundPump;

impl InboundPump {
    /// Spawn the pump; cancel the token to stop it
    ///
    /// The loop also ends when the transport closes its queue.
    pub(crate) fn spawn(
        ctx: Arc<ClientContext>,
        callbacks: Arc<CallbackRegistry>,
        objects: Arc<LocalObjectRegistry>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("inbound pump started");
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    maybe = ctx.transport.wait_message(MessageCategory::Application) => {
                        match maybe {
                            Some(message) => message,
                            None => break,
                        }
                    }
                };

                ctx.counters.messages_received.increment();
                debug!(correlation = %message.id, direction = ?message.direction,
                    "inbound message");

                match message.direction {
                    Direction::Response => callbacks.complete(message),
                    Direction::Request | Direction::OneWay => {
                        local_objects::dispatch(&objects, &ctx, message)
                    }
                }
            }
            info!("inbound pump stopped");
        })
    }
}
