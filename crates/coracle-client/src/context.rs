//! Shared state threaded through the runtime's moving parts

use crate::counters::ClientCounters;
use crate::identity::ClientIdentity;
use crate::transport::GatewayTransport;
use coracle_core::{ClientConfig, Serializer, TimeProvider};
use std::sync::Arc;
use std::time::Duration;

/// Immutable bundle handed to the outbound path and the pumps
///
/// Everything here is fixed at init; `response_timeout` is the effective
/// value after the debugger check.
pub(crate) struct ClientContext {
    pub config: Arc<ClientConfig>,
    pub identity: Arc<ClientIdentity>,
    pub transport: Arc<dyn GatewayTransport>,
    pub serializer: Arc<dyn Serializer>,
    pub time: Arc<dyn TimeProvider>,
    pub counters: ClientCounters,
    pub response_timeout: Duration,
}
