//! Coracle Client
//!
//! The client-side runtime of the coracle grain system: everything a
//! non-hosting process needs to invoke methods on remote grains, expose
//! local callback objects, and publish client telemetry.
//!
//! # Overview
//!
//! - Outbound requests are stamped with the client's identity, given an
//!   expiration deadline, registered in the callback registry, and handed
//!   to the gateway transport. Timeouts drive a bounded resend policy.
//! - A single inbound pump consumes application messages, completing
//!   callbacks for responses and enqueueing requests onto per-object FIFO
//!   queues for locally registered observers.
//! - The lifecycle manager enforces one live runtime per process and makes
//!   reset tolerant: each teardown step is guarded independently.
//!
//! The transport, gateway list provider, and statistics publisher are
//! consumed behind narrow traits; [`MemoryGateway`] is the in-process
//! reference transport used throughout the tests.

mod callbacks;
mod context;
mod counters;
mod identity;
mod local_objects;
mod memory;
mod outbound;
mod providers;
mod pump;
mod runtime;
mod transport;

pub use counters::ClientCounters;
pub use identity::ClientIdentity;
pub use local_objects::{ObserverInvoker, ObserverRef, ObserverTarget};
pub use memory::MemoryGateway;
pub use outbound::{GrainRef, InvokeOptions};
pub use providers::{ProviderRegistry, PROVIDER_KIND_STATISTICS};
pub use runtime::{ClientRuntime, ClientRuntimeBuilder};
pub use transport::{
    GatewayListProvider, GatewayTransport, InterfaceMap, StaticGatewayListProvider,
    StreamSubscriberTable,
};

pub use coracle_core::{
    ActivationId, ClientConfig, ClientError, CorrelationId, Direction, GrainId, GrainKind,
    InvocationRequest, Message, MessageBody, MessageCategory, RejectionKind, ResponseBody, Result,
    SiloAddress,
};
