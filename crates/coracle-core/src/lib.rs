//! Coracle Core
//!
//! Core types, message model, and configuration for the coracle grain
//! client: the runtime a non-hosting process uses to invoke methods on
//! remote grains and expose local callback objects.
//!
//! This crate holds everything shared between the client runtime and its
//! collaborators: identifiers, the wire message model, configuration,
//! the serializer seam, the time abstraction, and telemetry setup.

pub mod config;
pub mod constants;
pub mod error;
pub mod id;
pub mod io;
pub mod message;
pub mod serializer;
pub mod telemetry;

pub use config::{AddressFamily, ClientConfig, ProviderConfig};
pub use constants::*;
pub use error::{ClientError, Result};
pub use id::{ActivationId, CorrelationId, GrainId, GrainKind, SiloAddress};
pub use io::{debugger_attached, TimeProvider, WallClockTime};
pub use message::{
    Direction, InvocationRequest, Message, MessageBody, MessageCategory, RejectionKind,
    ResponseBody,
};
pub use serializer::{serializer_for, RawSerializer, Serializer, StandardSerializer};
pub use telemetry::{init_telemetry, TelemetryConfig};
