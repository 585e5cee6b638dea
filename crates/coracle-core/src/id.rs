//! Identifiers for grains, activations, silos, and in-flight requests

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

// =============================================================================
// GrainId
// =============================================================================

/// Class of a grain id
///
/// Clients and system targets are addressed through the same id space as
/// ordinary grains; the kind tells routing layers how to treat them.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrainKind {
    /// An ordinary, placement-managed grain
    Grain,
    /// A client-addressable target (this process, or one of its observers)
    Client,
    /// A built-in target bound to a specific silo, never rebound
    SystemTarget,
}

/// Unique identifier for a grain
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct GrainId {
    kind: GrainKind,
    key: Uuid,
}

impl GrainId {
    /// Create an ordinary grain id with the given key
    pub fn grain(key: Uuid) -> Self {
        Self {
            kind: GrainKind::Grain,
            key,
        }
    }

    /// Allocate a fresh client-addressable grain id
    pub fn client() -> Self {
        Self {
            kind: GrainKind::Client,
            key: Uuid::new_v4(),
        }
    }

    /// Create a system-target id with the given well-known key
    pub fn system_target(key: Uuid) -> Self {
        Self {
            kind: GrainKind::SystemTarget,
            key,
        }
    }

    pub fn kind(&self) -> GrainKind {
        self.kind
    }

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn is_client(&self) -> bool {
        self.kind == GrainKind::Client
    }

    pub fn is_system_target(&self) -> bool {
        self.kind == GrainKind::SystemTarget
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            GrainKind::Grain => "grn",
            GrainKind::Client => "cli",
            GrainKind::SystemTarget => "sys",
        };
        write!(f, "{}-{}", prefix, self.key.as_simple())
    }
}

// =============================================================================
// ActivationId
// =============================================================================

/// Identifier of a running activation of a grain
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActivationId(Uuid);

impl ActivationId {
    /// Allocate a fresh activation id
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive the deterministic activation id of a system target
    ///
    /// System targets have exactly one activation per silo, so the id is a
    /// pure function of `(grain, silo)`. Every process derives the same id.
    pub fn system(grain: &GrainId, silo: &SiloAddress) -> Self {
        fn half(discriminant: u8, grain: &GrainId, silo: &SiloAddress) -> u64 {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            hasher.write_u8(discriminant);
            grain.key().hash(&mut hasher);
            silo.endpoint.hash(&mut hasher);
            hasher.write_i32(silo.generation);
            hasher.finish()
        }
        Self(Uuid::from_u64_pair(
            half(0, grain, silo),
            half(1, grain, silo),
        ))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "act-{}", self.0.as_simple())
    }
}

// =============================================================================
// SiloAddress
// =============================================================================

/// Address of a silo: its endpoint plus an instance generation
///
/// Silo generations are positive; client generations (see the client crate)
/// are negative, so the sign distinguishes the two on the wire.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SiloAddress {
    pub endpoint: SocketAddr,
    pub generation: i32,
}

impl SiloAddress {
    pub fn new(endpoint: SocketAddr, generation: i32) -> Self {
        Self {
            endpoint,
            generation,
        }
    }

    /// Whether this address belongs to a client rather than a silo
    pub fn is_client(&self) -> bool {
        self.generation < 0
    }
}

impl fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.endpoint, self.generation)
    }
}

// =============================================================================
// CorrelationId
// =============================================================================

static NEXT_CORRELATION: AtomicU64 = AtomicU64::new(1);

/// Token matching a response to its outstanding request
///
/// Unique within the process for the lifetime of any outstanding request.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Allocate the next correlation id
    pub fn next() -> Self {
        Self(NEXT_CORRELATION.fetch_add(1, Ordering::Relaxed))
    }

    /// Construct from a raw value (tests and transports)
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
