//! Client identity and generation assignment
//!
//! Every client instance gets a negative generation, so clients and silos
//! are distinguishable by sign anywhere an address appears.

use coracle_core::{ActivationId, ClientError, GrainId, Result, SiloAddress};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

static NEXT_GENERATION: AtomicI32 = AtomicI32::new(1);

/// Identity of this client instance
///
/// The self address is materialized once the transport reports its bound
/// endpoint during start; reading it earlier fails with `NotStarted`.
#[derive(Debug)]
pub struct ClientIdentity {
    client_guid: Uuid,
    generation: i32,
    self_grain: GrainId,
    self_activation: ActivationId,
    self_address: OnceLock<SiloAddress>,
}

impl ClientIdentity {
    /// Allocate a fresh identity with the next (negated) generation
    pub fn new() -> Self {
        let generation = -NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        debug_assert!(generation < 0, "client generations are negative");

        Self {
            client_guid: Uuid::new_v4(),
            generation,
            self_grain: GrainId::client(),
            self_activation: ActivationId::fresh(),
            self_address: OnceLock::new(),
        }
    }

    pub fn client_guid(&self) -> Uuid {
        self.client_guid
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    /// The client-addressable grain id remote grains use to call back
    pub fn self_grain(&self) -> GrainId {
        self.self_grain
    }

    pub fn self_activation(&self) -> ActivationId {
        self.self_activation
    }

    /// The client's address, available once start has completed
    pub fn address(&self) -> Result<SiloAddress> {
        self.self_address
            .get()
            .copied()
            .ok_or(ClientError::NotStarted)
    }

    /// Bind the address from the transport's local endpoint
    ///
    /// Set when start completes. Rebinding to the same endpoint (start
    /// after reset) is a no-op; a different endpoint is a bug.
    pub(crate) fn bind_address(&self, endpoint: SocketAddr) -> Result<SiloAddress> {
        let address = SiloAddress::new(endpoint, self.generation);
        let bound = *self.self_address.get_or_init(|| address);
        if bound != address {
            return Err(ClientError::internal(format!(
                "client address already bound to {}",
                bound
            )));
        }
        Ok(address)
    }
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_negative_and_distinct() {
        let a = ClientIdentity::new();
        let b = ClientIdentity::new();
        assert!(a.generation() < 0);
        assert!(b.generation() < 0);
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn test_client_guid_is_unique() {
        let a = ClientIdentity::new();
        let b = ClientIdentity::new();
        assert_ne!(a.client_guid(), b.client_guid());
        assert_ne!(a.self_grain(), b.self_grain());
    }

    #[test]
    fn test_address_unavailable_before_bind() {
        let identity = ClientIdentity::new();
        assert!(matches!(
            identity.address(),
            Err(ClientError::NotStarted)
        ));
    }

    #[test]
    fn test_address_carries_generation_after_bind() {
        let identity = ClientIdentity::new();
        let endpoint: SocketAddr = "127.0.0.1:30000".parse().unwrap();

        let address = identity.bind_address(endpoint).unwrap();
        assert_eq!(address.endpoint, endpoint);
        assert_eq!(address.generation, identity.generation());
        assert!(address.is_client());
        assert_eq!(identity.address().unwrap(), address);

        // Rebinding the same endpoint is tolerated; a new one is a bug.
        assert!(identity.bind_address(endpoint).is_ok());
        let other: SocketAddr = "127.0.0.1:30001".parse().unwrap();
        assert!(identity.bind_address(other).is_err());
    }
}
