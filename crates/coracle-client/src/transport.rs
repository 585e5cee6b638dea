//! Consumed transport and gateway seams
//!
//! The proxied message channel itself (connections, framing, gateway
//! selection) lives behind `GatewayTransport`; the client runtime only
//! drives the contract defined here.

use async_trait::async_trait;
use coracle_core::{ClientError, GrainId, Message, MessageCategory, Result};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Map from interface id to grain type code, fetched from the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceMap {
    entries: HashMap<u32, u32>,
}

impl InterfaceMap {
    pub fn new(entries: HashMap<u32, u32>) -> Self {
        Self { entries }
    }

    pub fn type_code(&self, interface_id: u32) -> Option<u32> {
        self.entries.get(&interface_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Implicit stream subscriptions, fetched at start for the streaming layer
#[derive(Debug, Clone, Default)]
pub struct StreamSubscriberTable {
    entries: HashMap<String, Vec<GrainId>>,
}

impl StreamSubscriberTable {
    pub fn new(entries: HashMap<String, Vec<GrainId>>) -> Self {
        Self { entries }
    }

    pub fn subscribers(&self, namespace: &str) -> &[GrainId] {
        self.entries.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The proxied message channel to the grain system
///
/// `send_message` transfers ownership of the message and does not suspend;
/// `wait_message` blocks until a message of the category arrives and
/// returns `None` once the transport shuts down.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Stop accepting new work ahead of `stop`
    async fn prepare_to_stop(&self);

    async fn stop(&self);

    /// Test hook: drop the gateway connection without stopping
    async fn disconnect(&self);

    /// Test hook: re-establish the gateway connection
    async fn reconnect(&self) -> Result<()>;

    fn send_message(&self, message: Message) -> Result<()>;

    async fn wait_message(&self, category: MessageCategory) -> Option<Message>;

    /// Announce a local object so gateways route its grain id here
    async fn register_observer(&self, grain: GrainId) -> Result<()>;

    async fn unregister_observer(&self, grain: GrainId) -> Result<()>;

    async fn type_code_map(&self) -> Result<InterfaceMap>;

    async fn implicit_stream_table(&self) -> Result<StreamSubscriberTable>;

    /// The locally bound endpoint, once started
    fn local_address(&self) -> Option<SocketAddr>;
}

/// Source of gateway endpoints
#[async_trait]
pub trait GatewayListProvider: Send + Sync {
    async fn gateways(&self) -> Result<Vec<SocketAddr>>;
}

/// Gateway list taken verbatim from configuration
#[derive(Debug, Clone)]
pub struct StaticGatewayListProvider {
    gateways: Vec<SocketAddr>,
}

impl StaticGatewayListProvider {
    pub fn new(gateways: Vec<SocketAddr>) -> Self {
        Self { gateways }
    }

    pub fn from_config(config: &coracle_core::ClientConfig) -> Result<Self> {
        Ok(Self::new(config.parsed_gateways()?))
    }
}

#[async_trait]
impl GatewayListProvider for StaticGatewayListProvider {
    async fn gateways(&self) -> Result<Vec<SocketAddr>> {
        if self.gateways.is_empty() {
            return Err(ClientError::GatewayUnavailable {
                reason: "configured gateway list is empty".into(),
            });
        }
        Ok(self.gateways.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coracle_core::ClientConfig;

    #[tokio::test]
    async fn test_static_provider_from_config() {
        let config = ClientConfig {
            gateways: vec!["127.0.0.1:30000".into(), "127.0.0.1:30001".into()],
            ..ClientConfig::default()
        };
        let provider = StaticGatewayListProvider::from_config(&config).unwrap();
        let gateways = provider.gateways().await.unwrap();
        assert_eq!(gateways.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_provider_is_unavailable() {
        let provider = StaticGatewayListProvider::new(Vec::new());
        assert!(matches!(
            provider.gateways().await,
            Err(ClientError::GatewayUnavailable { .. })
        ));
    }

    #[test]
    fn test_interface_map_lookup() {
        let map = InterfaceMap::new(HashMap::from([(7, 42)]));
        assert_eq!(map.type_code(7), Some(42));
        assert_eq!(map.type_code(8), None);
    }
}
