//! In-memory gateway transport
//!
//! Messages are delivered through channels instead of sockets. This is the
//! reference implementation of the transport contract and the workhorse of
//! the integration tests: tests script inbound delivery with `deliver` and
//! inspect the outbound side with `sent`/`take_sent`.

use crate::transport::{GatewayTransport, InterfaceMap, StreamSubscriberTable};
use async_trait::async_trait;
use coracle_core::{ClientError, GrainId, Message, MessageCategory, Result};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Channel-backed gateway for tests and in-process wiring
pub struct MemoryGateway {
    endpoint: SocketAddr,
    started: AtomicBool,
    connected: AtomicBool,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    sent: Mutex<Vec<Message>>,
    observers: Mutex<HashSet<GrainId>>,
    unregistered: Mutex<Vec<GrainId>>,
    type_codes: Mutex<InterfaceMap>,
}

impl MemoryGateway {
    pub fn new(endpoint: SocketAddr) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            started: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            observers: Mutex::new(HashSet::new()),
            unregistered: Mutex::new(Vec::new()),
            type_codes: Mutex::new(InterfaceMap::default()),
        }
    }

    /// Script an inbound message, as if a gateway pushed it
    pub fn deliver(&self, message: Message) {
        let tx = self.inbound_tx.lock().expect("gateway poisoned");
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Outbound messages handed to the transport so far
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().expect("gateway poisoned").clone()
    }

    /// Drain the outbound record
    pub fn take_sent(&self) -> Vec<Message> {
        std::mem::take(&mut self.sent.lock().expect("gateway poisoned"))
    }

    /// Grain ids currently registered as observers
    pub fn observers(&self) -> Vec<GrainId> {
        self.observers
            .lock()
            .expect("gateway poisoned")
            .iter()
            .copied()
            .collect()
    }

    /// Grain ids unregistered so far, in order
    pub fn unregistered(&self) -> Vec<GrainId> {
        self.unregistered.lock().expect("gateway poisoned").clone()
    }

    pub fn set_type_codes(&self, map: InterfaceMap) {
        *self.type_codes.lock().expect("gateway poisoned") = map;
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) || !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::TransportClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayTransport for MemoryGateway {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn prepare_to_stop(&self) {
        // Nothing buffered to drain in the in-memory gateway.
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        // Closing the channel wakes any pending wait_message with None.
        self.inbound_tx.lock().expect("gateway poisoned").take();
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn reconnect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_message(&self, message: Message) -> Result<()> {
        self.ensure_open()?;
        self.sent.lock().expect("gateway poisoned").push(message);
        Ok(())
    }

    async fn wait_message(&self, category: MessageCategory) -> Option<Message> {
        debug_assert_eq!(category, MessageCategory::Application);
        self.inbound_rx.lock().await.recv().await
    }

    async fn register_observer(&self, grain: GrainId) -> Result<()> {
        self.ensure_open()?;
        self.observers.lock().expect("gateway poisoned").insert(grain);
        Ok(())
    }

    async fn unregister_observer(&self, grain: GrainId) -> Result<()> {
        self.observers.lock().expect("gateway poisoned").remove(&grain);
        self.unregistered.lock().expect("gateway poisoned").push(grain);
        Ok(())
    }

    async fn type_code_map(&self) -> Result<InterfaceMap> {
        Ok(self.type_codes.lock().expect("gateway poisoned").clone())
    }

    async fn implicit_stream_table(&self) -> Result<StreamSubscriberTable> {
        Ok(StreamSubscriberTable::default())
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.started.load(Ordering::SeqCst).then_some(self.endpoint)
    }
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("endpoint", &self.endpoint)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coracle_core::{ActivationId, Direction, MessageBody};

    fn gateway() -> MemoryGateway {
        MemoryGateway::new("127.0.0.1:30000".parse().unwrap())
    }

    fn one_way() -> Message {
        Message::request(
            Direction::OneWay,
            GrainId::client(),
            ActivationId::fresh(),
            GrainId::client(),
            MessageBody::Empty,
        )
    }

    #[tokio::test]
    async fn test_send_requires_started() {
        let gw = gateway();
        assert!(matches!(
            gw.send_message(one_way()),
            Err(ClientError::TransportClosed)
        ));

        gw.start().await.unwrap();
        gw.send_message(one_way()).unwrap();
        assert_eq!(gw.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_reconnect_hooks() {
        let gw = gateway();
        gw.start().await.unwrap();
        gw.disconnect().await;
        assert!(gw.send_message(one_way()).is_err());
        gw.reconnect().await.unwrap();
        assert!(gw.send_message(one_way()).is_ok());
    }

    #[tokio::test]
    async fn test_wait_message_sees_delivery_and_close() {
        let gw = gateway();
        gw.start().await.unwrap();

        gw.deliver(one_way());
        let got = gw.wait_message(MessageCategory::Application).await;
        assert!(got.is_some());

        gw.stop().await;
        assert!(gw.wait_message(MessageCategory::Application).await.is_none());
    }

    #[tokio::test]
    async fn test_observer_registration_tracking() {
        let gw = gateway();
        gw.start().await.unwrap();

        let grain = GrainId::client();
        gw.register_observer(grain).await.unwrap();
        assert_eq!(gw.observers().len(), 1);

        gw.unregister_observer(grain).await.unwrap();
        assert!(gw.observers().is_empty());
        assert_eq!(gw.unregistered(), vec![grain]);
    }

    #[tokio::test]
    async fn test_local_address_only_after_start() {
        let gw = gateway();
        assert!(gw.local_address().is_none());
        gw.start().await.unwrap();
        assert_eq!(gw.local_address(), Some("127.0.0.1:30000".parse().unwrap()));
    }
}
