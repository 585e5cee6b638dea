//! Wire model: messages exchanged between a client and its gateway
//!
//! Messages are owned by their current holder; handing one to the transport
//! transfers ownership. Exceptions cross the wire as first-class response
//! variants, never as unwound panics.

use crate::config::ClientConfig;
use crate::id::{ActivationId, CorrelationId, GrainId, SiloAddress};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Direction of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Two-way request expecting a response
    Request,
    /// Response to an earlier request
    Response,
    /// Fire-and-forget request
    OneWay,
}

/// Transport-level message category
///
/// The client pump consumes only application-category messages; system
/// categories stay inside the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Application,
    System,
}

/// Reason a gateway rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Artifact of an idempotent resend; discarded at the callback layer
    DuplicateRequest,
    /// The gateway cannot currently serve the request; retriable
    Transient,
    /// The request can never succeed
    Unrecoverable,
}

/// A method invocation carried by a request message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub interface_id: u32,
    pub method_id: u32,
    pub arguments: Bytes,
}

/// Result carried by a response message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    /// Successful result payload
    Value(Bytes),
    /// Serialized failure raised by the remote invocation
    Exception(Bytes),
    /// Gateway-level rejection
    Rejection(RejectionKind),
}

/// Payload of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBody {
    Invocation(InvocationRequest),
    Response(ResponseBody),
    Empty,
}

/// A message between this client and the grain system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: CorrelationId,
    pub direction: Direction,
    pub sending_grain: GrainId,
    pub sending_activation: ActivationId,
    pub target_grain: GrainId,
    pub target_silo: Option<SiloAddress>,
    pub target_activation: Option<ActivationId>,
    pub generic_grain_type: Option<String>,
    pub debug_context: Option<String>,
    /// Prior target info, recorded when the message is resent
    pub target_history: Option<String>,
    pub body: MessageBody,
    /// Delivery deadline in epoch milliseconds; absent means never expires
    pub expiration_ms: Option<u64>,
    pub resend_count: u32,
}

impl Message {
    /// Construct a request (or one-way) to the given target
    pub fn request(
        direction: Direction,
        sending_grain: GrainId,
        sending_activation: ActivationId,
        target_grain: GrainId,
        body: MessageBody,
    ) -> Self {
        debug_assert!(direction != Direction::Response, "use response_to");

        Self {
            id: CorrelationId::next(),
            direction,
            sending_grain,
            sending_activation,
            target_grain,
            target_silo: None,
            target_activation: None,
            generic_grain_type: None,
            debug_context: None,
            target_history: None,
            body,
            expiration_ms: None,
            resend_count: 0,
        }
    }

    /// Construct the response to `request`, correlated by its id
    ///
    /// The response travels back to the requester's grain and activation.
    pub fn response_to(
        request: &Message,
        sending_grain: GrainId,
        sending_activation: ActivationId,
        body: ResponseBody,
    ) -> Self {
        Self {
            id: request.id,
            direction: Direction::Response,
            sending_grain,
            sending_activation,
            target_grain: request.sending_grain,
            target_silo: None,
            target_activation: Some(request.sending_activation),
            generic_grain_type: None,
            debug_context: request.debug_context.clone(),
            target_history: None,
            body: MessageBody::Response(body),
            expiration_ms: None,
            resend_count: 0,
        }
    }

    pub fn is_response(&self) -> bool {
        self.direction == Direction::Response
    }

    pub fn is_one_way(&self) -> bool {
        self.direction == Direction::OneWay
    }

    /// The response payload, if this is a response message
    pub fn response_body(&self) -> Option<&ResponseBody> {
        match &self.body {
            MessageBody::Response(body) => Some(body),
            _ => None,
        }
    }

    /// The invocation payload, if this is a request message
    pub fn invocation(&self) -> Option<&InvocationRequest> {
        match &self.body {
            MessageBody::Invocation(inv) => Some(inv),
            _ => None,
        }
    }

    /// Whether this message participates in expiration at all
    pub fn is_expirable(&self, config: &ClientConfig) -> bool {
        config.drop_expired_messages
    }

    /// Whether the delivery deadline has passed as of `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expiration_ms {
            Some(deadline) => now_ms > deadline,
            None => false,
        }
    }

    /// Whether the resend budget allows another submission
    pub fn may_resend(&self, config: &ClientConfig) -> bool {
        self.resend_count < config.message_resend_count_max
    }

    /// Record the current target info into the history header
    ///
    /// Called before a resend rebinds the target.
    pub fn record_target_history(&mut self) {
        let entry = format!(
            "{}/{}/{}",
            self.target_grain,
            self.target_activation
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".into()),
            self.target_silo
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into()),
        );
        self.target_history = Some(match self.target_history.take() {
            Some(prior) => format!("{} <- {}", entry, prior),
            None => entry,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GrainKind;
    use uuid::Uuid;

    fn config_with_resend(resend_max: u32) -> ClientConfig {
        ClientConfig {
            message_resend_count_max: resend_max,
            ..ClientConfig::default()
        }
    }

    fn request() -> Message {
        Message::request(
            Direction::Request,
            GrainId::client(),
            ActivationId::fresh(),
            GrainId::grain(Uuid::new_v4()),
            MessageBody::Invocation(InvocationRequest {
                interface_id: 1,
                method_id: 2,
                arguments: Bytes::new(),
            }),
        )
    }

    #[test]
    fn test_response_correlates_and_swaps_endpoints() {
        let req = request();
        let responder = GrainId::client();
        let act = ActivationId::fresh();
        let resp = Message::response_to(&req, responder, act, ResponseBody::Value(Bytes::new()));

        assert_eq!(resp.id, req.id);
        assert!(resp.is_response());
        assert_eq!(resp.target_grain, req.sending_grain);
        assert_eq!(resp.target_activation, Some(req.sending_activation));
        assert_eq!(resp.sending_grain.kind(), GrainKind::Client);
    }

    #[test]
    fn test_expiration_predicates() {
        let mut msg = request();
        assert!(!msg.is_expired(u64::MAX));

        msg.expiration_ms = Some(1_000);
        assert!(!msg.is_expired(1_000));
        assert!(msg.is_expired(1_001));

        let mut config = ClientConfig::default();
        assert!(msg.is_expirable(&config));
        config.drop_expired_messages = false;
        assert!(!msg.is_expirable(&config));
    }

    #[test]
    fn test_resend_budget() {
        let mut msg = request();
        assert!(!msg.may_resend(&config_with_resend(0)));
        assert!(msg.may_resend(&config_with_resend(1)));

        msg.resend_count = 1;
        assert!(!msg.may_resend(&config_with_resend(1)));
        assert!(msg.may_resend(&config_with_resend(2)));
    }

    #[test]
    fn test_target_history_accumulates() {
        let mut msg = request();
        msg.record_target_history();
        let first = msg.target_history.clone().unwrap();
        assert!(first.contains("grn-"));

        msg.record_target_history();
        let second = msg.target_history.unwrap();
        assert!(second.contains(" <- "));
        assert!(second.ends_with(&first));
    }

    #[test]
    fn test_message_roundtrips_through_serde() {
        let msg = request();
        let encoded = serde_json::to_vec(&msg).unwrap();
        let decoded: Message = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.invocation(), msg.invocation());
    }
}
