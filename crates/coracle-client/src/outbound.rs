//! Outbound request path
//!
//! Stamps, addresses, expires, registers, and hands messages to the
//! transport; also owns the resend policy and response emission back
//! toward the grain system.

use crate::callbacks::{CallbackRegistry, RetryHook};
use crate::context::ClientContext;
use bytes::Bytes;
use coracle_core::constants::CLOCK_SKEW_ALLOWANCE_MS;
use coracle_core::{
    ActivationId, ClientError, Direction, GrainId, InvocationRequest, Message, MessageBody,
    ResponseBody, Result, SiloAddress,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Reference to a remote grain
///
/// System-target references carry the silo they are bound to; ordinary
/// grain references leave placement to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrainRef {
    grain: GrainId,
    silo: Option<SiloAddress>,
}

impl GrainRef {
    pub fn new(grain: GrainId) -> Self {
        Self { grain, silo: None }
    }

    pub fn system(grain: GrainId, silo: SiloAddress) -> Self {
        debug_assert!(grain.is_system_target(), "system refs need a system grain");
        Self {
            grain,
            silo: Some(silo),
        }
    }

    pub fn grain_id(&self) -> GrainId {
        self.grain
    }

    pub fn silo(&self) -> Option<SiloAddress> {
        self.silo
    }
}

/// Per-invocation options
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeOptions {
    /// Fire-and-forget: no callback is registered, no response expected
    pub one_way: bool,
}

/// Build, stamp, register, and submit one outbound request
///
/// Returns the completion receiver for two-way requests, `None` for
/// one-ways.
pub(crate) fn send_request(
    ctx: &Arc<ClientContext>,
    callbacks: &Arc<CallbackRegistry>,
    target: &GrainRef,
    invocation: InvocationRequest,
    options: InvokeOptions,
    debug_context: Option<String>,
    generic_arguments: Option<String>,
) -> Result<Option<oneshot::Receiver<Result<ResponseBody>>>> {
    let direction = if options.one_way {
        Direction::OneWay
    } else {
        Direction::Request
    };
    let mut message = Message::request(
        direction,
        ctx.identity.self_grain(),
        ctx.identity.self_activation(),
        target.grain_id(),
        MessageBody::Invocation(invocation),
    );

    // System targets are pinned to their silo; the activation id there is
    // a pure function of (grain, silo).
    if target.grain_id().is_system_target() {
        message.target_silo = target.silo();
        if let Some(silo) = target.silo() {
            message.target_activation = Some(ActivationId::system(&target.grain_id(), &silo));
        }
    }

    if generic_arguments.is_some() {
        message.generic_grain_type = generic_arguments;
    }
    if debug_context.is_some() {
        message.debug_context = debug_context;
    }

    // Clock skew is absorbed into the deadline; system targets are exempt
    // from expiration entirely.
    if message.is_expirable(&ctx.config) && !message.target_grain.is_system_target() {
        message.expiration_ms = Some(
            ctx.time.now_ms() + ctx.response_timeout.as_millis() as u64 + CLOCK_SKEW_ALLOWANCE_MS,
        );
    }

    if options.one_way {
        ctx.transport.send_message(message)?;
        ctx.counters.requests_sent.increment();
        return Ok(None);
    }

    let (sink, receiver) = oneshot::channel();
    let id = message.id;
    callbacks.register(message.clone(), sink, try_resend_hook(Arc::clone(ctx)));
    if let Err(e) = ctx.transport.send_message(message) {
        callbacks.unregister(id);
        return Err(e);
    }
    ctx.counters.requests_sent.increment();
    Ok(Some(receiver))
}

/// The retry hook installed on every two-way callback
///
/// Fires on response timeout. Within the resend budget it records target
/// history, lets the gateway rebind non-system targets, and re-submits;
/// outside the budget it reports false so the callback times out.
pub(crate) fn try_resend_hook(ctx: Arc<ClientContext>) -> RetryHook {
    Arc::new(move |message: &mut Message| {
        if !message.may_resend(&ctx.config) {
            return false;
        }

        message.resend_count += 1;
        message.record_target_history();
        if !message.target_grain.is_system_target() {
            // Stale placement is the usual reason a request went dark.
            message.target_activation = None;
            message.target_silo = None;
        }

        match ctx.transport.send_message(message.clone()) {
            Ok(()) => {
                ctx.counters.requests_resent.increment();
                debug!(correlation = %message.id, resend = message.resend_count, "request resent");
                true
            }
            Err(e) => {
                warn!(correlation = %message.id, error = %e, "resend failed");
                false
            }
        }
    })
}

// =============================================================================
// Response Emission
// =============================================================================

/// Emit the value response for a locally served request
///
/// The payload is deep-copied first; a copy failure becomes an exception
/// response carrying the copy failure.
pub(crate) fn send_response(ctx: &ClientContext, request: &Message, payload: Bytes) {
    let body = match ctx.serializer.deep_copy(&payload) {
        Ok(copy) => ResponseBody::Value(copy),
        Err(e) => {
            error!(correlation = %request.id, error = %e, "deep copy of result failed");
            copy_failure_body(&e)
        }
    };
    emit(ctx, request, body);
}

/// Report a failure of a locally served request
///
/// One-way invocations never produce a response; the failure is logged
/// only.
pub(crate) fn send_exception(ctx: &ClientContext, request: &Message, failure: &ClientError) {
    if request.is_one_way() {
        warn!(correlation = %request.id, error = %failure, "one-way invocation failed");
        return;
    }

    let payload = exception_payload(failure);
    let body = match ctx.serializer.deep_copy(&payload) {
        Ok(copy) => ResponseBody::Exception(copy),
        Err(copy_err) => {
            error!(correlation = %request.id, error = %copy_err, "deep copy of exception failed");
            copy_failure_body(&copy_err)
        }
    };
    emit(ctx, request, body);
}

fn exception_payload(failure: &ClientError) -> Bytes {
    Bytes::from(serde_json::json!({ "error": failure.to_string() }).to_string())
}

fn copy_failure_body(copy_failure: &ClientError) -> ResponseBody {
    ResponseBody::Exception(exception_payload(copy_failure))
}

fn emit(ctx: &ClientContext, request: &Message, body: ResponseBody) {
    if request.is_expired(ctx.time.now_ms()) {
        ctx.counters.dropped_expired.increment();
        debug!(correlation = %request.id, "response for expired request dropped");
        return;
    }

    let response = Message::response_to(
        request,
        ctx.identity.self_grain(),
        ctx.identity.self_activation(),
        body,
    );
    if let Err(e) = ctx.transport.send_message(response) {
        warn!(correlation = %request.id, error = %e, "failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbackRegistry;
    use crate::context::test_support::memory_context;
    use crate::counters::ClientCounters;
    use coracle_core::{ClientConfig, WallClockTime};
    use coracle_stats::CounterRegistry;
    use std::time::Duration;
    use uuid::Uuid;

    fn config() -> ClientConfig {
        ClientConfig {
            gateways: vec!["127.0.0.1:30000".into()],
            message_resend_count_max: 1,
            ..ClientConfig::default()
        }
    }

    fn invocation() -> InvocationRequest {
        InvocationRequest {
            interface_id: 1,
            method_id: 2,
            arguments: Bytes::from_static(b"[]"),
        }
    }

    fn callbacks() -> Arc<CallbackRegistry> {
        CallbackRegistry::new(
            Duration::from_secs(30),
            Arc::new(WallClockTime::new()),
            ClientCounters::register(&CounterRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_request_is_stamped_and_registered() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let callbacks = callbacks();
        let target = GrainRef::new(GrainId::grain(Uuid::new_v4()));

        let rx = send_request(
            &ctx,
            &callbacks,
            &target,
            invocation(),
            InvokeOptions::default(),
            Some("test-call".into()),
            None,
        )
        .unwrap();
        assert!(rx.is_some());
        assert_eq!(callbacks.len(), 1);

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        let msg = &sent[0];
        assert_eq!(msg.sending_grain, ctx.identity.self_grain());
        assert_eq!(msg.target_grain, target.grain_id());
        assert_eq!(msg.debug_context.as_deref(), Some("test-call"));
        assert!(msg.target_activation.is_none());

        // Deadline covers timeout plus skew allowance.
        let deadline = msg.expiration_ms.unwrap();
        assert!(deadline >= ctx.time.now_ms() + 30_000);
    }

    #[tokio::test]
    async fn test_system_target_stamping() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let callbacks = callbacks();
        let silo = SiloAddress::new("10.0.0.1:11111".parse().unwrap(), 4);
        let grain = GrainId::system_target(Uuid::nil());
        let target = GrainRef::system(grain, silo);

        send_request(
            &ctx,
            &callbacks,
            &target,
            invocation(),
            InvokeOptions::default(),
            None,
            None,
        )
        .unwrap();

        let msg = &gateway.sent()[0];
        assert_eq!(msg.target_silo, Some(silo));
        assert_eq!(msg.target_activation, Some(ActivationId::system(&grain, &silo)));
        // System targets never expire.
        assert!(msg.expiration_ms.is_none());
    }

    #[tokio::test]
    async fn test_one_way_registers_no_callback() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let callbacks = callbacks();
        let target = GrainRef::new(GrainId::grain(Uuid::new_v4()));

        let rx = send_request(
            &ctx,
            &callbacks,
            &target,
            invocation(),
            InvokeOptions { one_way: true },
            None,
            None,
        )
        .unwrap();
        assert!(rx.is_none());
        assert_eq!(callbacks.len(), 0);
        assert!(gateway.sent()[0].is_one_way());
    }

    #[tokio::test]
    async fn test_resend_rebinds_ordinary_targets() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let hook = try_resend_hook(ctx.clone());

        let mut msg = Message::request(
            Direction::Request,
            ctx.identity.self_grain(),
            ctx.identity.self_activation(),
            GrainId::grain(Uuid::new_v4()),
            MessageBody::Invocation(invocation()),
        );
        // As if the gateway had already bound a placement.
        msg.target_activation = Some(ActivationId::fresh());
        msg.target_silo = Some(SiloAddress::new("10.0.0.1:11111".parse().unwrap(), 4));

        assert!(hook(&mut msg));
        assert_eq!(msg.resend_count, 1);
        assert!(msg.target_activation.is_none());
        assert!(msg.target_silo.is_none());
        assert!(msg.target_history.is_some());
        assert_eq!(gateway.sent().len(), 1);

        // Budget of one: the second fire gives up.
        assert!(!hook(&mut msg));
        assert_eq!(msg.resend_count, 1);
    }

    #[tokio::test]
    async fn test_resend_preserves_system_binding() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let hook = try_resend_hook(ctx.clone());

        let silo = SiloAddress::new("10.0.0.1:11111".parse().unwrap(), 4);
        let grain = GrainId::system_target(Uuid::nil());
        let mut msg = Message::request(
            Direction::Request,
            ctx.identity.self_grain(),
            ctx.identity.self_activation(),
            grain,
            MessageBody::Invocation(invocation()),
        );
        msg.target_silo = Some(silo);
        msg.target_activation = Some(ActivationId::system(&grain, &silo));

        assert!(hook(&mut msg));
        assert_eq!(msg.target_silo, Some(silo));
        assert_eq!(msg.target_activation, Some(ActivationId::system(&grain, &silo)));
        assert_eq!(gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_response_emission_deep_copies() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let request = Message::request(
            Direction::Request,
            GrainId::grain(Uuid::new_v4()),
            ActivationId::fresh(),
            ctx.identity.self_grain(),
            MessageBody::Empty,
        );

        send_response(&ctx, &request, Bytes::from_static(b"{\"n\":1}"));
        let sent = gateway.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, request.id);
        assert!(matches!(
            sent[0].response_body(),
            Some(ResponseBody::Value(_))
        ));

        // Standard serializer rejects non-JSON: exception response instead.
        send_response(&ctx, &request, Bytes::from_static(b"\x00not json"));
        let sent = gateway.take_sent();
        assert!(matches!(
            sent[0].response_body(),
            Some(ResponseBody::Exception(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_request_gets_no_response() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let mut request = Message::request(
            Direction::Request,
            GrainId::grain(Uuid::new_v4()),
            ActivationId::fresh(),
            ctx.identity.self_grain(),
            MessageBody::Empty,
        );
        request.expiration_ms = Some(1);

        send_response(&ctx, &request, Bytes::from_static(b"1"));
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_one_way_failure_is_log_only() {
        let (ctx, gateway) = memory_context(config(), Duration::from_secs(30)).await;
        let request = Message::request(
            Direction::OneWay,
            GrainId::grain(Uuid::new_v4()),
            ActivationId::fresh(),
            ctx.identity.self_grain(),
            MessageBody::Empty,
        );

        send_exception(&ctx, &request, &ClientError::internal("boom"));
        assert!(gateway.sent().is_empty());
    }
}
