//! Client runtime lifecycle
//!
//! Single entry point: build, start, reset, drop. One live runtime per
//! process between start and reset, enforced through a global slot.

use crate::callbacks::CallbackRegistry;
use crate::context::ClientContext;
use crate::counters::ClientCounters;
use crate::identity::ClientIdentity;
use crate::local_objects::{LocalObjectRegistry, ObserverInvoker, ObserverRef, ObserverTarget};
use crate::outbound::{self, GrainRef, InvokeOptions};
use crate::providers::ProviderRegistry;
use crate::pump::InboundPump;
use crate::transport::{
    GatewayListProvider, GatewayTransport, InterfaceMap, StaticGatewayListProvider,
    StreamSubscriberTable,
};
use bytes::Bytes;
use coracle_core::constants::{GATEWAY_INIT_TIMEOUT_MS, TYPE_MAP_FETCH_TIMEOUT_MS};
use coracle_core::{
    debugger_attached, serializer_for, ClientConfig, ClientError, GrainId, InvocationRequest,
    Message, ResponseBody, Result, SiloAddress, TimeProvider, WallClockTime,
};
use coracle_stats::{
    CounterRegistry, ReportBuilder, StatsFlushTask, StatsPublisherAdapter, StatsTablePublisher,
};
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// Process-Wide Runtime Slot
// =============================================================================

static RUNTIME_SLOT: Lazy<StdMutex<Option<Uuid>>> = Lazy::new(|| StdMutex::new(None));

fn acquire_runtime_slot(instance: Uuid) -> Result<()> {
    let mut slot = RUNTIME_SLOT.lock().expect("runtime slot poisoned");
    if slot.is_some() {
        return Err(ClientError::AlreadyRunning);
    }
    *slot = Some(instance);
    Ok(())
}

fn release_runtime_slot(instance: Uuid) {
    let mut slot = RUNTIME_SLOT.lock().expect("runtime slot poisoned");
    if *slot == Some(instance) {
        *slot = None;
    }
}

type PanicHook = Box<dyn Fn(&std::panic::PanicHookInfo<'_>) + Sync + Send + 'static>;

/// Swap in a hook that records panics in the log; returns the prior hook
fn install_panic_hook() -> PanicHook {
    let prior = std::panic::take_hook();
    std::panic::set_hook(Box::new(|info| {
        error!(panic = %info, "unhandled panic in client process");
    }));
    prior
}

enum RunState {
    Created,
    Running {
        token: CancellationToken,
        pump: JoinHandle<()>,
        stats_task: Option<JoinHandle<()>>,
        prior_panic_hook: Option<PanicHook>,
    },
    Stopped,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ClientRuntime`]
pub struct ClientRuntimeBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn GatewayTransport>>,
    gateway_provider: Option<Arc<dyn GatewayListProvider>>,
    stats_publisher: Option<Arc<dyn StatsTablePublisher>>,
    time: Arc<dyn TimeProvider>,
}

impl ClientRuntimeBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            gateway_provider: None,
            stats_publisher: None,
            time: Arc::new(WallClockTime::new()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn GatewayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the gateway list provider; defaults to the static list
    /// from configuration
    pub fn with_gateway_list_provider(mut self, provider: Arc<dyn GatewayListProvider>) -> Self {
        self.gateway_provider = Some(provider);
        self
    }

    pub fn with_stats_publisher(mut self, publisher: Arc<dyn StatsTablePublisher>) -> Self {
        self.stats_publisher = Some(publisher);
        self
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Build the runtime: validate, select providers, resolve gateways
    ///
    /// Failure partway resets what the constructor touched before
    /// returning the error.
    pub async fn build(self) -> Result<ClientRuntime> {
        let transport = self.transport.clone();
        match self.build_inner().await {
            Ok(runtime) => Ok(runtime),
            Err(e) => {
                Self::constructor_reset(transport.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn build_inner(self) -> Result<ClientRuntime> {
        self.config.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| ClientError::internal("transport is required"))?;

        // Resolve the gateway list inside the init timeout.
        let provider: Arc<dyn GatewayListProvider> = match self.gateway_provider {
            Some(provider) => provider,
            None => Arc::new(StaticGatewayListProvider::from_config(&self.config)?),
        };
        let gateways = tokio::time::timeout(
            Duration::from_millis(GATEWAY_INIT_TIMEOUT_MS),
            provider.gateways(),
        )
        .await
        .map_err(|_| ClientError::GatewayUnavailable {
            reason: format!("gateway resolution exceeded {}ms", GATEWAY_INIT_TIMEOUT_MS),
        })??;
        if gateways.is_empty() {
            return Err(ClientError::GatewayUnavailable {
                reason: "resolved gateway list is empty".into(),
            });
        }
        info!(gateways = gateways.len(), "gateway list resolved");

        // Static provider registry; record the chosen statistics provider.
        let providers = ProviderRegistry::from_configs(&self.config.provider_configurations);
        let mut config = self.config;
        if let Some(chosen) =
            providers.statistics_provider(config.statistics_provider_name.as_deref())
        {
            config.statistics_provider_name = Some(chosen.name.clone());
        }

        let attached = debugger_attached();
        if attached {
            warn!("debugger attached; using the long debug response timeout");
        }
        let response_timeout = config.effective_response_timeout(attached);

        let serializer = serializer_for(&config);
        let identity = Arc::new(ClientIdentity::new());
        let counter_registry = Arc::new(CounterRegistry::new());
        let counters = ClientCounters::register(&counter_registry);
        let config = Arc::new(config);

        let ctx = Arc::new(ClientContext {
            config: Arc::clone(&config),
            identity: Arc::clone(&identity),
            transport: Arc::clone(&transport),
            serializer,
            time: Arc::clone(&self.time),
            counters: counters.clone(),
            response_timeout,
        });
        let callbacks = CallbackRegistry::new(response_timeout, Arc::clone(&self.time), counters);

        let stats = self.stats_publisher.map(|publisher| {
            Arc::new(StatsPublisherAdapter::new(
                Arc::clone(&counter_registry),
                ReportBuilder::new(
                    config.deployment_id.clone(),
                    config.dns_host_name.clone(),
                    Some(identity.generation() as i64),
                ),
                publisher,
                Arc::clone(&self.time),
            ))
        });

        info!(
            client = %identity.client_guid(),
            generation = identity.generation(),
            serializer = ctx.serializer.name(),
            "client runtime constructed"
        );

        Ok(ClientRuntime {
            instance_id: Uuid::new_v4(),
            config,
            ctx,
            callbacks,
            objects: LocalObjectRegistry::new(),
            counter_registry,
            stats,
            state: tokio::sync::Mutex::new(RunState::Created),
            shutdown: StdMutex::new(None),
            interface_map: StdMutex::new(None),
            stream_table: StdMutex::new(None),
        })
    }

    /// Undo constructor side effects after a partial init failure
    async fn constructor_reset(transport: Option<&Arc<dyn GatewayTransport>>) {
        warn!("client construction failed; resetting partial state");
        if let Some(transport) = transport {
            transport.stop().await;
        }
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// The client-side runtime of the grain system
///
/// Owns the outbound request path, the callback registry, the local object
/// registry, and the inbound pump. Collaborators (transport, gateway list,
/// statistics publisher) are consumed behind their traits.
pub struct ClientRuntime {
    instance_id: Uuid,
    config: Arc<ClientConfig>,
    ctx: Arc<ClientContext>,
    callbacks: Arc<CallbackRegistry>,
    objects: Arc<LocalObjectRegistry>,
    counter_registry: Arc<CounterRegistry>,
    stats: Option<Arc<StatsPublisherAdapter>>,
    state: tokio::sync::Mutex<RunState>,
    /// Present exactly while the runtime is running; drives drop teardown
    shutdown: StdMutex<Option<CancellationToken>>,
    interface_map: StdMutex<Option<InterfaceMap>>,
    stream_table: StdMutex<Option<StreamSubscriberTable>>,
}

impl std::fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl ClientRuntime {
    pub fn builder(config: ClientConfig) -> ClientRuntimeBuilder {
        ClientRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_guid(&self) -> Uuid {
        self.ctx.identity.client_guid()
    }

    pub fn generation(&self) -> i32 {
        self.ctx.identity.generation()
    }

    /// The client's address; available once start has completed
    pub fn address(&self) -> Result<SiloAddress> {
        self.ctx.identity.address()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown
            .lock()
            .expect("shutdown slot poisoned")
            .is_some()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ClientError::NotStarted)
        }
    }

    /// Interface/type-code map fetched from the gateway at start
    pub fn interface_map(&self) -> Option<InterfaceMap> {
        self.interface_map
            .lock()
            .expect("interface map poisoned")
            .clone()
    }

    /// Implicit stream subscriber table fetched at start
    pub fn stream_subscriber_table(&self) -> Option<StreamSubscriberTable> {
        self.stream_table
            .lock()
            .expect("stream table poisoned")
            .clone()
    }

    /// Counters backing the statistics publisher, for inspection
    pub fn counter_registry(&self) -> &CounterRegistry {
        &self.counter_registry
    }

    // =========================================================================
    // Start / Reset
    // =========================================================================

    /// Start the runtime
    ///
    /// Enforces one live runtime per process; the loser of a concurrent
    /// start observes `AlreadyRunning`.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, RunState::Running { .. }) {
            return Err(ClientError::AlreadyRunning);
        }

        acquire_runtime_slot(self.instance_id)?;
        match self.start_inner().await {
            Ok(running) => {
                if let RunState::Running { token, .. } = &running {
                    *self.shutdown.lock().expect("shutdown slot poisoned") = Some(token.clone());
                }
                *state = running;
                info!(
                    client = %self.client_guid(),
                    generation = self.generation(),
                    "client runtime started"
                );
                Ok(())
            }
            Err(e) => {
                release_runtime_slot(self.instance_id);
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<RunState> {
        self.ctx.transport.start().await?;
        match self.start_after_transport().await {
            Ok(running) => Ok(running),
            Err(e) => {
                // Unwind the only live resource; nothing is spawned yet.
                self.ctx.transport.stop().await;
                Err(e)
            }
        }
    }

    async fn start_after_transport(&self) -> Result<RunState> {
        let endpoint = self
            .ctx
            .transport
            .local_address()
            .ok_or_else(|| ClientError::internal("transport reported no local endpoint"))?;
        let address = self.ctx.identity.bind_address(endpoint)?;
        debug!(address = %address, "client address bound");

        if let Some(adapter) = &self.stats {
            adapter.init().await?;
        }

        // The type-code map blocks start; the streaming layer's table rides
        // along while the transport is idle.
        let map = tokio::time::timeout(
            Duration::from_millis(TYPE_MAP_FETCH_TIMEOUT_MS),
            self.ctx.transport.type_code_map(),
        )
        .await
        .map_err(|_| {
            ClientError::internal(format!(
                "type-code map fetch exceeded {}ms",
                TYPE_MAP_FETCH_TIMEOUT_MS
            ))
        })??;
        debug!(interfaces = map.len(), "type-code map fetched");
        *self.interface_map.lock().expect("interface map poisoned") = Some(map);

        let table = self.ctx.transport.implicit_stream_table().await?;
        *self.stream_table.lock().expect("stream table poisoned") = Some(table);

        // Side effects last, so the error paths above leave no residue.
        let prior_panic_hook = if self.config.secondary {
            None
        } else {
            Some(install_panic_hook())
        };

        let token = CancellationToken::new();
        let stats_task = self.stats.as_ref().map(|adapter| {
            StatsFlushTask::spawn(
                Arc::clone(adapter),
                Duration::from_millis(self.config.statistics_flush_interval_ms),
                token.clone(),
            )
        });
        let pump = InboundPump::spawn(
            Arc::clone(&self.ctx),
            Arc::clone(&self.callbacks),
            Arc::clone(&self.objects),
            token.clone(),
        );

        Ok(RunState::Running {
            token,
            pump,
            stats_task,
            prior_panic_hook,
        })
    }

    /// Tear the runtime down
    ///
    /// Tolerant by design: every step is independently guarded, so one
    /// failure never prevents the rest. Idempotent.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let RunState::Running {
            token,
            pump,
            stats_task,
            prior_panic_hook,
        } = std::mem::replace(&mut *state, RunState::Stopped)
        else {
            return;
        };

        info!("client runtime resetting");

        // No new inbound dispatch, no new flushes.
        token.cancel();

        self.ctx.transport.prepare_to_stop().await;
        self.ctx.transport.stop().await;

        if let Err(e) = pump.await {
            warn!(error = %e, "inbound pump join failed");
        }

        // The flush task writes once more on cancellation.
        if let Some(task) = stats_task {
            if let Err(e) = task.await {
                warn!(error = %e, "statistics task join failed");
            }
        }

        if let Some(hook) = prior_panic_hook {
            std::panic::set_hook(hook);
        }

        release_runtime_slot(self.instance_id);
        *self.shutdown.lock().expect("shutdown slot poisoned") = None;

        info!("client runtime reset complete");
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Invoke a method on a remote grain and await its result
    pub async fn invoke(&self, target: &GrainRef, invocation: InvocationRequest) -> Result<Bytes> {
        self.invoke_with(target, invocation, InvokeOptions::default(), None, None)
            .await
    }

    /// Invoke with explicit options, debug context, and generic arguments
    pub async fn invoke_with(
        &self,
        target: &GrainRef,
        invocation: InvocationRequest,
        options: InvokeOptions,
        debug_context: Option<String>,
        generic_arguments: Option<String>,
    ) -> Result<Bytes> {
        self.ensure_running()?;

        let receiver = outbound::send_request(
            &self.ctx,
            &self.callbacks,
            target,
            invocation,
            options,
            debug_context,
            generic_arguments,
        )?;
        let Some(receiver) = receiver else {
            return Ok(Bytes::new());
        };

        let body = receiver
            .await
            .map_err(|_| ClientError::internal("completion sink dropped"))??;
        match body {
            ResponseBody::Value(payload) => Ok(payload),
            ResponseBody::Exception(payload) => Err(ClientError::RemoteFailure {
                detail: String::from_utf8_lossy(&payload).into_owned(),
            }),
            ResponseBody::Rejection(kind) => Err(ClientError::GatewayRejection {
                reason: format!("{:?}", kind),
            }),
        }
    }

    /// Fire-and-forget invocation; no callback is registered
    pub fn invoke_one_way(&self, target: &GrainRef, invocation: InvocationRequest) -> Result<()> {
        self.ensure_running()?;
        outbound::send_request(
            &self.ctx,
            &self.callbacks,
            target,
            invocation,
            InvokeOptions { one_way: true },
            None,
            None,
        )?;
        Ok(())
    }

    // =========================================================================
    // Local Objects
    // =========================================================================

    /// Expose a local object to remote grains
    ///
    /// Registers the fresh grain id with the transport, then installs the
    /// weakly held entry. The registry never extends the object's
    /// lifetime.
    pub async fn create_object_reference(
        &self,
        object: &ObserverTarget,
        invoker: Arc<dyn ObserverInvoker>,
    ) -> Result<ObserverRef> {
        self.ensure_running()?;

        if object.downcast_ref::<ObserverRef>().is_some()
            || object.downcast_ref::<GrainRef>().is_some()
        {
            return Err(ClientError::internal(
                "cannot register a grain reference as a local object",
            ));
        }

        let grain = GrainId::client();
        self.ctx.transport.register_observer(grain).await?;
        match self.objects.insert(grain, object, invoker) {
            Ok(_) => Ok(ObserverRef::new(grain)),
            Err(e) => {
                // Fresh ids cannot collide; still clean up upstream.
                if let Err(ue) = self.ctx.transport.unregister_observer(grain).await {
                    warn!(target = %grain, error = %ue, "observer rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Withdraw a local object
    pub async fn delete_object_reference(&self, reference: &ObserverRef) -> Result<()> {
        let grain = reference.grain_id();
        if self.objects.remove(&grain).is_none() {
            return Err(ClientError::NotLocalObject {
                grain: grain.to_string(),
            });
        }
        self.ctx.transport.unregister_observer(grain).await
    }

    // =========================================================================
    // Host-Only Surface
    // =========================================================================
    // These operations exist only inside a silo; on a client every one of
    // them fails with InvalidContext.

    pub fn silo_status(&self) -> Result<()> {
        Err(ClientError::invalid_context("silo_status"))
    }

    pub fn deactivate_on_idle(&self, _grain: GrainId) -> Result<()> {
        Err(ClientError::invalid_context("deactivate_on_idle"))
    }

    pub fn register_reminder(&self, _name: &str) -> Result<()> {
        Err(ClientError::invalid_context("register_reminder"))
    }

    pub fn storage_provider(&self, _name: &str) -> Result<()> {
        Err(ClientError::invalid_context("storage_provider"))
    }

    pub fn grain_invoker(&self, _interface_id: u32) -> Result<()> {
        Err(ClientError::invalid_context("grain_invoker"))
    }

    pub fn capture_runtime_environment(&self) -> Result<()> {
        Err(ClientError::invalid_context("capture_runtime_environment"))
    }

    pub fn process_outgoing_message(&self, _message: Message) -> Result<()> {
        Err(ClientError::invalid_context("process_outgoing_message"))
    }

    pub fn process_incoming_message(&self, _message: Message) -> Result<()> {
        Err(ClientError::invalid_context("process_incoming_message"))
    }
}

impl Drop for ClientRuntime {
    fn drop(&mut self) {
        // Best-effort dispose: stop the pumps and free the slot. Safe to
        // run after reset.
        if let Some(token) = self
            .shutdown
            .lock()
            .expect("shutdown slot poisoned")
            .take()
        {
            token.cancel();
        }
        release_runtime_slot(self.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGateway;

    // The runtime slot is process-global; tests that start a runtime take
    // this guard so they cannot observe each other's slot.
    static START_GUARD: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

    fn config() -> ClientConfig {
        ClientConfig {
            gateways: vec!["127.0.0.1:30000".into()],
            secondary: true,
            ..ClientConfig::default()
        }
    }

    fn gateway(port: u16) -> Arc<MemoryGateway> {
        Arc::new(MemoryGateway::new(
            format!("127.0.0.1:{}", port).parse().unwrap(),
        ))
    }

    async fn runtime(port: u16) -> ClientRuntime {
        ClientRuntime::builder(config())
            .with_transport(gateway(port))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let err = ClientRuntime::builder(ClientConfig::default())
            .with_transport(gateway(30100))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn test_build_requires_transport() {
        let err = ClientRuntime::builder(config()).build().await.unwrap_err();
        assert!(matches!(err, ClientError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_statistics_provider_recorded_post_init() {
        let mut cfg = config();
        cfg.provider_configurations.push(coracle_core::ProviderConfig {
            name: "table".into(),
            kind: "statistics".into(),
            properties: Default::default(),
        });

        let runtime = ClientRuntime::builder(cfg)
            .with_transport(gateway(30101))
            .build()
            .await
            .unwrap();
        assert_eq!(
            runtime.config().statistics_provider_name.as_deref(),
            Some("table")
        );
    }

    #[tokio::test]
    async fn test_start_binds_address_and_reset_releases() {
        let _guard = START_GUARD.lock().await;
        let runtime = runtime(30102).await;
        assert!(matches!(runtime.address(), Err(ClientError::NotStarted)));

        runtime.start().await.unwrap();
        assert!(runtime.is_running());
        let address = runtime.address().unwrap();
        assert!(address.is_client());
        assert_eq!(address.generation, runtime.generation());
        assert!(runtime.interface_map().is_some());

        runtime.reset().await;
        assert!(!runtime.is_running());
        // Idempotent.
        runtime.reset().await;
    }

    #[tokio::test]
    async fn test_second_runtime_cannot_start_concurrently() {
        let _guard = START_GUARD.lock().await;
        let first = runtime(30103).await;
        let second = runtime(30104).await;

        let (a, b) = tokio::join!(first.start(), second.start());
        let oks = [a.is_ok(), b.is_ok()];
        assert_eq!(oks.iter().filter(|ok| **ok).count(), 1);
        let failure = if a.is_err() { a } else { b };
        assert!(matches!(failure, Err(ClientError::AlreadyRunning)));

        first.reset().await;
        second.reset().await;
    }

    #[tokio::test]
    async fn test_slot_frees_after_reset() {
        let _guard = START_GUARD.lock().await;
        let first = runtime(30105).await;
        first.start().await.unwrap();
        first.reset().await;

        let second = runtime(30106).await;
        second.start().await.unwrap();
        second.reset().await;
    }

    #[tokio::test]
    async fn test_invoke_requires_start() {
        let runtime = runtime(30107).await;
        let target = GrainRef::new(GrainId::grain(Uuid::new_v4()));
        let err = runtime
            .invoke(
                &target,
                InvocationRequest {
                    interface_id: 1,
                    method_id: 1,
                    arguments: Bytes::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotStarted));
    }

    #[tokio::test]
    async fn test_host_only_surface_is_invalid_context() {
        let runtime = runtime(30108).await;
        let grain = GrainId::grain(Uuid::new_v4());

        assert!(matches!(
            runtime.silo_status(),
            Err(ClientError::InvalidContext { .. })
        ));
        assert!(matches!(
            runtime.deactivate_on_idle(grain),
            Err(ClientError::InvalidContext { .. })
        ));
        assert!(matches!(
            runtime.register_reminder("wake-up"),
            Err(ClientError::InvalidContext { .. })
        ));
        assert!(matches!(
            runtime.storage_provider("default"),
            Err(ClientError::InvalidContext { .. })
        ));
        assert!(matches!(
            runtime.grain_invoker(7),
            Err(ClientError::InvalidContext { .. })
        ));
        assert!(matches!(
            runtime.capture_runtime_environment(),
            Err(ClientError::InvalidContext { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_unknown_reference_is_not_local() {
        let _guard = START_GUARD.lock().await;
        let runtime = runtime(30109).await;
        runtime.start().await.unwrap();

        let bogus = ObserverRef::new(GrainId::client());
        assert!(matches!(
            runtime.delete_object_reference(&bogus).await,
            Err(ClientError::NotLocalObject { .. })
        ));

        runtime.reset().await;
    }
}
