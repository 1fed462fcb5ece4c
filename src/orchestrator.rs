//! The orchestrator façade — the only component external callers touch.
//!
//! An [`Orchestrator`] is caller-owned: it holds its own registry, index,
//! metrics, policy, and strategy, so a process can run several independent
//! orchestrators and tear each one down cleanly. There is no hidden global
//! state.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use capmux::orchestrator::Orchestrator;
//! use capmux::backend::{Connector, Credential};
//! use capmux::aggregate::InvocationMode;
//! use serde_json::json;
//!
//! # async fn run(connector: Arc<dyn Connector>) -> Result<(), capmux::errors::OrchestratorError> {
//! let orchestrator = Orchestrator::new(connector);
//! orchestrator
//!     .add_backend("w1", "tcp://weather-1:4000", Credential::new("token"))
//!     .await?;
//! let result = orchestrator
//!     .invoke("weather.forecast", json!({"location": "X"}), InvocationMode::Best)
//!     .await?;
//! println!("{}", result.value);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::aggregate::{Aggregator, InvocationMode, MergerRegistry, ResultEnvelope, ResultMerger};
use crate::backend::{
    BackendDescriptor, BackendStatus, BackendStatusView, ConnectionRegistry, Connector, Credential,
    CredentialProvider,
};
use crate::capabilities::{CapabilityIndex, CapabilitySummary};
use crate::conflict::ConflictPolicy;
use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::routing::{strategy_by_name, MetricsEntry, RoundRobin, RoutingMetrics, RoutingStrategy};

/// Caller-owned façade over the registry, index, resolver, router, and
/// aggregator.
pub struct Orchestrator {
    registry: Arc<ConnectionRegistry>,
    index: Arc<CapabilityIndex>,
    metrics: Arc<RoutingMetrics>,
    policy: Arc<RwLock<ConflictPolicy>>,
    strategy: Arc<RwLock<Arc<dyn RoutingStrategy>>>,
    mergers: Arc<RwLock<MergerRegistry>>,
    aggregator: Aggregator,
}

impl Orchestrator {
    /// Create an orchestrator over the given transport connector.
    ///
    /// Defaults: round-robin routing, first-backend conflict resolution,
    /// the built-in merger registry, and 30-second timeouts.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let index = Arc::new(CapabilityIndex::new());
        let metrics = Arc::new(RoutingMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new(
            connector,
            Arc::clone(&index),
            Arc::clone(&metrics),
        ));
        let policy = Arc::new(RwLock::new(ConflictPolicy::default()));
        let strategy: Arc<RwLock<Arc<dyn RoutingStrategy>>> =
            Arc::new(RwLock::new(Arc::new(RoundRobin::new())));
        let mergers = Arc::new(RwLock::new(MergerRegistry::with_defaults()));
        let aggregator = Aggregator::new(
            Arc::clone(&registry),
            Arc::clone(&index),
            Arc::clone(&metrics),
            Arc::clone(&policy),
            Arc::clone(&strategy),
            Arc::clone(&mergers),
        );
        Self {
            registry,
            index,
            metrics,
            policy,
            strategy,
            mergers,
            aggregator,
        }
    }

    /// Build an orchestrator from a configuration: applies the policy,
    /// strategy, and timeouts, then registers and connects each declared
    /// backend. Individual connect failures are recorded on the backend's
    /// status, not raised.
    pub async fn from_config(
        config: OrchestratorConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, OrchestratorError> {
        let orchestrator = Self::new(connector);

        if let Some(policy) = config.conflict_policy {
            orchestrator.set_conflict_policy(policy);
        }
        if let Some(name) = &config.routing_strategy {
            match strategy_by_name(name) {
                Some(strategy) => orchestrator.set_routing_strategy(strategy),
                None => log::warn!("unknown routing strategy '{}', keeping default", name),
            }
        }
        if let Some(secs) = config.call_timeout_secs {
            orchestrator.aggregator.set_call_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.connect_timeout_secs {
            orchestrator
                .registry
                .set_connect_timeout(Duration::from_secs(secs));
        }

        for backend in config.backends {
            let credential = backend
                .credential
                .map(Credential::new)
                .unwrap_or_else(Credential::none);
            orchestrator
                .add_backend(&backend.id, &backend.endpoint, credential)
                .await?;
            if let Some(attempts) = backend.connect_retries {
                let status = orchestrator.registry.status(&backend.id)?;
                if status != BackendStatus::Connected {
                    if let Err(err) = orchestrator.connect_with_retry(&backend.id, attempts).await {
                        log::warn!(
                            "configured backend never connected: id='{}', error='{}'",
                            backend.id,
                            err
                        );
                    }
                }
            }
        }
        Ok(orchestrator)
    }

    // -----------------------------------------------------------------------
    // Builder configuration
    // -----------------------------------------------------------------------

    /// Builder: install a credential provider consulted before every
    /// connect attempt.
    pub fn with_credential_provider(self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.registry.set_credential_provider(provider);
        self
    }

    /// Builder: set the per-call invocation timeout.
    pub fn with_call_timeout(self, timeout: Duration) -> Self {
        self.aggregator.set_call_timeout(timeout);
        self
    }

    /// Builder: set the per-attempt connect timeout.
    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        self.registry.set_connect_timeout(timeout);
        self
    }

    /// Builder: set the routing strategy.
    pub fn with_routing_strategy(self, strategy: Arc<dyn RoutingStrategy>) -> Self {
        self.set_routing_strategy(strategy);
        self
    }

    /// Builder: set the conflict policy.
    pub fn with_conflict_policy(self, policy: ConflictPolicy) -> Self {
        self.set_conflict_policy(policy);
        self
    }

    // -----------------------------------------------------------------------
    // Backend lifecycle
    // -----------------------------------------------------------------------

    /// Register a backend and immediately attempt to connect it. The
    /// returned status reflects the connect outcome; a failed attempt
    /// leaves the backend registered in the `Error` state.
    pub async fn add_backend(
        &self,
        id: &str,
        endpoint: &str,
        credential: Credential,
    ) -> Result<BackendStatus, OrchestratorError> {
        self.registry
            .add_backend(BackendDescriptor::new(id, endpoint, credential))
            .await
    }

    /// Disconnect and delete a backend, its capability entries, and its
    /// routing metrics.
    pub async fn remove_backend(&self, id: &str) -> Result<(), OrchestratorError> {
        self.registry.remove_backend(id).await
    }

    /// Explicitly (re)connect a backend.
    pub async fn connect(&self, id: &str) -> Result<(), OrchestratorError> {
        self.registry.connect(id).await
    }

    /// Retry connecting with exponential backoff and jitter.
    pub async fn connect_with_retry(
        &self,
        id: &str,
        max_attempts: u32,
    ) -> Result<(), OrchestratorError> {
        self.registry.connect_with_retry(id, max_attempts).await
    }

    /// Disconnect a backend, pruning its capability entries.
    pub async fn disconnect(&self, id: &str) -> Result<(), OrchestratorError> {
        self.registry.disconnect(id).await
    }

    /// Re-run capability discovery on a connected backend. Returns the
    /// number of capabilities it now reports.
    pub async fn rediscover(&self, id: &str) -> Result<usize, OrchestratorError> {
        self.registry.rediscover(id).await
    }

    /// Disconnect every backend. The orchestrator can keep being used;
    /// backends reconnect on demand via [`connect`](Self::connect).
    pub async fn shutdown(&self) {
        self.registry.disconnect_all().await;
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Every known capability id with its provider count.
    pub fn list_capabilities(&self) -> Vec<CapabilitySummary> {
        self.index.list_all()
    }

    /// Status snapshot of one backend.
    pub fn backend_status(&self, id: &str) -> Result<BackendStatusView, OrchestratorError> {
        self.registry.status_view(id)
    }

    /// Status snapshots of every registered backend.
    pub fn list_backends(&self) -> Vec<BackendStatusView> {
        self.registry.list_backends()
    }

    /// Routing metrics snapshot, sorted by backend then capability.
    pub fn metrics_snapshot(&self) -> Vec<MetricsEntry> {
        self.metrics.snapshot()
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Execute an invocation in the given mode.
    pub async fn invoke(
        &self,
        capability_id: &str,
        params: Value,
        mode: InvocationMode,
    ) -> Result<ResultEnvelope, OrchestratorError> {
        self.aggregator.invoke(capability_id, params, mode).await
    }

    // -----------------------------------------------------------------------
    // Policy configuration
    // -----------------------------------------------------------------------

    /// Replace the conflict policy. Takes effect on the next resolution.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        *self.policy.write() = policy;
    }

    /// Replace the routing strategy. Takes effect on the next invocation.
    pub fn set_routing_strategy(&self, strategy: Arc<dyn RoutingStrategy>) {
        log::info!("routing strategy set: '{}'", strategy.name());
        *self.strategy.write() = strategy;
    }

    /// Register a result merger for a capability namespace.
    pub fn register_merger(&self, namespace: &str, merger: Arc<dyn ResultMerger>) {
        self.mergers.write().register(namespace, merger);
    }
}
