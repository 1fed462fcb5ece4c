//! Invocation execution: single, routed, and fan-out modes.
//!
//! Fan-out branches are spawned tasks collected through a
//! [`tokio::task::JoinSet`]; dropping the aggregation future aborts every
//! still-running branch, so a caller that abandons the operation leaks no
//! work. Each branch is bounded by the per-call timeout, so one unresponsive
//! backend never stalls the aggregation beyond its own timeout, and there
//! is no additional global deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::backend::ConnectionRegistry;
use crate::capabilities::CapabilityIndex;
use crate::conflict::{self, ConflictPolicy, MERGED_BACKEND_ID};
use crate::errors::OrchestratorError;
use crate::routing::{RoutingMetrics, RoutingStrategy};

use super::merge::MergerRegistry;

/// Default per-call invocation timeout, seconds.
pub const DEFAULT_CALL_TIMEOUT: u64 = 30;

// ---------------------------------------------------------------------------
// Invocation types
// ---------------------------------------------------------------------------

/// How an invocation chooses its backend(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationMode {
    /// Invoke exactly the named backend.
    Single { backend_id: String },
    /// Resolve conflicts by policy, then let the routing strategy pick one
    /// backend. The default mode.
    Best,
    /// Fan out to every backend listing the capability and merge the
    /// results.
    All,
}

impl InvocationMode {
    /// Mode name for logging.
    pub fn value(&self) -> &'static str {
        match self {
            InvocationMode::Single { .. } => "single",
            InvocationMode::Best => "best",
            InvocationMode::All => "all",
        }
    }
}

impl Default for InvocationMode {
    fn default() -> Self {
        InvocationMode::Best
    }
}

/// Outcome of one fan-out branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BranchOutcome {
    /// The branch returned a value.
    Success(Value),
    /// The branch exceeded the per-call timeout.
    Timeout,
    /// The branch failed with an error.
    Error(String),
}

/// One failed branch of a fan-out invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchFailure {
    pub backend_id: String,
    pub outcome: BranchOutcome,
}

/// Result of a completed invocation.
///
/// `partial_failures` is non-empty only for fan-out execution where some
/// branches failed while at least one succeeded; failures are never
/// silently swallowed.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    pub invocation_id: Uuid,
    pub capability_id: String,
    pub mode: &'static str,
    pub value: Value,
    pub partial_failures: Vec<BranchFailure>,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Executes invocations against the registry per the configured policy,
/// strategy, and merger registry.
pub struct Aggregator {
    registry: Arc<ConnectionRegistry>,
    index: Arc<CapabilityIndex>,
    metrics: Arc<RoutingMetrics>,
    policy: Arc<RwLock<ConflictPolicy>>,
    strategy: Arc<RwLock<Arc<dyn RoutingStrategy>>>,
    mergers: Arc<RwLock<MergerRegistry>>,
    call_timeout: RwLock<Duration>,
}

impl Aggregator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        index: Arc<CapabilityIndex>,
        metrics: Arc<RoutingMetrics>,
        policy: Arc<RwLock<ConflictPolicy>>,
        strategy: Arc<RwLock<Arc<dyn RoutingStrategy>>>,
        mergers: Arc<RwLock<MergerRegistry>>,
    ) -> Self {
        Self {
            registry,
            index,
            metrics,
            policy,
            strategy,
            mergers,
            call_timeout: RwLock::new(Duration::from_secs(DEFAULT_CALL_TIMEOUT)),
        }
    }

    /// Set the per-call invocation timeout.
    pub fn set_call_timeout(&self, timeout: Duration) {
        *self.call_timeout.write() = timeout;
    }

    /// Execute one invocation in the given mode.
    pub async fn invoke(
        &self,
        capability_id: &str,
        params: Value,
        mode: InvocationMode,
    ) -> Result<ResultEnvelope, OrchestratorError> {
        log::debug!(
            "invoke: capability='{}', mode='{}'",
            capability_id,
            mode.value()
        );
        match mode {
            InvocationMode::Single { backend_id } => {
                self.invoke_single(capability_id, params, &backend_id).await
            }
            InvocationMode::Best => self.invoke_best(capability_id, params).await,
            InvocationMode::All => self.invoke_all(capability_id, params).await,
        }
    }

    // -----------------------------------------------------------------------
    // Single
    // -----------------------------------------------------------------------

    async fn invoke_single(
        &self,
        capability_id: &str,
        params: Value,
        backend_id: &str,
    ) -> Result<ResultEnvelope, OrchestratorError> {
        let listed = self
            .index
            .lookup(capability_id)
            .iter()
            .any(|provider| provider.backend_id == backend_id);
        if !listed {
            return Err(OrchestratorError::CapabilityNotOnBackend {
                capability_id: capability_id.to_string(),
                backend_id: backend_id.to_string(),
            });
        }

        let value = self.call_one(backend_id, capability_id, params).await?;
        Ok(self.envelope(capability_id, "single", value, Vec::new()))
    }

    // -----------------------------------------------------------------------
    // Best
    // -----------------------------------------------------------------------

    async fn invoke_best(
        &self,
        capability_id: &str,
        params: Value,
    ) -> Result<ResultEnvelope, OrchestratorError> {
        let candidates = self.index.lookup(capability_id);
        if candidates.is_empty() {
            return Err(OrchestratorError::CapabilityNotFound {
                capability_id: capability_id.to_string(),
            });
        }

        let policy = self.policy.read().clone();
        let resolved = conflict::resolve(&policy, capability_id, &candidates);

        // A merge resolution has no single owning backend: fan out to the
        // contributing backends and merge, the same way `All` mode does.
        if resolved
            .first()
            .map(|entry| entry.backend_id == MERGED_BACKEND_ID)
            .unwrap_or(false)
        {
            let contributors = distinct_backends(resolved.iter().skip(1));
            return self.fan_out(capability_id, params, contributors, "best").await;
        }

        let eligible = distinct_backends(resolved.iter());
        let strategy = self.strategy.read().clone();
        let chosen = strategy
            .select(capability_id, &eligible, &self.metrics)
            .ok_or_else(|| OrchestratorError::NoRoute {
                capability_id: capability_id.to_string(),
            })?;
        log::debug!(
            "routed: capability='{}', strategy='{}', backend='{}'",
            capability_id,
            strategy.name(),
            chosen
        );

        let started = Instant::now();
        let result = self.call_one(&chosen, capability_id, params).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        strategy.record_outcome(&chosen, capability_id, duration_ms, result.is_ok());

        let value = result?;
        Ok(self.envelope(capability_id, "best", value, Vec::new()))
    }

    // -----------------------------------------------------------------------
    // All
    // -----------------------------------------------------------------------

    async fn invoke_all(
        &self,
        capability_id: &str,
        params: Value,
    ) -> Result<ResultEnvelope, OrchestratorError> {
        let providers = self.index.lookup(capability_id);
        if providers.is_empty() {
            return Err(OrchestratorError::CapabilityNotFound {
                capability_id: capability_id.to_string(),
            });
        }
        // Conflicts are irrelevant when querying everyone; resolution is
        // bypassed entirely.
        let backends = distinct_backends(providers.iter());
        self.fan_out(capability_id, params, backends, "all").await
    }

    /// Dispatch one branch per backend, collect tagged outcomes, merge the
    /// successes.
    async fn fan_out(
        &self,
        capability_id: &str,
        params: Value,
        backends: Vec<String>,
        mode: &'static str,
    ) -> Result<ResultEnvelope, OrchestratorError> {
        let timeout = *self.call_timeout.read();
        let mut branches: JoinSet<(usize, BranchOutcome)> = JoinSet::new();

        for (position, backend_id) in backends.iter().enumerate() {
            let registry = Arc::clone(&self.registry);
            // Reserve before spawning so concurrent routing sees every
            // dispatched branch immediately.
            let guard = self.metrics.begin_invocation(backend_id, capability_id);
            let backend_id = backend_id.clone();
            let capability_id = capability_id.to_string();
            let params = params.clone();

            branches.spawn(async move {
                let started = Instant::now();
                let outcome = match registry.connection(&backend_id) {
                    Ok(connection) => {
                        match tokio::time::timeout(timeout, connection.invoke(&capability_id, params))
                            .await
                        {
                            Ok(Ok(value)) => {
                                guard.complete(started.elapsed().as_secs_f64() * 1000.0, true);
                                BranchOutcome::Success(value)
                            }
                            Ok(Err(err)) => {
                                guard.complete(started.elapsed().as_secs_f64() * 1000.0, false);
                                let message = err.to_string();
                                registry.record_invoke_error(&backend_id, &message);
                                BranchOutcome::Error(message)
                            }
                            Err(_) => {
                                guard.complete(started.elapsed().as_secs_f64() * 1000.0, false);
                                BranchOutcome::Timeout
                            }
                        }
                    }
                    Err(err) => {
                        guard.complete(started.elapsed().as_secs_f64() * 1000.0, false);
                        BranchOutcome::Error(err.to_string())
                    }
                };
                (position, outcome)
            });
        }

        let mut outcomes: Vec<Option<BranchOutcome>> = vec![None; backends.len()];
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((position, outcome)) => outcomes[position] = Some(outcome),
                Err(err) => log::error!("aggregation branch panicked: {}", err),
            }
        }

        let mut successes: Vec<(String, Value)> = Vec::new();
        let mut failures: Vec<BranchFailure> = Vec::new();
        for (backend_id, outcome) in backends.iter().zip(outcomes) {
            match outcome {
                Some(BranchOutcome::Success(value)) => {
                    successes.push((backend_id.clone(), value));
                }
                Some(failed) => failures.push(BranchFailure {
                    backend_id: backend_id.clone(),
                    outcome: failed,
                }),
                None => failures.push(BranchFailure {
                    backend_id: backend_id.clone(),
                    outcome: BranchOutcome::Error("branch panicked".to_string()),
                }),
            }
        }

        log::info!(
            "aggregation: capability='{}', dispatched={}, succeeded={}, failed={}",
            capability_id,
            backends.len(),
            successes.len(),
            failures.len()
        );

        if successes.is_empty() {
            return Err(OrchestratorError::AggregationFailure {
                capability_id: capability_id.to_string(),
                attempted: backends.len(),
                outcomes: failures,
            });
        }

        let merger = self.mergers.read().resolve(capability_id);
        let value = merger.merge(capability_id, &successes);
        Ok(self.envelope(capability_id, mode, value, failures))
    }

    // -----------------------------------------------------------------------
    // Shared dispatch
    // -----------------------------------------------------------------------

    /// Invoke one backend with the per-call timeout and metrics accounting.
    async fn call_one(
        &self,
        backend_id: &str,
        capability_id: &str,
        params: Value,
    ) -> Result<Value, OrchestratorError> {
        let connection = self.registry.connection(backend_id)?;
        let timeout = *self.call_timeout.read();
        let guard = self.metrics.begin_invocation(backend_id, capability_id);
        let started = Instant::now();

        match tokio::time::timeout(timeout, connection.invoke(capability_id, params)).await {
            Ok(Ok(value)) => {
                guard.complete(started.elapsed().as_secs_f64() * 1000.0, true);
                Ok(value)
            }
            Ok(Err(err)) => {
                guard.complete(started.elapsed().as_secs_f64() * 1000.0, false);
                let classified = OrchestratorError::from_collaborator(backend_id, err);
                self.registry
                    .record_invoke_error(backend_id, &classified.to_string());
                Err(classified)
            }
            Err(_) => {
                guard.complete(started.elapsed().as_secs_f64() * 1000.0, false);
                Err(OrchestratorError::Connection {
                    backend_id: backend_id.to_string(),
                    message: format!("invocation timed out after {:?}", timeout),
                })
            }
        }
    }

    fn envelope(
        &self,
        capability_id: &str,
        mode: &'static str,
        value: Value,
        partial_failures: Vec<BranchFailure>,
    ) -> ResultEnvelope {
        ResultEnvelope {
            invocation_id: Uuid::new_v4(),
            capability_id: capability_id.to_string(),
            mode,
            value,
            partial_failures,
        }
    }
}

/// Distinct backend ids in first-occurrence order.
fn distinct_backends<'a>(
    providers: impl Iterator<Item = &'a crate::capabilities::ProviderEntry>,
) -> Vec<String> {
    let mut backends: Vec<String> = Vec::new();
    for provider in providers {
        if !backends.contains(&provider.backend_id) {
            backends.push(provider.backend_id.clone());
        }
    }
    backends
}
