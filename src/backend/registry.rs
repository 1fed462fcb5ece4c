//! Connection registry — owns every backend's descriptor, connection, and
//! lifecycle.
//!
//! Lifecycle operations (`connect`, `disconnect`, discovery) on one backend
//! id are serialized through a per-backend async mutex, so no two of them
//! overlap; independent backends make progress concurrently. The registry
//! map lock and the per-backend state lock are plain sync locks held only
//! across in-memory mutation, never across network I/O.
//!
//! Connect failures are recovered locally: the backend moves to the `Error`
//! state with `last_error` recorded, and nothing else is affected. Retry is
//! a separate, explicit operation with exponential backoff and jitter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::Mutex;

use crate::capabilities::CapabilityIndex;
use crate::errors::OrchestratorError;
use crate::routing::RoutingMetrics;

use super::connection::{BackendConnection, Connector, CredentialProvider};
use super::descriptor::{BackendDescriptor, BackendStatus, BackendStatusView};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default timeout for a single connect attempt, seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 30;
/// Default timeout for one discovery listing, seconds.
pub const DEFAULT_DISCOVERY_TIMEOUT: u64 = 30;
/// Ceiling for the retry backoff delay, seconds.
pub const BACKOFF_CAP_SECS: f64 = 30.0;

// ---------------------------------------------------------------------------
// BackendSlot
// ---------------------------------------------------------------------------

/// Registry-internal holder for one backend.
struct BackendSlot {
    /// Descriptor snapshot; read synchronously by status queries.
    state: RwLock<BackendDescriptor>,
    /// Live connection, present only while `Connected`.
    conn: RwLock<Option<Arc<dyn BackendConnection>>>,
    /// Serializes lifecycle operations on this backend.
    lifecycle: Mutex<()>,
}

impl BackendSlot {
    fn new(descriptor: BackendDescriptor) -> Self {
        Self {
            state: RwLock::new(descriptor),
            conn: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Owns the set of backends; manages lifecycle and retry.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    credentials: RwLock<Option<Arc<dyn CredentialProvider>>>,
    index: Arc<CapabilityIndex>,
    metrics: Arc<RoutingMetrics>,
    backends: RwLock<HashMap<String, Arc<BackendSlot>>>,
    connect_timeout: RwLock<Duration>,
    discovery_timeout: RwLock<Duration>,
}

impl ConnectionRegistry {
    pub fn new(
        connector: Arc<dyn Connector>,
        index: Arc<CapabilityIndex>,
        metrics: Arc<RoutingMetrics>,
    ) -> Self {
        Self {
            connector,
            credentials: RwLock::new(None),
            index,
            metrics,
            backends: RwLock::new(HashMap::new()),
            connect_timeout: RwLock::new(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT)),
            discovery_timeout: RwLock::new(Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT)),
        }
    }

    /// Install a credential provider consulted before every connect attempt.
    pub fn set_credential_provider(&self, provider: Arc<dyn CredentialProvider>) {
        *self.credentials.write() = Some(provider);
    }

    /// Set the per-attempt connect timeout.
    pub fn set_connect_timeout(&self, timeout: Duration) {
        *self.connect_timeout.write() = timeout;
    }

    /// Set the discovery listing timeout.
    pub fn set_discovery_timeout(&self, timeout: Duration) {
        *self.discovery_timeout.write() = timeout;
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a backend and immediately attempt to connect it.
    ///
    /// Registration fails only on a duplicate id. The connect attempt's
    /// outcome is reported in the returned status: a failure leaves the
    /// backend in the `Error` state (observable via `status_view`) rather
    /// than failing the registration.
    pub async fn add_backend(
        &self,
        descriptor: BackendDescriptor,
    ) -> Result<BackendStatus, OrchestratorError> {
        let id = descriptor.id.clone();
        {
            let mut backends = self.backends.write();
            if backends.contains_key(&id) {
                return Err(OrchestratorError::DuplicateBackend { backend_id: id });
            }
            backends.insert(id.clone(), Arc::new(BackendSlot::new(descriptor)));
        }
        log::info!("backend registered: id='{}'", id);

        if let Err(err) = self.connect(&id).await {
            log::warn!("initial connect failed: backend='{}', error='{}'", id, err);
        }
        self.status(&id)
    }

    /// Disconnect (if needed) and delete a backend entirely, dropping its
    /// capability entries and routing metrics.
    pub async fn remove_backend(&self, backend_id: &str) -> Result<(), OrchestratorError> {
        self.disconnect(backend_id).await?;
        self.backends.write().remove(backend_id);
        self.metrics.remove_backend(backend_id);
        log::info!("backend removed: id='{}'", backend_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect a backend: `Disconnected -> Connecting -> Connected`, or
    /// `Connecting -> Error` on failure.
    ///
    /// On success, capability discovery runs immediately and its
    /// descriptors are published into the capability index. If already
    /// connected this is a no-op. Does not auto-retry; see
    /// [`connect_with_retry`](Self::connect_with_retry).
    pub async fn connect(&self, backend_id: &str) -> Result<(), OrchestratorError> {
        let slot = self.slot(backend_id)?;
        let _lifecycle = slot.lifecycle.lock().await;

        if slot.state.read().status == BackendStatus::Connected {
            return Ok(());
        }

        let endpoint = {
            let mut state = slot.state.write();
            state.status = BackendStatus::Connecting;
            state.endpoint.clone()
        };
        log::info!("connecting: backend='{}', endpoint='{}'", backend_id, endpoint);

        // Refresh the credential if a provider is installed; otherwise use
        // the one supplied at registration.
        let provider = self.credentials.read().clone();
        let credential = if let Some(provider) = provider {
            match provider.credential(backend_id).await {
                Ok(credential) => {
                    slot.state.write().credential = credential.clone();
                    credential
                }
                Err(err) => {
                    let classified = OrchestratorError::from_collaborator(backend_id, err);
                    slot.state.write().record_error(classified.to_string());
                    return Err(classified);
                }
            }
        } else {
            slot.state.read().credential.clone()
        };

        let timeout = *self.connect_timeout.read();
        let attempt = tokio::time::timeout(timeout, self.connector.connect(&endpoint, &credential));
        let connection: Arc<dyn BackendConnection> = match attempt.await {
            Ok(Ok(connection)) => Arc::from(connection),
            Ok(Err(err)) => {
                let classified = OrchestratorError::from_collaborator(backend_id, err);
                slot.state.write().record_error(classified.to_string());
                log::error!("connect failed: backend='{}', error='{}'", backend_id, classified);
                return Err(classified);
            }
            Err(_) => {
                let classified = OrchestratorError::Connection {
                    backend_id: backend_id.to_string(),
                    message: format!("connect timed out after {:?}", timeout),
                };
                slot.state.write().record_error(classified.to_string());
                log::error!("connect timed out: backend='{}'", backend_id);
                return Err(classified);
            }
        };

        // Discovery runs under the same lifecycle hold; a backend that
        // cannot list its capabilities is not usable, so a discovery
        // failure is a connect failure.
        match self.list_with_timeout(backend_id, &connection).await {
            Ok(descriptors) => {
                {
                    let mut state = slot.state.write();
                    state.status = BackendStatus::Connected;
                    state.connected_at = Some(Utc::now());
                    state.last_error = None;
                }
                *slot.conn.write() = Some(connection);
                let count = descriptors.len();
                self.index.replace_backend(backend_id, descriptors);
                log::info!(
                    "connected: backend='{}', capabilities={}",
                    backend_id,
                    count
                );
                Ok(())
            }
            Err(classified) => {
                connection.close().await;
                slot.state.write().record_error(classified.to_string());
                log::error!(
                    "discovery failed: backend='{}', error='{}'",
                    backend_id,
                    classified
                );
                Err(classified)
            }
        }
    }

    /// Retry `connect` with exponential backoff and jitter
    /// (`min(cap, 2^attempt + random(0,1))` seconds), stopping after
    /// `max_attempts`. Credential rejections are not retried.
    pub async fn connect_with_retry(
        &self,
        backend_id: &str,
        max_attempts: u32,
    ) -> Result<(), OrchestratorError> {
        let mut last_error = None;
        for attempt in 0..max_attempts {
            match self.connect(backend_id).await {
                Ok(()) => return Ok(()),
                Err(err @ OrchestratorError::Authentication { .. }) => return Err(err),
                Err(err @ OrchestratorError::UnknownBackend { .. }) => return Err(err),
                Err(err) => last_error = Some(err),
            }
            if attempt + 1 < max_attempts {
                let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
                let backoff = (2f64.powi(attempt as i32) + jitter).min(BACKOFF_CAP_SECS);
                log::debug!(
                    "retrying connect: backend='{}', attempt={}, backoff={:.2}s",
                    backend_id,
                    attempt + 1,
                    backoff
                );
                tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
            }
        }
        Err(last_error.unwrap_or(OrchestratorError::Connection {
            backend_id: backend_id.to_string(),
            message: format!("never connected after {} attempts", max_attempts),
        }))
    }

    /// Disconnect a backend and synchronously prune its capability entries.
    ///
    /// Routing metrics survive a disconnect; a reconnecting backend keeps
    /// its latency history. They are dropped on `remove_backend`.
    pub async fn disconnect(&self, backend_id: &str) -> Result<(), OrchestratorError> {
        let slot = self.slot(backend_id)?;
        let _lifecycle = slot.lifecycle.lock().await;

        let connection = slot.conn.write().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        {
            let mut state = slot.state.write();
            state.status = BackendStatus::Disconnected;
            state.connected_at = None;
        }
        self.index.remove_backend(backend_id);
        log::info!("disconnected: backend='{}'", backend_id);
        Ok(())
    }

    /// Re-run capability discovery on a connected backend, replacing its
    /// published entries wholesale. A failure moves the backend to the
    /// `Error` state.
    pub async fn rediscover(&self, backend_id: &str) -> Result<usize, OrchestratorError> {
        let slot = self.slot(backend_id)?;
        let _lifecycle = slot.lifecycle.lock().await;

        let connection = slot.conn.read().clone().ok_or(OrchestratorError::Connection {
            backend_id: backend_id.to_string(),
            message: "backend is not connected".to_string(),
        })?;

        match self.list_with_timeout(backend_id, &connection).await {
            Ok(descriptors) => {
                let count = descriptors.len();
                self.index.replace_backend(backend_id, descriptors);
                Ok(count)
            }
            Err(classified) => {
                slot.state.write().record_error(classified.to_string());
                Err(classified)
            }
        }
    }

    async fn list_with_timeout(
        &self,
        backend_id: &str,
        connection: &Arc<dyn BackendConnection>,
    ) -> Result<Vec<crate::capabilities::CapabilityDescriptor>, OrchestratorError> {
        let timeout = *self.discovery_timeout.read();
        match tokio::time::timeout(timeout, connection.list_capabilities()).await {
            Ok(Ok(descriptors)) => Ok(descriptors),
            Ok(Err(err)) => Err(OrchestratorError::from_collaborator(backend_id, err)),
            Err(_) => Err(OrchestratorError::Connection {
                backend_id: backend_id.to_string(),
                message: format!("capability listing timed out after {:?}", timeout),
            }),
        }
    }

    /// Connect every registered backend concurrently. Returns per-backend
    /// results; failures are also reflected in each backend's status.
    pub async fn connect_all(&self) -> Vec<(String, Result<(), OrchestratorError>)> {
        let ids: Vec<String> = {
            let backends = self.backends.read();
            let mut ids: Vec<String> = backends.keys().cloned().collect();
            ids.sort();
            ids
        };
        let attempts = ids.iter().map(|id| self.connect(id));
        let outcomes = futures::future::join_all(attempts).await;
        ids.into_iter().zip(outcomes).collect()
    }

    /// Disconnect every registered backend.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.backends.read().keys().cloned().collect();
        for id in ids {
            if let Err(err) = self.disconnect(&id).await {
                log::warn!("disconnect failed: backend='{}', error='{}'", id, err);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The live connection for a backend, for invocation dispatch.
    pub fn connection(
        &self,
        backend_id: &str,
    ) -> Result<Arc<dyn BackendConnection>, OrchestratorError> {
        let slot = self.slot(backend_id)?;
        let conn = slot.conn.read().clone();
        conn.ok_or(OrchestratorError::Connection {
            backend_id: backend_id.to_string(),
            message: "backend is not connected".to_string(),
        })
    }

    /// Current lifecycle status of a backend.
    pub fn status(&self, backend_id: &str) -> Result<BackendStatus, OrchestratorError> {
        Ok(self.slot(backend_id)?.state.read().status)
    }

    /// Status snapshot of a backend.
    pub fn status_view(&self, backend_id: &str) -> Result<BackendStatusView, OrchestratorError> {
        Ok(self.slot(backend_id)?.state.read().status_view())
    }

    /// Status snapshots for every registered backend, sorted by id.
    pub fn list_backends(&self) -> Vec<BackendStatusView> {
        let backends = self.backends.read();
        let mut views: Vec<BackendStatusView> = backends
            .values()
            .map(|slot| slot.state.read().status_view())
            .collect();
        drop(backends);
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Record an invocation failure on the backend's descriptor without
    /// changing its lifecycle state. The connection stays usable; a dead
    /// transport shows up on the next lifecycle operation.
    pub fn record_invoke_error(&self, backend_id: &str, message: &str) {
        if let Ok(slot) = self.slot(backend_id) {
            let mut state = slot.state.write();
            state.last_error = Some(message.to_string());
            state.last_error_at = Some(Utc::now());
        }
    }

    /// Flag a backend whose transport failed during use:
    /// `Connected -> Error`. The next `connect` retries from `Error`.
    pub async fn mark_error(&self, backend_id: &str, message: &str) -> Result<(), OrchestratorError> {
        let slot = self.slot(backend_id)?;
        let _lifecycle = slot.lifecycle.lock().await;
        let connection = slot.conn.write().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        slot.state.write().record_error(message);
        self.index.remove_backend(backend_id);
        log::warn!("backend marked failed: id='{}', error='{}'", backend_id, message);
        Ok(())
    }

    fn slot(&self, backend_id: &str) -> Result<Arc<BackendSlot>, OrchestratorError> {
        self.backends
            .read()
            .get(backend_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownBackend {
                backend_id: backend_id.to_string(),
            })
    }
}
