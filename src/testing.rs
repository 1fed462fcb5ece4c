//! Shared test support: a scriptable in-memory connector.
//!
//! Backends are registered against the mock by endpoint. The connection
//! reads its script through shared state, so a test can change a backend's
//! behavior (or its capability list) while it is connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::backend::{BackendConnection, Connector, Credential};
use crate::capabilities::{CapabilityDescriptor, CapabilityKind};

/// Scripted behavior for one mock backend.
#[derive(Clone)]
pub(crate) struct MockBackendSpec {
    pub capabilities: Vec<CapabilityDescriptor>,
    pub latency: Duration,
    pub reject_credential: bool,
    pub fail_connect: bool,
    pub fail_invoke: bool,
    pub response: Option<Value>,
}

impl Default for MockBackendSpec {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            latency: Duration::ZERO,
            reject_credential: false,
            fail_connect: false,
            fail_invoke: false,
            response: None,
        }
    }
}

impl MockBackendSpec {
    pub fn with_capability(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.capabilities.push(descriptor);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn rejecting_credential(mut self) -> Self {
        self.reject_credential = true;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_invoke(mut self) -> Self {
        self.fail_invoke = true;
        self
    }
}

type SharedSpecs = Arc<Mutex<HashMap<String, MockBackendSpec>>>;
type SharedCounts = Arc<Mutex<HashMap<String, usize>>>;

/// In-memory connector with per-endpoint scripted backends.
pub(crate) struct MockConnector {
    specs: SharedSpecs,
    invoke_counts: SharedCounts,
    connect_attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            specs: Arc::new(Mutex::new(HashMap::new())),
            invoke_counts: Arc::new(Mutex::new(HashMap::new())),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    /// Register (or replace) the script for an endpoint.
    pub fn register(&self, endpoint: &str, spec: MockBackendSpec) {
        self.specs.lock().insert(endpoint.to_string(), spec);
    }

    /// Total connect attempts across all endpoints.
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Invocations served by an endpoint.
    pub fn invoke_count(&self, endpoint: &str) -> usize {
        self.invoke_counts.lock().get(endpoint).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        endpoint: &str,
        _credential: &Credential,
    ) -> Result<Box<dyn BackendConnection>, anyhow::Error> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let spec = self
            .specs
            .lock()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused: {}", endpoint))?;
        if spec.reject_credential {
            return Err(anyhow::anyhow!("unauthorized: credential rejected"));
        }
        if spec.fail_connect {
            return Err(anyhow::anyhow!("connection reset by peer"));
        }
        Ok(Box::new(MockConnection {
            endpoint: endpoint.to_string(),
            specs: Arc::clone(&self.specs),
            invoke_counts: Arc::clone(&self.invoke_counts),
        }))
    }
}

struct MockConnection {
    endpoint: String,
    specs: SharedSpecs,
    invoke_counts: SharedCounts,
}

impl MockConnection {
    fn spec(&self) -> MockBackendSpec {
        self.specs.lock().get(&self.endpoint).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl BackendConnection for MockConnection {
    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, anyhow::Error> {
        Ok(self.spec().capabilities)
    }

    async fn invoke(&self, capability_id: &str, params: Value) -> Result<Value, anyhow::Error> {
        let spec = self.spec();
        if !spec.latency.is_zero() {
            tokio::time::sleep(spec.latency).await;
        }
        *self
            .invoke_counts
            .lock()
            .entry(self.endpoint.clone())
            .or_insert(0) += 1;
        if spec.fail_invoke {
            return Err(anyhow::anyhow!("remote call failed"));
        }
        Ok(spec.response.unwrap_or_else(|| {
            json!({
                "endpoint": self.endpoint,
                "capability": capability_id,
                "params": params,
            })
        }))
    }

    async fn close(&self) {}
}

/// Merger that counts how many times it runs.
pub(crate) struct CountingMerger(pub Arc<AtomicUsize>);

impl crate::aggregate::ResultMerger for CountingMerger {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn merge(&self, _capability_id: &str, results: &[(String, Value)]) -> Value {
        self.0.fetch_add(1, Ordering::SeqCst);
        json!(results.len())
    }
}

/// Data-query descriptor shorthand.
pub(crate) fn cap(id: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::new(id, CapabilityKind::DataQuery)
}

/// Versioned data-query descriptor shorthand.
pub(crate) fn cap_v(id: &str, version: &str) -> CapabilityDescriptor {
    cap(id).with_version(version)
}
