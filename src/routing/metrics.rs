//! Routing feedback metrics.
//!
//! One cell per `(backend_id, capability_id)` pair: latency EWMA, in-flight
//! gauge, success and failure counters. Cells are created lazily on first
//! invocation, updated after every completion, and deleted only when the
//! backend is removed. Updates go through the sharded map's entry API, so
//! each counter movement and EWMA fold is atomic per key even under
//! concurrent completions.
//!
//! Every dispatch opens an [`InFlightGuard`]; completing the guard records
//! the outcome and releases the in-flight reservation exactly once. A guard
//! dropped without completion (a cancelled branch) still releases the
//! reservation, so cancellation never leaks in-flight counts.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

/// Smoothing factor for the latency exponential moving average:
/// `new = ALPHA * sample + (1 - ALPHA) * old`.
pub const EWMA_ALPHA: f64 = 0.2;

/// One metrics cell.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricSample {
    /// Exponential moving average of successful-call latency, milliseconds.
    /// `None` until the first successful completion.
    pub latency_ewma_ms: Option<f64>,
    /// Currently outstanding invocations.
    pub in_flight: u64,
    /// Completed successful invocations.
    pub success: u64,
    /// Completed failed invocations (errors and timeouts).
    pub failure: u64,
}

/// Snapshot row for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsEntry {
    pub backend_id: String,
    pub capability_id: String,
    #[serde(flatten)]
    pub sample: MetricSample,
}

/// Concurrent metrics store keyed by `(backend_id, capability_id)`.
///
/// Cloning is cheap and shares the underlying cells, which lets the
/// in-flight guard carry the store into spawned branches.
#[derive(Debug, Clone, Default)]
pub struct RoutingMetrics {
    cells: Arc<DashMap<(String, String), MetricSample>>,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an in-flight reservation for one dispatch.
    ///
    /// The reservation is visible to concurrent readers immediately; the
    /// returned guard must be completed with the outcome, and releases the
    /// reservation on drop if it never is.
    pub fn begin_invocation(&self, backend_id: &str, capability_id: &str) -> InFlightGuard {
        self.cells
            .entry(key(backend_id, capability_id))
            .or_default()
            .in_flight += 1;
        InFlightGuard {
            metrics: self.clone(),
            backend_id: backend_id.to_string(),
            capability_id: capability_id.to_string(),
            armed: true,
        }
    }

    /// Record a completion: releases the in-flight reservation and updates
    /// the counters. Failed calls are excluded from latency averaging but
    /// counted as failures.
    fn record_outcome(&self, backend_id: &str, capability_id: &str, duration_ms: f64, success: bool) {
        let mut cell = self.cells.entry(key(backend_id, capability_id)).or_default();
        cell.in_flight = cell.in_flight.saturating_sub(1);
        if success {
            cell.success += 1;
            cell.latency_ewma_ms = Some(match cell.latency_ewma_ms {
                Some(old) => EWMA_ALPHA * duration_ms + (1.0 - EWMA_ALPHA) * old,
                None => duration_ms,
            });
        } else {
            cell.failure += 1;
        }
    }

    /// Release a reservation without recording an outcome (cancelled
    /// dispatch).
    fn release(&self, backend_id: &str, capability_id: &str) {
        if let Some(mut cell) = self.cells.get_mut(&key(backend_id, capability_id)) {
            cell.in_flight = cell.in_flight.saturating_sub(1);
        }
    }

    /// Current latency EWMA for a pair, if any call has succeeded.
    pub fn latency_ewma(&self, backend_id: &str, capability_id: &str) -> Option<f64> {
        self.cells
            .get(&key(backend_id, capability_id))
            .and_then(|cell| cell.latency_ewma_ms)
    }

    /// Currently outstanding invocations for a pair.
    pub fn in_flight(&self, backend_id: &str, capability_id: &str) -> u64 {
        self.cells
            .get(&key(backend_id, capability_id))
            .map(|cell| cell.in_flight)
            .unwrap_or(0)
    }

    /// Full cell snapshot for a pair.
    pub fn sample(&self, backend_id: &str, capability_id: &str) -> Option<MetricSample> {
        self.cells
            .get(&key(backend_id, capability_id))
            .map(|cell| cell.clone())
    }

    /// Drop every cell belonging to a backend. Called when the backend is
    /// removed from the registry.
    pub fn remove_backend(&self, backend_id: &str) {
        self.cells.retain(|(backend, _), _| backend != backend_id);
    }

    /// All cells, sorted by backend then capability.
    pub fn snapshot(&self) -> Vec<MetricsEntry> {
        let mut entries: Vec<MetricsEntry> = self
            .cells
            .iter()
            .map(|item| MetricsEntry {
                backend_id: item.key().0.clone(),
                capability_id: item.key().1.clone(),
                sample: item.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.backend_id.as_str(), a.capability_id.as_str())
                .cmp(&(b.backend_id.as_str(), b.capability_id.as_str()))
        });
        entries
    }
}

fn key(backend_id: &str, capability_id: &str) -> (String, String) {
    (backend_id.to_string(), capability_id.to_string())
}

// ---------------------------------------------------------------------------
// InFlightGuard
// ---------------------------------------------------------------------------

/// Open reservation for one dispatched invocation.
#[derive(Debug)]
pub struct InFlightGuard {
    metrics: RoutingMetrics,
    backend_id: String,
    capability_id: String,
    armed: bool,
}

impl InFlightGuard {
    /// Record the outcome and release the reservation.
    pub fn complete(mut self, duration_ms: f64, success: bool) {
        self.armed = false;
        self.metrics
            .record_outcome(&self.backend_id, &self.capability_id, duration_ms, success);
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed {
            self.metrics.release(&self.backend_id, &self.capability_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation_and_counts() {
        let metrics = Arc::new(RoutingMetrics::new());
        assert!(metrics.sample("b1", "c1").is_none());

        let guard = metrics.begin_invocation("b1", "c1");
        assert_eq!(metrics.in_flight("b1", "c1"), 1);
        guard.complete(10.0, true);

        let sample = metrics.sample("b1", "c1").unwrap();
        assert_eq!(sample.in_flight, 0);
        assert_eq!(sample.success, 1);
        assert_eq!(sample.failure, 0);
        assert_eq!(sample.latency_ewma_ms, Some(10.0));
    }

    #[test]
    fn test_ewma_fold() {
        let metrics = Arc::new(RoutingMetrics::new());
        metrics.begin_invocation("b1", "c1").complete(100.0, true);
        metrics.begin_invocation("b1", "c1").complete(50.0, true);
        // 0.2 * 50 + 0.8 * 100 = 90
        let ewma = metrics.latency_ewma("b1", "c1").unwrap();
        assert!((ewma - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_excluded_from_latency() {
        let metrics = Arc::new(RoutingMetrics::new());
        metrics.begin_invocation("b1", "c1").complete(100.0, true);
        metrics.begin_invocation("b1", "c1").complete(9999.0, false);

        let sample = metrics.sample("b1", "c1").unwrap();
        assert_eq!(sample.failure, 1);
        assert_eq!(sample.latency_ewma_ms, Some(100.0));
        assert_eq!(sample.in_flight, 0);
    }

    #[test]
    fn test_dropped_guard_releases_reservation() {
        let metrics = Arc::new(RoutingMetrics::new());
        {
            let _guard = metrics.begin_invocation("b1", "c1");
            assert_eq!(metrics.in_flight("b1", "c1"), 1);
        }
        assert_eq!(metrics.in_flight("b1", "c1"), 0);
        // No outcome was recorded for the cancelled dispatch.
        let sample = metrics.sample("b1", "c1").unwrap();
        assert_eq!(sample.success + sample.failure, 0);
    }

    #[test]
    fn test_remove_backend_drops_all_cells() {
        let metrics = Arc::new(RoutingMetrics::new());
        metrics.begin_invocation("b1", "c1").complete(1.0, true);
        metrics.begin_invocation("b1", "c2").complete(1.0, true);
        metrics.begin_invocation("b2", "c1").complete(1.0, true);

        metrics.remove_backend("b1");
        assert!(metrics.sample("b1", "c1").is_none());
        assert!(metrics.sample("b1", "c2").is_none());
        assert!(metrics.sample("b2", "c1").is_some());
    }

    #[test]
    fn test_snapshot_sorted() {
        let metrics = Arc::new(RoutingMetrics::new());
        metrics.begin_invocation("b2", "c1").complete(1.0, true);
        metrics.begin_invocation("b1", "c2").complete(1.0, true);
        metrics.begin_invocation("b1", "c1").complete(1.0, false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].backend_id, "b1");
        assert_eq!(snapshot[0].capability_id, "c1");
        assert_eq!(snapshot[2].backend_id, "b2");
    }
}
