//! Routing strategies.
//!
//! A strategy picks one backend among the eligible providers of a
//! capability. Shared numeric feedback (latency, in-flight, outcome counts)
//! lives in [`RoutingMetrics`] and is fed by the invocation layer; the
//! `record_outcome` hook exists for strategies that keep private state and
//! is a no-op for the built-ins.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::metrics::RoutingMetrics;

/// Picks one backend among the eligible candidates for a single invocation.
pub trait RoutingStrategy: Send + Sync {
    /// Strategy name for logging and configuration.
    fn name(&self) -> &'static str;

    /// Choose one of `candidates` for `capability_id`. Candidates arrive in
    /// discovery order. Returns `None` only when `candidates` is empty.
    fn select(
        &self,
        capability_id: &str,
        candidates: &[String],
        metrics: &RoutingMetrics,
    ) -> Option<String>;

    /// Feedback hook called after each routed invocation completes.
    fn record_outcome(
        &self,
        _backend_id: &str,
        _capability_id: &str,
        _duration_ms: f64,
        _success: bool,
    ) {
    }
}

/// Build a strategy from its configuration name.
pub fn strategy_by_name(name: &str) -> Option<Arc<dyn RoutingStrategy>> {
    match name {
        "random" => Some(Arc::new(Random)),
        "round_robin" => Some(Arc::new(RoundRobin::new())),
        "latency_ewma" => Some(Arc::new(LatencyEwma::new())),
        "least_in_flight" => Some(Arc::new(LeastInFlight)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Random
// ---------------------------------------------------------------------------

/// Uniform random choice.
pub struct Random;

impl RoutingStrategy for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(
        &self,
        _capability_id: &str,
        candidates: &[String],
        _metrics: &RoutingMetrics,
    ) -> Option<String> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }
}

// ---------------------------------------------------------------------------
// RoundRobin
// ---------------------------------------------------------------------------

/// Per-capability cursor advancing modulo candidate count on every select.
/// Cursor state persists across calls, so N selects over N candidates visit
/// each one exactly once.
pub struct RoundRobin {
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(
        &self,
        capability_id: &str,
        candidates: &[String],
        _metrics: &RoutingMetrics,
    ) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(capability_id.to_string()).or_insert(0);
        let chosen = candidates[*cursor % candidates.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Some(chosen)
    }
}

// ---------------------------------------------------------------------------
// LatencyEwma
// ---------------------------------------------------------------------------

/// Lowest current latency EWMA wins.
///
/// Until every candidate has at least one recorded sample the strategy
/// degrades to round-robin, which is what produces the missing warm-up
/// samples in the first place.
pub struct LatencyEwma {
    warmup: RoundRobin,
}

impl LatencyEwma {
    pub fn new() -> Self {
        Self {
            warmup: RoundRobin::new(),
        }
    }
}

impl Default for LatencyEwma {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingStrategy for LatencyEwma {
    fn name(&self) -> &'static str {
        "latency_ewma"
    }

    fn select(
        &self,
        capability_id: &str,
        candidates: &[String],
        metrics: &RoutingMetrics,
    ) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let mut best: Option<(&String, f64)> = None;
        for candidate in candidates {
            match metrics.latency_ewma(candidate, capability_id) {
                Some(latency) => {
                    if best.map(|(_, b)| latency < b).unwrap_or(true) {
                        best = Some((candidate, latency));
                    }
                }
                None => return self.warmup.select(capability_id, candidates, metrics),
            }
        }
        best.map(|(backend, _)| backend.clone())
    }
}

// ---------------------------------------------------------------------------
// LeastInFlight
// ---------------------------------------------------------------------------

/// Fewest currently-outstanding requests wins; ties keep discovery order.
///
/// The in-flight gauge is reserved at dispatch and released exactly once per
/// dispatch, on success, error, and timeout alike (see
/// [`RoutingMetrics::begin_invocation`]).
pub struct LeastInFlight;

impl RoutingStrategy for LeastInFlight {
    fn name(&self) -> &'static str {
        "least_in_flight"
    }

    fn select(
        &self,
        capability_id: &str,
        candidates: &[String],
        metrics: &RoutingMetrics,
    ) -> Option<String> {
        let mut best: Option<(&String, u64)> = None;
        for candidate in candidates {
            let outstanding = metrics.in_flight(candidate, capability_id);
            if best.map(|(_, b)| outstanding < b).unwrap_or(true) {
                best = Some((candidate, outstanding));
            }
        }
        best.map(|(backend, _)| backend.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn backends(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_round_robin_visits_each_once_per_cycle() {
        let metrics = Arc::new(RoutingMetrics::new());
        let strategy = RoundRobin::new();
        let candidates = backends(&["a", "b", "c"]);

        let mut seen = HashSet::new();
        for _ in 0..candidates.len() {
            seen.insert(strategy.select("cap", &candidates, &metrics).unwrap());
        }
        assert_eq!(seen.len(), 3);

        // The next full cycle repeats the same set.
        let mut second = HashSet::new();
        for _ in 0..candidates.len() {
            second.insert(strategy.select("cap", &candidates, &metrics).unwrap());
        }
        assert_eq!(seen, second);
    }

    #[test]
    fn test_round_robin_cursor_is_per_capability() {
        let metrics = Arc::new(RoutingMetrics::new());
        let strategy = RoundRobin::new();
        let candidates = backends(&["a", "b"]);

        assert_eq!(
            strategy.select("cap1", &candidates, &metrics).unwrap(),
            "a"
        );
        // A different capability starts its own cycle.
        assert_eq!(
            strategy.select("cap2", &candidates, &metrics).unwrap(),
            "a"
        );
        assert_eq!(
            strategy.select("cap1", &candidates, &metrics).unwrap(),
            "b"
        );
    }

    #[test]
    fn test_random_stays_within_candidates() {
        let metrics = Arc::new(RoutingMetrics::new());
        let strategy = Random;
        let candidates = backends(&["a", "b"]);
        for _ in 0..20 {
            let chosen = strategy.select("cap", &candidates, &metrics).unwrap();
            assert!(candidates.contains(&chosen));
        }
        assert!(strategy.select("cap", &[], &metrics).is_none());
    }

    #[test]
    fn test_latency_ewma_falls_back_until_warm() {
        let metrics = Arc::new(RoutingMetrics::new());
        let strategy = LatencyEwma::new();
        let candidates = backends(&["a", "b"]);

        // No samples at all: round-robin territory, both get visited.
        let first = strategy.select("cap", &candidates, &metrics).unwrap();
        let second = strategy.select("cap", &candidates, &metrics).unwrap();
        assert_ne!(first, second);

        // Only one candidate warm: still falling back.
        metrics.begin_invocation("a", "cap").complete(5.0, true);
        assert!(strategy.select("cap", &candidates, &metrics).is_some());
    }

    #[test]
    fn test_latency_ewma_prefers_faster_after_warmup() {
        let metrics = Arc::new(RoutingMetrics::new());
        let strategy = LatencyEwma::new();
        let candidates = backends(&["a", "b"]);

        metrics.begin_invocation("a", "cap").complete(10.0, true);
        metrics.begin_invocation("b", "cap").complete(80.0, true);

        for _ in 0..5 {
            assert_eq!(strategy.select("cap", &candidates, &metrics).unwrap(), "a");
        }
    }

    #[test]
    fn test_least_in_flight_picks_idlest() {
        let metrics = Arc::new(RoutingMetrics::new());
        let strategy = LeastInFlight;
        let candidates = backends(&["a", "b"]);

        let _a1 = metrics.begin_invocation("a", "cap");
        let _a2 = metrics.begin_invocation("a", "cap");
        let _b1 = metrics.begin_invocation("b", "cap");

        assert_eq!(strategy.select("cap", &candidates, &metrics).unwrap(), "b");
    }

    #[test]
    fn test_least_in_flight_tie_keeps_order() {
        let metrics = Arc::new(RoutingMetrics::new());
        let strategy = LeastInFlight;
        let candidates = backends(&["a", "b"]);
        assert_eq!(strategy.select("cap", &candidates, &metrics).unwrap(), "a");
    }

    #[test]
    fn test_strategy_by_name() {
        assert_eq!(strategy_by_name("random").unwrap().name(), "random");
        assert_eq!(
            strategy_by_name("least_in_flight").unwrap().name(),
            "least_in_flight"
        );
        assert!(strategy_by_name("beam_search").is_none());
    }
}
