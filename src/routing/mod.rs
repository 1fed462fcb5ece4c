//! Routing: per-(backend, capability) feedback metrics and the pluggable
//! strategies that pick one backend among several eligible providers.

pub mod metrics;
pub mod strategy;

pub use metrics::{InFlightGuard, MetricSample, MetricsEntry, RoutingMetrics, EWMA_ALPHA};
pub use strategy::{
    strategy_by_name, LatencyEwma, LeastInFlight, Random, RoundRobin, RoutingStrategy,
};
