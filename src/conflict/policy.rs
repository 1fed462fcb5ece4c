//! Conflict-resolution policy configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConflictStrategy
// ---------------------------------------------------------------------------

/// How to pick the authoritative provider(s) among colliding descriptors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The backend that reported the capability first (discovery order).
    #[default]
    FirstBackend,
    /// The backend that reported the capability last.
    LastBackend,
    /// The candidate with the numerically highest `major.minor.patch`
    /// version; ties fall back to `FirstBackend`.
    NewestVersion,
    /// The candidate with the numerically lowest version; ties fall back to
    /// `FirstBackend`.
    OldestVersion,
    /// The candidate whose backend has the highest configured priority
    /// (default priority 0); ties fall back to `FirstBackend`.
    BackendPriority,
    /// The user-preferred backend for this capability, if it is among the
    /// candidates; otherwise the policy's default strategy.
    UserPreference,
    /// Synthesize one descriptor owned by the reserved `"merged"` backend
    /// id, with the union of all candidates' parameter schemas. Invoking a
    /// capability resolved this way fans out to every contributing backend
    /// and merges the results, the same way an explicit fan-out invocation
    /// does.
    Merge,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConflictStrategy::FirstBackend => "first_backend",
            ConflictStrategy::LastBackend => "last_backend",
            ConflictStrategy::NewestVersion => "newest_version",
            ConflictStrategy::OldestVersion => "oldest_version",
            ConflictStrategy::BackendPriority => "backend_priority",
            ConflictStrategy::UserPreference => "user_preference",
            ConflictStrategy::Merge => "merge",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ConflictPolicy
// ---------------------------------------------------------------------------

/// Process-wide conflict-resolution configuration.
///
/// Mutable by the caller at any time via
/// [`Orchestrator::set_conflict_policy`](crate::orchestrator::Orchestrator::set_conflict_policy);
/// takes effect on the next resolution, never retroactively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictPolicy {
    /// Strategy applied when no per-capability override matches.
    #[serde(default)]
    pub default_strategy: ConflictStrategy,

    /// Per-capability strategy overrides, keyed by capability id.
    #[serde(default)]
    pub capability_overrides: HashMap<String, ConflictStrategy>,

    /// Backend priority map for `BackendPriority`. Unlisted backends have
    /// priority 0.
    #[serde(default)]
    pub backend_priority: HashMap<String, i64>,

    /// User-preferred backend per capability id, for `UserPreference`.
    #[serde(default)]
    pub preferred_backends: HashMap<String, String>,
}

impl ConflictPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default strategy.
    pub fn with_default_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Override the strategy for one capability id.
    pub fn with_override(
        mut self,
        capability_id: impl Into<String>,
        strategy: ConflictStrategy,
    ) -> Self {
        self.capability_overrides
            .insert(capability_id.into(), strategy);
        self
    }

    /// Assign a priority to a backend.
    pub fn with_backend_priority(mut self, backend_id: impl Into<String>, priority: i64) -> Self {
        self.backend_priority.insert(backend_id.into(), priority);
        self
    }

    /// Record the user-preferred backend for a capability.
    pub fn with_preferred_backend(
        mut self,
        capability_id: impl Into<String>,
        backend_id: impl Into<String>,
    ) -> Self {
        self.preferred_backends
            .insert(capability_id.into(), backend_id.into());
        self
    }

    /// The strategy in effect for `capability_id`.
    pub fn strategy_for(&self, capability_id: &str) -> ConflictStrategy {
        self.capability_overrides
            .get(capability_id)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    /// The configured priority of a backend (0 when unlisted).
    pub fn priority_of(&self, backend_id: &str) -> i64 {
        self.backend_priority.get(backend_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_first_backend() {
        let policy = ConflictPolicy::new();
        assert_eq!(
            policy.strategy_for("anything"),
            ConflictStrategy::FirstBackend
        );
        assert_eq!(policy.priority_of("anyone"), 0);
    }

    #[test]
    fn test_override_beats_default() {
        let policy = ConflictPolicy::new()
            .with_default_strategy(ConflictStrategy::NewestVersion)
            .with_override("search.docs", ConflictStrategy::Merge);
        assert_eq!(policy.strategy_for("search.docs"), ConflictStrategy::Merge);
        assert_eq!(
            policy.strategy_for("weather.forecast"),
            ConflictStrategy::NewestVersion
        );
    }

    #[test]
    fn test_policy_deserializes_from_yaml() {
        let yaml = r#"
default_strategy: backend_priority
backend_priority:
  primary: 10
  fallback: 1
preferred_backends:
  weather.forecast: primary
"#;
        let policy: ConflictPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.default_strategy, ConflictStrategy::BackendPriority);
        assert_eq!(policy.priority_of("primary"), 10);
        assert_eq!(
            policy.preferred_backends.get("weather.forecast").unwrap(),
            "primary"
        );
    }
}
