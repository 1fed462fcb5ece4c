//! Conflict resolution over a raw provider list.
//!
//! Resolution is deterministic and side-effect-free: the same candidates and
//! policy always produce the same answer, and the index's raw list is never
//! mutated. The resolver returns one or more provider entries; for `Merge`
//! the first entry is the synthetic merged descriptor and the remaining
//! entries are the contributing candidates, so the invocation layer knows
//! which backends to fan out to.

use crate::capabilities::{CapabilityDescriptor, ProviderEntry, Version};

use super::policy::{ConflictPolicy, ConflictStrategy};

/// Reserved backend id carried by the synthetic descriptor produced by
/// [`ConflictStrategy::Merge`]. Not a real backend.
pub const MERGED_BACKEND_ID: &str = "merged";

/// Resolve colliding providers for `capability_id` per the configured
/// policy.
///
/// With zero or one candidate there is nothing to resolve and the input is
/// returned as-is.
pub fn resolve(
    policy: &ConflictPolicy,
    capability_id: &str,
    candidates: &[ProviderEntry],
) -> Vec<ProviderEntry> {
    if candidates.len() <= 1 {
        return candidates.to_vec();
    }
    let strategy = policy.strategy_for(capability_id);
    let resolved = apply(strategy, policy, capability_id, candidates);
    log::debug!(
        "conflict resolved: capability='{}', strategy='{}', candidates={}, winners={}",
        capability_id,
        strategy,
        candidates.len(),
        resolved.len()
    );
    resolved
}

fn apply(
    strategy: ConflictStrategy,
    policy: &ConflictPolicy,
    capability_id: &str,
    candidates: &[ProviderEntry],
) -> Vec<ProviderEntry> {
    match strategy {
        ConflictStrategy::FirstBackend => vec![candidates[0].clone()],
        ConflictStrategy::LastBackend => vec![candidates[candidates.len() - 1].clone()],
        ConflictStrategy::NewestVersion => {
            vec![pick_by_version(candidates, true).clone()]
        }
        ConflictStrategy::OldestVersion => {
            vec![pick_by_version(candidates, false).clone()]
        }
        ConflictStrategy::BackendPriority => {
            // Highest priority wins; the first candidate holding it breaks
            // ties, which keeps discovery order authoritative.
            let top = candidates
                .iter()
                .map(|c| policy.priority_of(&c.backend_id))
                .max()
                .unwrap_or(0);
            let winner = candidates
                .iter()
                .find(|c| policy.priority_of(&c.backend_id) == top)
                .unwrap_or(&candidates[0]);
            vec![winner.clone()]
        }
        ConflictStrategy::UserPreference => {
            if let Some(preferred) = policy.preferred_backends.get(capability_id) {
                if let Some(winner) = candidates.iter().find(|c| &c.backend_id == preferred) {
                    return vec![winner.clone()];
                }
            }
            // No usable preference: fall back to the default strategy,
            // guarding against a self-referential default.
            let fallback = if policy.default_strategy == ConflictStrategy::UserPreference {
                ConflictStrategy::FirstBackend
            } else {
                policy.default_strategy
            };
            apply(fallback, policy, capability_id, candidates)
        }
        ConflictStrategy::Merge => {
            let mut resolved = Vec::with_capacity(candidates.len() + 1);
            resolved.push(ProviderEntry {
                backend_id: MERGED_BACKEND_ID.to_string(),
                descriptor: merge_descriptors(capability_id, candidates),
            });
            resolved.extend(candidates.iter().cloned());
            resolved
        }
    }
}

fn pick_by_version(candidates: &[ProviderEntry], newest: bool) -> &ProviderEntry {
    let version_of = |c: &ProviderEntry| Version::parse_opt(c.descriptor.version.as_deref());
    let best = if newest {
        candidates.iter().map(version_of).max()
    } else {
        candidates.iter().map(version_of).min()
    };
    let best = best.unwrap_or_else(|| Version::parse(""));
    // First candidate carrying the winning version, so ties keep discovery
    // order.
    candidates
        .iter()
        .find(|c| version_of(c) == best)
        .unwrap_or(&candidates[0])
}

/// Build the synthetic merged descriptor: kind and description from the
/// first candidate, no version, parameter schema as the union of all
/// candidates (deduplicated by name, first occurrence wins).
fn merge_descriptors(capability_id: &str, candidates: &[ProviderEntry]) -> CapabilityDescriptor {
    let first = &candidates[0].descriptor;
    let mut merged = CapabilityDescriptor::new(capability_id, first.kind)
        .with_description(first.description.clone());
    merged.owning_backend = MERGED_BACKEND_ID.to_string();
    for candidate in candidates {
        for (name, spec) in &candidate.descriptor.parameter_schema {
            merged
                .parameter_schema
                .entry(name.clone())
                .or_insert_with(|| spec.clone());
        }
    }
    merged
}
