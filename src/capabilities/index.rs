//! Capability index — aggregates the descriptors reported by all connected
//! backends and flags id collisions.
//!
//! The index stores, per capability id, the ordered list of providers in
//! discovery order. More than one provider for an id is a conflict; the
//! index only detects conflicts, it never decides which provider wins.
//! Resolution is a read-time decision made by the conflict resolver, so the
//! raw multi-provider list always stays available for re-resolution when the
//! policy changes.
//!
//! Entries are maintained incrementally: a backend's entries are replaced
//! wholesale when it (re-)discovers and pruned synchronously when it
//! disconnects. The index lock is held only across map mutation, never
//! across I/O.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use super::descriptor::CapabilityDescriptor;

/// One provider of a capability: the backend id plus the descriptor it
/// reported.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub backend_id: String,
    pub descriptor: CapabilityDescriptor,
}

/// Introspection row: one capability id and how many backends provide it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilitySummary {
    pub id: String,
    pub provider_count: usize,
}

/// Capability id → ordered provider list, for all connected backends.
#[derive(Debug, Default)]
pub struct CapabilityIndex {
    entries: RwLock<HashMap<String, Vec<ProviderEntry>>>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every entry owned by `backend_id` with `descriptors`.
    ///
    /// This is the publication step of discovery: prior entries from this
    /// backend are removed first, then the new descriptors are appended in
    /// report order. The descriptors' `owning_backend` field is overwritten
    /// with `backend_id`.
    pub fn replace_backend(&self, backend_id: &str, descriptors: Vec<CapabilityDescriptor>) {
        let mut entries = self.entries.write();
        Self::prune(&mut entries, backend_id);

        let published = descriptors.len();
        let mut conflicts = 0usize;
        for mut descriptor in descriptors {
            descriptor.owning_backend = backend_id.to_string();
            let providers = entries.entry(descriptor.id.clone()).or_default();
            providers.push(ProviderEntry {
                backend_id: backend_id.to_string(),
                descriptor,
            });
            if providers.len() > 1 {
                conflicts += 1;
            }
        }
        drop(entries);

        log::debug!(
            "capability index updated: backend='{}', published={}, conflicting={}",
            backend_id,
            published,
            conflicts
        );
    }

    /// Remove every entry owned by `backend_id`.
    pub fn remove_backend(&self, backend_id: &str) {
        let mut entries = self.entries.write();
        Self::prune(&mut entries, backend_id);
    }

    fn prune(entries: &mut HashMap<String, Vec<ProviderEntry>>, backend_id: &str) {
        entries.retain(|_, providers| {
            providers.retain(|p| p.backend_id != backend_id);
            !providers.is_empty()
        });
    }

    /// The raw provider list for a capability id, in discovery order.
    /// Empty when no connected backend lists the id.
    pub fn lookup(&self, capability_id: &str) -> Vec<ProviderEntry> {
        self.entries
            .read()
            .get(capability_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every known capability id with its provider count, sorted by id.
    pub fn list_all(&self) -> Vec<CapabilitySummary> {
        let entries = self.entries.read();
        let mut summaries: Vec<CapabilitySummary> = entries
            .iter()
            .map(|(id, providers)| CapabilitySummary {
                id: id.clone(),
                provider_count: providers.len(),
            })
            .collect();
        drop(entries);
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Whether more than one backend currently lists this id.
    pub fn is_conflicted(&self, capability_id: &str) -> bool {
        self.entries
            .read()
            .get(capability_id)
            .map(|providers| providers.len() > 1)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::descriptor::CapabilityKind;

    fn cap(id: &str) -> CapabilityDescriptor {
        CapabilityDescriptor::new(id, CapabilityKind::DataQuery)
    }

    #[test]
    fn test_publish_and_lookup() {
        let index = CapabilityIndex::new();
        index.replace_backend("b1", vec![cap("weather.forecast"), cap("search.docs")]);

        let providers = index.lookup("weather.forecast");
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].backend_id, "b1");
        assert_eq!(providers[0].descriptor.owning_backend, "b1");
        assert!(index.lookup("missing.cap").is_empty());
    }

    #[test]
    fn test_conflict_detection_in_discovery_order() {
        let index = CapabilityIndex::new();
        index.replace_backend("b1", vec![cap("weather.forecast")]);
        assert!(!index.is_conflicted("weather.forecast"));

        index.replace_backend("b2", vec![cap("weather.forecast")]);
        assert!(index.is_conflicted("weather.forecast"));

        let providers = index.lookup("weather.forecast");
        assert_eq!(providers[0].backend_id, "b1");
        assert_eq!(providers[1].backend_id, "b2");
    }

    #[test]
    fn test_rediscovery_replaces_wholesale() {
        let index = CapabilityIndex::new();
        index.replace_backend("b1", vec![cap("a.one"), cap("a.two")]);
        index.replace_backend("b1", vec![cap("a.three")]);

        assert!(index.lookup("a.one").is_empty());
        assert!(index.lookup("a.two").is_empty());
        assert_eq!(index.lookup("a.three").len(), 1);
    }

    #[test]
    fn test_remove_backend_prunes_solely_owned_keeps_shared() {
        let index = CapabilityIndex::new();
        index.replace_backend("b1", vec![cap("shared.cap"), cap("solo.cap")]);
        index.replace_backend("b2", vec![cap("shared.cap")]);

        index.remove_backend("b1");

        let all = index.list_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "shared.cap");
        assert_eq!(all[0].provider_count, 1);
        assert!(index.lookup("solo.cap").is_empty());
    }

    #[test]
    fn test_list_all_sorted_with_counts() {
        let index = CapabilityIndex::new();
        index.replace_backend("b1", vec![cap("z.cap"), cap("a.cap")]);
        index.replace_backend("b2", vec![cap("a.cap")]);

        let all = index.list_all();
        assert_eq!(all[0].id, "a.cap");
        assert_eq!(all[0].provider_count, 2);
        assert_eq!(all[1].id, "z.cap");
        assert_eq!(all[1].provider_count, 1);
    }
}
