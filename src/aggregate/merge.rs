//! Result mergers — combine the successful branches of a fan-out
//! invocation into one answer.
//!
//! Mergers are pluggable and matched by the capability id's namespace:
//! `search.documents` consults the merger registered for `search`. When no
//! registered namespace matches, the default merger returns the full tagged
//! map of per-backend results, so nothing is ever silently discarded.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::capabilities::namespace_of;

/// Combines the successful per-backend results of one fan-out invocation.
///
/// `results` holds `(backend_id, value)` pairs in dispatch order and is
/// never empty: aggregation fails before merging when no branch succeeded.
pub trait ResultMerger: Send + Sync {
    /// Merger name for logging and registry introspection.
    fn name(&self) -> &'static str;

    /// Merge the success values into one answer.
    fn merge(&self, capability_id: &str, results: &[(String, Value)]) -> Value;
}

// ---------------------------------------------------------------------------
// Built-in mergers
// ---------------------------------------------------------------------------

/// Default merger: the full tagged map of per-backend results.
pub struct TaggedMapMerger;

impl ResultMerger for TaggedMapMerger {
    fn name(&self) -> &'static str {
        "tagged_map"
    }

    fn merge(&self, _capability_id: &str, results: &[(String, Value)]) -> Value {
        let mut map = Map::new();
        for (backend_id, value) in results {
            map.insert(backend_id.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Concatenates list results and deduplicates, first occurrence wins.
/// Non-array results are treated as single-element lists.
pub struct ListUnionMerger;

impl ResultMerger for ListUnionMerger {
    fn name(&self) -> &'static str {
        "list_union"
    }

    fn merge(&self, _capability_id: &str, results: &[(String, Value)]) -> Value {
        let mut merged: Vec<Value> = Vec::new();
        for (_, value) in results {
            let items: Vec<Value> = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            for item in items {
                if !merged.contains(&item) {
                    merged.push(item);
                }
            }
        }
        Value::Array(merged)
    }
}

/// Averages numeric results field-by-field; non-numeric fields are resolved
/// by majority vote (ties keep the first-seen value).
///
/// Plain numeric results are averaged directly; anything else that is not
/// an object falls back to a whole-value majority vote.
pub struct NumericAverageMerger;

impl NumericAverageMerger {
    fn average(samples: &[f64]) -> Value {
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        json!(mean)
    }

    fn majority(values: Vec<&Value>) -> Value {
        let mut tally: Vec<(&Value, usize)> = Vec::new();
        for value in values {
            if let Some(slot) = tally.iter_mut().find(|(seen, _)| *seen == value) {
                slot.1 += 1;
            } else {
                tally.push((value, 1));
            }
        }
        // Ties keep the first-seen value.
        let mut best: Option<(&Value, usize)> = None;
        for (value, count) in &tally {
            if best.map(|(_, top)| *count > top).unwrap_or(true) {
                best = Some((value, *count));
            }
        }
        best.map(|(value, _)| value.clone()).unwrap_or(Value::Null)
    }
}

impl ResultMerger for NumericAverageMerger {
    fn name(&self) -> &'static str {
        "numeric_average"
    }

    fn merge(&self, _capability_id: &str, results: &[(String, Value)]) -> Value {
        let numbers: Vec<f64> = results
            .iter()
            .filter_map(|(_, value)| value.as_f64())
            .collect();
        if numbers.len() == results.len() {
            return Self::average(&numbers);
        }

        let objects: Vec<&Map<String, Value>> = results
            .iter()
            .filter_map(|(_, value)| value.as_object())
            .collect();
        if objects.len() != results.len() {
            return Self::majority(results.iter().map(|(_, value)| value).collect());
        }

        // Field union in first-seen order; numeric fields averaged across
        // the objects that carry them, everything else majority-voted.
        let mut field_order: Vec<&String> = Vec::new();
        for object in &objects {
            for field in object.keys() {
                if !field_order.contains(&field) {
                    field_order.push(field);
                }
            }
        }

        let mut merged = Map::new();
        for field in field_order {
            let present: Vec<&Value> =
                objects.iter().filter_map(|object| object.get(field)).collect();
            let numeric: Vec<f64> = present.iter().filter_map(|value| value.as_f64()).collect();
            let folded = if numeric.len() == present.len() {
                Self::average(&numeric)
            } else {
                Self::majority(present)
            };
            merged.insert(field.clone(), folded);
        }
        Value::Object(merged)
    }
}

/// Picks the result with the highest `confidence` field; a missing or
/// non-numeric confidence counts as 0. Ties keep dispatch order.
pub struct HighestConfidenceMerger;

impl ResultMerger for HighestConfidenceMerger {
    fn name(&self) -> &'static str {
        "highest_confidence"
    }

    fn merge(&self, _capability_id: &str, results: &[(String, Value)]) -> Value {
        let confidence_of = |value: &Value| {
            value
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };
        let mut best: Option<(&Value, f64)> = None;
        for (_, value) in results {
            let confidence = confidence_of(value);
            if best.map(|(_, b)| confidence > b).unwrap_or(true) {
                best = Some((value, confidence));
            }
        }
        best.map(|(value, _)| value.clone()).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// MergerRegistry
// ---------------------------------------------------------------------------

/// Built-in namespace associations installed by
/// [`MergerRegistry::with_defaults`].
static DEFAULT_PREFIXES: Lazy<Vec<(&'static str, Arc<dyn ResultMerger>)>> = Lazy::new(|| {
    let list_union: Arc<dyn ResultMerger> = Arc::new(ListUnionMerger);
    let numeric: Arc<dyn ResultMerger> = Arc::new(NumericAverageMerger);
    let confidence: Arc<dyn ResultMerger> = Arc::new(HighestConfidenceMerger);
    vec![
        ("search", Arc::clone(&list_union)),
        ("sensor", Arc::clone(&numeric)),
        ("metrics", numeric),
        ("classify", Arc::clone(&confidence)),
        ("classification", confidence),
    ]
});

/// Namespace-keyed merger lookup with a default fallback.
pub struct MergerRegistry {
    by_namespace: HashMap<String, Arc<dyn ResultMerger>>,
    default: Arc<dyn ResultMerger>,
}

impl MergerRegistry {
    /// Empty registry; everything resolves to the tagged-map default.
    pub fn new() -> Self {
        Self {
            by_namespace: HashMap::new(),
            default: Arc::new(TaggedMapMerger),
        }
    }

    /// Registry pre-loaded with the built-in namespace associations.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (namespace, merger) in DEFAULT_PREFIXES.iter() {
            registry.register(*namespace, Arc::clone(merger));
        }
        registry
    }

    /// Associate a namespace with a merger, replacing any prior binding.
    pub fn register(&mut self, namespace: impl Into<String>, merger: Arc<dyn ResultMerger>) {
        self.by_namespace.insert(namespace.into(), merger);
    }

    /// The merger in effect for a capability id.
    pub fn resolve(&self, capability_id: &str) -> Arc<dyn ResultMerger> {
        self.by_namespace
            .get(namespace_of(capability_id))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

impl Default for MergerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(backend, value)| (backend.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_tagged_map_default() {
        let merger = TaggedMapMerger;
        let merged = merger.merge(
            "anything.at_all",
            &tagged(&[("b1", json!(1)), ("b2", json!("x"))]),
        );
        assert_eq!(merged, json!({"b1": 1, "b2": "x"}));
    }

    #[test]
    fn test_list_union_dedups_preserving_order() {
        let merger = ListUnionMerger;
        let merged = merger.merge(
            "search.docs",
            &tagged(&[
                ("b1", json!(["x", "y"])),
                ("b2", json!(["y", "z"])),
                ("b3", json!("w")),
            ]),
        );
        assert_eq!(merged, json!(["x", "y", "z", "w"]));
    }

    #[test]
    fn test_numeric_average_plain_numbers() {
        let merger = NumericAverageMerger;
        let merged = merger.merge(
            "sensor.temp",
            &tagged(&[("b1", json!(10.0)), ("b2", json!(20.0))]),
        );
        assert_eq!(merged, json!(15.0));
    }

    #[test]
    fn test_numeric_average_objects_with_majority_vote() {
        let merger = NumericAverageMerger;
        let merged = merger.merge(
            "sensor.reading",
            &tagged(&[
                ("b1", json!({"value": 10.0, "unit": "C"})),
                ("b2", json!({"value": 30.0, "unit": "C"})),
                ("b3", json!({"value": 20.0, "unit": "F"})),
            ]),
        );
        assert_eq!(merged["value"], json!(20.0));
        assert_eq!(merged["unit"], json!("C"));
    }

    #[test]
    fn test_highest_confidence_wins() {
        let merger = HighestConfidenceMerger;
        let merged = merger.merge(
            "classify.intent",
            &tagged(&[
                ("b1", json!({"label": "spam", "confidence": 0.7})),
                ("b2", json!({"label": "ham", "confidence": 0.9})),
                ("b3", json!({"label": "eggs"})),
            ]),
        );
        assert_eq!(merged["label"], json!("ham"));
    }

    #[test]
    fn test_registry_matches_namespace() {
        let registry = MergerRegistry::with_defaults();
        assert_eq!(registry.resolve("search.documents").name(), "list_union");
        assert_eq!(registry.resolve("sensor.temp").name(), "numeric_average");
        assert_eq!(
            registry.resolve("classify.intent").name(),
            "highest_confidence"
        );
        assert_eq!(registry.resolve("weather.forecast").name(), "tagged_map");
    }

    #[test]
    fn test_registry_custom_registration_overrides() {
        let mut registry = MergerRegistry::with_defaults();
        registry.register("search", Arc::new(TaggedMapMerger));
        assert_eq!(registry.resolve("search.documents").name(), "tagged_map");
    }
}
