//! Capability descriptors — the schema-described operations backends offer.
//!
//! A capability id is dot-namespaced: `weather.forecast` lives in the
//! `weather` namespace. The namespace is what the merger registry matches
//! against when combining fan-out results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// CapabilityKind
// ---------------------------------------------------------------------------

/// What kind of operation a capability is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Performs an action with side effects.
    Action,
    /// Answers a query without mutating backend state.
    DataQuery,
    /// Produces templated content.
    Template,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityKind::Action => f.write_str("action"),
            CapabilityKind::DataQuery => f.write_str("data_query"),
            CapabilityKind::Template => f.write_str("template"),
        }
    }
}

// ---------------------------------------------------------------------------
// ParameterSpec
// ---------------------------------------------------------------------------

/// Schema for one capability parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter type: "string", "integer", "number", "boolean", "array", "object"
    #[serde(rename = "type")]
    pub param_type: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value (if not required)
    #[serde(default)]
    pub default: Option<Value>,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

impl ParameterSpec {
    /// A required parameter of the given type.
    pub fn required(param_type: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            required: true,
            default: None,
            description: None,
        }
    }

    /// An optional parameter of the given type.
    pub fn optional(param_type: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            required: false,
            default: None,
            description: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CapabilityDescriptor
// ---------------------------------------------------------------------------

/// One capability as reported by one backend.
///
/// Created when a backend reports it during discovery, replaced wholesale on
/// re-discovery, removed when the owning backend disconnects. The
/// `owning_backend` field is a back-reference by id, not ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Namespaced identifier, e.g. `weather.forecast`
    pub id: String,

    /// Kind of operation
    pub kind: CapabilityKind,

    /// Semantic version, if the backend reports one
    #[serde(default)]
    pub version: Option<String>,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Input parameter schema, keyed by parameter name
    #[serde(default)]
    pub parameter_schema: HashMap<String, ParameterSpec>,

    /// Id of the backend that reported this descriptor
    #[serde(default)]
    pub owning_backend: String,
}

impl CapabilityDescriptor {
    /// Create a descriptor with an empty schema.
    pub fn new(id: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            version: None,
            description: String::new(),
            parameter_schema: HashMap::new(),
            owning_backend: String::new(),
        }
    }

    /// Set the semantic version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add one parameter to the schema.
    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameter_schema.insert(name.into(), spec);
        self
    }

    /// Get the namespace from the capability id
    /// (e.g. "weather" from "weather.forecast").
    pub fn namespace(&self) -> &str {
        namespace_of(&self.id)
    }
}

/// Namespace of a dot-separated capability id.
pub fn namespace_of(capability_id: &str) -> &str {
    capability_id.split('.').next().unwrap_or(capability_id)
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Numeric `major.minor.patch` triple parsed from a version string.
///
/// Missing parts and non-numeric components parse as 0, so `"2"` is
/// `2.0.0` and an absent version is `0.0.0`. Ordering is lexicographic by
/// numeric component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parse a version string, tolerating missing or malformed components.
    pub fn parse(text: &str) -> Self {
        let mut parts = text.trim().splitn(3, '.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };
        Self {
            major: next(),
            minor: next(),
            patch: next(),
        }
    }

    /// Parse an optional version; `None` is `0.0.0`.
    pub fn parse_opt(text: Option<&str>) -> Self {
        text.map(Self::parse).unwrap_or(Self {
            major: 0,
            minor: 0,
            patch: 0,
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
