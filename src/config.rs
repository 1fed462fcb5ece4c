//! Declarative orchestrator configuration.
//!
//! A configuration file declares the backends to register plus the policy,
//! strategy, and timeout settings, and is applied by
//! [`Orchestrator::from_config`](crate::orchestrator::Orchestrator::from_config).
//! YAML and JSON are both accepted; the file extension decides the parser.
//!
//! ```yaml
//! routing_strategy: latency_ewma
//! call_timeout_secs: 10
//! conflict_policy:
//!   default_strategy: newest_version
//! backends:
//!   - id: w1
//!     endpoint: "tcp://weather-1:4000"
//!     credential: "${WEATHER_TOKEN}"
//!     connect_retries: 3
//!   - id: w2
//!     endpoint: "tcp://weather-2:4000"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictPolicy;

/// One backend declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntryConfig {
    /// Unique backend id.
    pub id: String,
    /// Endpoint handed to the connector.
    pub endpoint: String,
    /// Credential secret; absent means the backend does not authenticate.
    #[serde(default)]
    pub credential: Option<String>,
    /// Retry the initial connect this many times with backoff if it fails.
    #[serde(default)]
    pub connect_retries: Option<u32>,
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Backends to register at startup.
    #[serde(default)]
    pub backends: Vec<BackendEntryConfig>,

    /// Routing strategy name: "random", "round_robin", "latency_ewma",
    /// or "least_in_flight".
    #[serde(default)]
    pub routing_strategy: Option<String>,

    /// Conflict-resolution policy.
    #[serde(default)]
    pub conflict_policy: Option<ConflictPolicy>,

    /// Per-call invocation timeout, seconds.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,

    /// Per-attempt connect timeout, seconds.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl OrchestratorConfig {
    /// Parse a YAML configuration string.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Parse a JSON configuration string.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Load a configuration file; `.json` parses as JSON, everything else
    /// as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Self::from_json(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        Ok(config)
    }

    /// Builder: add one backend declaration.
    pub fn with_backend(mut self, id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.backends.push(BackendEntryConfig {
            id: id.into(),
            endpoint: endpoint.into(),
            credential: None,
            connect_retries: None,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictStrategy;
    use std::io::Write;

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
routing_strategy: latency_ewma
call_timeout_secs: 10
conflict_policy:
  default_strategy: newest_version
backends:
  - id: w1
    endpoint: "tcp://weather-1:4000"
    credential: "tok-1"
    connect_retries: 3
  - id: w2
    endpoint: "tcp://weather-2:4000"
"#;
        let config = OrchestratorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.routing_strategy.as_deref(), Some("latency_ewma"));
        assert_eq!(config.call_timeout_secs, Some(10));
        assert_eq!(
            config.conflict_policy.unwrap().default_strategy,
            ConflictStrategy::NewestVersion
        );
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].connect_retries, Some(3));
        assert!(config.backends[1].credential.is_none());
    }

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "routing_strategy": "round_robin",
            "backends": [{"id": "b1", "endpoint": "tcp://host:1"}]
        }"#;
        let config = OrchestratorConfig::from_json(json).unwrap();
        assert_eq!(config.routing_strategy.as_deref(), Some("round_robin"));
        assert_eq!(config.backends[0].id, "b1");
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let mut yaml_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml_file, "routing_strategy: random").unwrap();
        let config = OrchestratorConfig::from_file(yaml_file.path()).unwrap();
        assert_eq!(config.routing_strategy.as_deref(), Some("random"));

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(json_file, "{{\"routing_strategy\": \"random\"}}").unwrap();
        let config = OrchestratorConfig::from_file(json_file.path()).unwrap();
        assert_eq!(config.routing_strategy.as_deref(), Some("random"));
    }

    #[test]
    fn test_builder() {
        let config = OrchestratorConfig::default()
            .with_backend("b1", "tcp://host:1")
            .with_backend("b2", "tcp://host:2");
        assert_eq!(config.backends.len(), 2);
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = OrchestratorConfig::from_yaml("{}").unwrap();
        assert!(config.backends.is_empty());
        assert!(config.conflict_policy.is_none());
    }
}
