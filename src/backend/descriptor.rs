//! Per-backend state records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::connection::Credential;

// ---------------------------------------------------------------------------
// BackendStatus
// ---------------------------------------------------------------------------

/// Connection lifecycle state of one backend.
///
/// Transitions: `Disconnected -> Connecting -> Connected`,
/// `Connecting -> Error`, `Connected -> Disconnected` (explicit) or
/// `Connected -> Error` (detected failure during use). `Error` is not
/// terminal; a later connect attempt starts from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    /// No connection; initial state and the result of an explicit disconnect.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Connected and serving invocations.
    Connected,
    /// The last lifecycle operation failed; see `last_error`.
    Error,
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

impl BackendStatus {
    /// Get the string value of the status.
    pub fn value(&self) -> &'static str {
        match self {
            BackendStatus::Disconnected => "disconnected",
            BackendStatus::Connecting => "connecting",
            BackendStatus::Connected => "connected",
            BackendStatus::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// BackendDescriptor
// ---------------------------------------------------------------------------

/// Registry-owned record for one backend.
///
/// Created on `add_backend`, mutated only by lifecycle transitions,
/// destroyed on `remove_backend`. External callers never hold this directly;
/// they receive [`BackendStatusView`] snapshots.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    /// Unique backend id.
    pub id: String,
    /// Endpoint handed to the connector.
    pub endpoint: String,
    /// Opaque credential handed to the connector.
    pub credential: Credential,
    /// Current lifecycle state.
    pub status: BackendStatus,
    /// Most recent lifecycle or invocation error, if any.
    pub last_error: Option<String>,
    /// When `last_error` was recorded.
    pub last_error_at: Option<DateTime<Utc>>,
    /// When the current connection was established.
    pub connected_at: Option<DateTime<Utc>>,
}

impl BackendDescriptor {
    /// Create a descriptor in the `Disconnected` state.
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            credential,
            status: BackendStatus::Disconnected,
            last_error: None,
            last_error_at: None,
            connected_at: None,
        }
    }

    /// Record an error and move to the `Error` state.
    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.status = BackendStatus::Error;
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }

    /// Snapshot for external callers. Excludes the credential.
    pub fn status_view(&self) -> BackendStatusView {
        BackendStatusView {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            status: self.status,
            last_error: self.last_error.clone(),
            last_error_at: self.last_error_at,
            connected_at: self.connected_at,
        }
    }
}

/// Cloneable, serializable snapshot of a backend's state.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatusView {
    pub id: String,
    pub endpoint: String,
    pub status: BackendStatus,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_descriptor_starts_disconnected() {
        let desc = BackendDescriptor::new("b1", "tcp://host:1", Credential::none());
        assert_eq!(desc.status, BackendStatus::Disconnected);
        assert!(desc.last_error.is_none());
        assert!(desc.connected_at.is_none());
    }

    #[test]
    fn test_record_error_transitions_and_stamps() {
        let mut desc = BackendDescriptor::new("b1", "tcp://host:1", Credential::none());
        desc.record_error("boom");
        assert_eq!(desc.status, BackendStatus::Error);
        assert_eq!(desc.last_error.as_deref(), Some("boom"));
        assert!(desc.last_error_at.is_some());
    }

    #[test]
    fn test_status_view_excludes_credential() {
        let desc = BackendDescriptor::new("b1", "tcp://host:1", Credential::new("secret"));
        let view = desc.status_view();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"status\":\"disconnected\""));
    }

    #[test]
    fn test_status_value_strings() {
        assert_eq!(BackendStatus::Connecting.value(), "connecting");
        assert_eq!(BackendStatus::Error.to_string(), "error");
    }
}
