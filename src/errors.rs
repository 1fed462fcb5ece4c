//! Error types for the orchestration crate.
//!
//! Every fallible public operation returns [`OrchestratorError`]. Lifecycle
//! failures (connect, discovery) are additionally recorded on the affected
//! backend's descriptor and surfaced through `backend_status`, so a broken
//! backend never poisons calls that do not involve it.

use thiserror::Error;

use crate::aggregate::BranchFailure;

/// Errors produced by the orchestrator and its components.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Transport-level failure to reach a backend. Isolated to that backend.
    #[error("connection to backend '{backend_id}' failed: {message}")]
    Connection {
        /// Backend the failure belongs to.
        backend_id: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The backend rejected the supplied credential.
    ///
    /// A specialization of a connection failure: the transport was reachable
    /// but refused the session.
    #[error("backend '{backend_id}' rejected the credential: {message}")]
    Authentication { backend_id: String, message: String },

    /// No connected backend lists the requested capability id.
    #[error("no connected backend provides capability '{capability_id}'")]
    CapabilityNotFound { capability_id: String },

    /// An explicitly chosen backend does not list the capability.
    #[error("backend '{backend_id}' does not provide capability '{capability_id}'")]
    CapabilityNotOnBackend {
        capability_id: String,
        backend_id: String,
    },

    /// Every branch of a fan-out invocation failed or timed out.
    ///
    /// Carries the per-backend outcomes so the caller can see exactly what
    /// happened on each branch.
    #[error("all {attempted} branches of the '{capability_id}' aggregation failed")]
    AggregationFailure {
        capability_id: String,
        /// Number of backends the invocation was dispatched to.
        attempted: usize,
        /// One entry per failed branch.
        outcomes: Vec<BranchFailure>,
    },

    /// A backend with this id is already registered.
    #[error("backend '{backend_id}' is already registered")]
    DuplicateBackend { backend_id: String },

    /// No backend is registered under this id.
    #[error("no backend registered under '{backend_id}'")]
    UnknownBackend { backend_id: String },

    /// The routing strategy returned no backend for the capability.
    #[error("routing produced no backend for capability '{capability_id}'")]
    NoRoute { capability_id: String },
}

impl OrchestratorError {
    /// Classify an opaque collaborator error into the typed taxonomy.
    ///
    /// Credential rejections are recognized from the error text; everything
    /// else is a plain connection failure.
    pub(crate) fn from_collaborator(backend_id: &str, err: anyhow::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("authentication")
            || lowered.contains("unauthorized")
            || lowered.contains("credential")
            || lowered.contains("forbidden")
        {
            OrchestratorError::Authentication {
                backend_id: backend_id.to_string(),
                message,
            }
        } else {
            OrchestratorError::Connection {
                backend_id: backend_id.to_string(),
                message,
            }
        }
    }

    /// Whether this error is a connection-level failure (including the
    /// authentication specialization).
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Connection { .. } | OrchestratorError::Authentication { .. }
        )
    }
}
