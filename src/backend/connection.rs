//! The external collaborator seam.
//!
//! The orchestrator does not implement a wire protocol. It talks to each
//! backend through the [`Connector`] and [`BackendConnection`] traits, which
//! an embedder implements over whatever transport the deployment uses.
//! Credentials are opaque handles supplied by a [`CredentialProvider`]; the
//! orchestrator only carries them to `connect` and never inspects them.
//!
//! Collaborator methods report failures as `anyhow::Error`; the registry
//! classifies them into the typed taxonomy (see
//! [`OrchestratorError::from_collaborator`](crate::errors::OrchestratorError)).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capabilities::CapabilityDescriptor;

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Opaque credential handle passed to [`Connector::connect`].
///
/// The secret is never logged: `Debug` prints a redaction marker.
#[derive(Clone)]
pub struct Credential {
    secret: Arc<String>,
}

impl Credential {
    /// Wrap a secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Arc::new(secret.into()),
        }
    }

    /// An empty credential, for backends that do not authenticate.
    pub fn none() -> Self {
        Self::new("")
    }

    /// Expose the secret for the transport implementation.
    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Dials one endpoint and produces a live [`BackendConnection`].
///
/// Provided by the embedder; one connector instance serves every backend
/// registered with the orchestrator.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to `endpoint`, authenticating with `credential`.
    async fn connect(
        &self,
        endpoint: &str,
        credential: &Credential,
    ) -> Result<Box<dyn BackendConnection>, anyhow::Error>;
}

/// One live connection to one backend.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// List the capabilities this backend currently offers.
    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, anyhow::Error>;

    /// Invoke a capability with the given parameters.
    async fn invoke(&self, capability_id: &str, params: Value) -> Result<Value, anyhow::Error>;

    /// Close the connection. Best-effort; errors are not reported.
    async fn close(&self);
}

/// Supplies and refreshes the opaque credential for a backend.
///
/// Token lifecycle (renewal, rotation) is entirely this collaborator's
/// responsibility. When configured on the registry it is consulted before
/// every connect attempt, so a refreshed token is picked up on reconnect.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produce the current credential for `backend_id`.
    async fn credential(&self, backend_id: &str) -> Result<Credential, anyhow::Error>;
}

/// Provider that hands out one fixed credential for every backend.
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credential(&self, _backend_id: &str) -> Result<Credential, anyhow::Error> {
        Ok(self.credential.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts() {
        let cred = Credential::new("super-secret-token");
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_credential_expose() {
        let cred = Credential::new("tok");
        assert_eq!(cred.expose(), "tok");
        assert_eq!(Credential::none().expose(), "");
    }

    #[test]
    fn test_static_provider_returns_fixed_credential() {
        let provider = StaticCredentialProvider::new(Credential::new("abc"));
        let cred = tokio_test::block_on(provider.credential("any")).unwrap();
        assert_eq!(cred.expose(), "abc");
    }
}
