//! # capmux
//!
//! Multi-backend capability orchestration. A `capmux` orchestrator talks to
//! several independent, capability-providing backends at once: it discovers
//! what each backend offers, merges overlapping capability sets, picks the
//! right backend per request, and combines results from several backends
//! into one answer while tolerating partial failure.
//!
//! The moving parts, leaves first:
//!
//! - [`backend`]: the transport collaborator seam ([`backend::Connector`],
//!   [`backend::BackendConnection`]) and the connection registry that owns
//!   backend lifecycles and retry.
//! - [`capabilities`]: descriptors and the index that aggregates them per
//!   capability id, flagging collisions.
//! - [`conflict`]: the policy-driven resolver that decides which provider
//!   wins a collision.
//! - [`routing`]: feedback metrics and the strategies that pick one backend
//!   among several eligible ones.
//! - [`aggregate`]: single, routed, and fan-out invocation execution plus
//!   pluggable result mergers.
//! - [`orchestrator`]: the caller-owned façade composing all of the above.
//!
//! The wire protocol, credential lifecycle, and the business logic behind
//! individual capabilities are out of scope: they live behind the
//! collaborator traits in [`backend`].

pub mod aggregate;
pub mod backend;
pub mod capabilities;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod orchestrator;
pub mod routing;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregate::{BranchFailure, BranchOutcome, InvocationMode, ResultEnvelope, ResultMerger};
pub use backend::{
    BackendConnection, BackendStatus, BackendStatusView, Connector, Credential, CredentialProvider,
};
pub use capabilities::{CapabilityDescriptor, CapabilityKind, CapabilitySummary, ParameterSpec};
pub use config::OrchestratorConfig;
pub use conflict::{ConflictPolicy, ConflictStrategy};
pub use errors::OrchestratorError;
pub use orchestrator::Orchestrator;
pub use routing::RoutingStrategy;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
