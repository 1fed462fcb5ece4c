//! Backend management: the external connection seam, per-backend state,
//! and the connection registry that owns backend lifecycles.

pub mod connection;
pub mod descriptor;
pub mod registry;

pub use connection::{
    BackendConnection, Connector, Credential, CredentialProvider, StaticCredentialProvider,
};
pub use descriptor::{BackendDescriptor, BackendStatus, BackendStatusView};
pub use registry::ConnectionRegistry;
