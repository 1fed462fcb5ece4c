//! # Capability model and index
//!
//! Capabilities are named, schema-described operations offered by backends,
//! identified by dot-namespaced ids (`weather.forecast`). During discovery
//! each connected backend reports its descriptors; the [`CapabilityIndex`]
//! aggregates them per id in discovery order and flags collisions. Which
//! provider wins a collision is decided elsewhere, at resolution time, by
//! the conflict resolver.

pub mod descriptor;
pub mod index;

pub use descriptor::{
    namespace_of, CapabilityDescriptor, CapabilityKind, ParameterSpec, Version,
};
pub use index::{CapabilityIndex, CapabilitySummary, ProviderEntry};
