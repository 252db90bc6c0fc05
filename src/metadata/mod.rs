//! Service metadata: resource types, sets and the type hierarchy.
//!
//! The model replaces runtime discovery with an explicit registration table
//! built at startup. Every property carries a tagged [`PropertyKind`] and
//! inheritance is an explicit base-type link.
//!
//! # Key Types
//!
//! - [`ServiceModel`] - Validated, flattened model used during request processing
//! - [`ModelBuilder`] - Fluent builder that validates the type graph
//! - [`ResourceType`] / [`ResourceProperty`] - Type and property declarations

pub mod csdl;
pub mod model;
pub mod types;


pub use model::{ModelBuilder, ServiceModel};
pub use types::{
    Multiplicity, NavigationTarget, PrimitiveType, PropertyKind, ResourceProperty, ResourceSet,
    ResourceType, ResourceTypeKind,
};
