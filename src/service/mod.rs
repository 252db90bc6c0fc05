//! Data service definitions.
//!
//! A service is a type implementing [`DataService`]. The type supplies the
//! model and the one-time configuration hook; instances supply a provider
//! session per request.
//!
//! # Example Usage
//!
//! ```rust
//! use odata_server::config::EntitySetRights;
//! use odata_server::error::BuildResult;
//! use odata_server::metadata::{ModelBuilder, PrimitiveType, ResourceProperty, ResourceType, ServiceModel};
//! use odata_server::provider::InMemoryDataSource;
//! use odata_server::service::{DataService, ServiceConfiguration, ServiceRegistry};
//!
//! struct Catalog {
//!     data: InMemoryDataSource,
//! }
//!
//! impl DataService for Catalog {
//!     type Source = InMemoryDataSource;
//!
//!     fn metadata() -> BuildResult<ServiceModel> {
//!         ModelBuilder::new("Catalog")
//!             .resource_type(
//!                 ResourceType::entity("Product")
//!                     .property(ResourceProperty::key("ID", PrimitiveType::Int32)),
//!             )
//!             .resource_set("Products", "Product")
//!             .build()
//!     }
//!
//!     fn initialize_service(config: &mut ServiceConfiguration) {
//!         config.set_entity_set_access_rule("*", EntitySetRights::ALL);
//!     }
//!
//!     fn create_data_source(&self) -> InMemoryDataSource {
//!         self.data.session()
//!     }
//! }
//!
//! let definition = ServiceRegistry::definition::<Catalog>().unwrap();
//! assert!(definition.model.resource_set("Products").is_some());
//! ```

pub mod configuration;
pub mod operation;
pub mod registry;

pub use configuration::{ServiceConfiguration, WILDCARD};
pub use operation::{
    OperationArgs, OperationHandler, OperationOutput, OperationParameter, ResultKind,
    ServiceOperation,
};
pub use registry::{ServiceDefinition, ServiceRegistry};

use crate::error::BuildResult;
use crate::metadata::ServiceModel;
use crate::provider::UpdateProvider;

/// A data service type.
///
/// `metadata` and `initialize_service` run once per type and are cached in
/// the [`ServiceRegistry`]; `create_data_source` runs once per request.
pub trait DataService: Send + Sync + 'static {
    type Source: UpdateProvider + 'static;

    /// The model the service exposes.
    fn metadata() -> BuildResult<ServiceModel>;

    /// Configure rights, interceptors, operations and behaviour.
    fn initialize_service(config: &mut ServiceConfiguration);

    /// A fresh provider session.
    fn create_data_source(&self) -> Self::Source;
}
