//! OData request-processing core for Rust.
//!
//! Addresses resources described by a service model, enforces access rights,
//! evaluates ETag preconditions, runs query and change interceptors, and
//! writes JSON responses. Storage is pluggable through [`UpdateProvider`].
//!
//! # Core Components
//!
//! - [`ODataServer`] - Dispatches requests for one [`DataService`]
//! - [`ServiceModel`] - Entity sets, types and properties of a service
//! - [`UpdateProvider`] - Trait for implementing storage backends
//! - [`ServiceConfiguration`] - Rights, operations and interceptors
//!
//! # Quick Start
//!
//! ```rust
//! use odata_server::{DataService, ODataRequest, ODataServer, ServiceConfiguration};
//! use odata_server::config::EntitySetRights;
//! use odata_server::error::BuildResult;
//! use odata_server::metadata::{ModelBuilder, PrimitiveType, ResourceProperty, ResourceType, ServiceModel};
//! use odata_server::provider::InMemoryDataSource;
//! use serde_json::json;
//!
//! struct Library {
//!     data: InMemoryDataSource,
//! }
//!
//! impl DataService for Library {
//!     type Source = InMemoryDataSource;
//!
//!     fn metadata() -> BuildResult<ServiceModel> {
//!         ModelBuilder::new("Library")
//!             .resource_type(
//!                 ResourceType::entity("Book")
//!                     .property(ResourceProperty::key("ISBN", PrimitiveType::String))
//!                     .property(ResourceProperty::primitive("Title", PrimitiveType::String)),
//!             )
//!             .resource_set("Books", "Book")
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
//! let server = ODataServer::new(Library { data: InMemoryDataSource::new() });
//! let body = json!({"ISBN": "0-201-63361-2", "Title": "Design Patterns"});
//! assert_eq!(server.dispatch(&ODataRequest::post("/Books").with_json(&body)).status, 201);
//!
//! let response = server.dispatch(&ODataRequest::get("/Books('0-201-63361-2')/Title/$value"));
//! assert_eq!(response.text(), "Design Patterns");
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod etag;
pub mod interceptor;
pub mod literal;
pub mod metadata;
pub mod provider;
pub mod service;
pub mod uri;

// Re-export commonly used types for convenience
pub use config::{EntitySetRights, ProtocolVersion, ServiceBehavior, ServiceOperationRights};
pub use dispatcher::{DispatchState, ODataRequest, ODataResponse, ODataServer, RequestContext};
pub use error::{ODataError, ODataResult};
pub use etag::{ConcurrencyToken, Precondition};
pub use interceptor::{InvocationCounters, UpdateOperations};
pub use literal::Literal;
pub use metadata::{ModelBuilder, ServiceModel};
pub use provider::{Entity, EntityKey, InMemoryDataSource, UpdateProvider};
pub use service::{DataService, ServiceConfiguration, ServiceOperation, ServiceRegistry};
