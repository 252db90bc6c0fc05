//! Request URI handling.
//!
//! A request URI is split into its path, resolved by the [`Resolver`] into a
//! [`ResourcePath`], and its query string, parsed into [`QueryOptions`].
//!
//! # Example Usage
//!
//! ```rust
//! use http::Method;
//! use odata_server::config::EntitySetRights;
//! use odata_server::metadata::{ModelBuilder, PrimitiveType, ResourceProperty, ResourceType};
//! use odata_server::service::ServiceConfiguration;
//! use odata_server::uri::{Resolver, SegmentKind};
//!
//! let model = ModelBuilder::new("Sample")
//!     .resource_type(
//!         ResourceType::entity("Customer")
//!             .property(ResourceProperty::key("ID", PrimitiveType::Int32))
//!             .property(ResourceProperty::primitive("Name", PrimitiveType::String)),
//!     )
//!     .resource_set("Customers", "Customer")
//!     .build()
//!     .unwrap();
//! let mut config = ServiceConfiguration::new();
//! config.set_entity_set_access_rule("*", EntitySetRights::ALL);
//!
//! let resolver = Resolver::new(&model, &config);
//! let path = resolver.resolve(&Method::GET, "/Customers(1)/Name/$value").unwrap();
//! let kinds: Vec<SegmentKind> = path.segments.iter().map(|s| s.kind).collect();
//! assert_eq!(
//!     kinds,
//!     vec![SegmentKind::EntitySet, SegmentKind::Key, SegmentKind::Property, SegmentKind::Value]
//! );
//!
//! // navigating off a collection needs a key
//! let err = resolver.resolve(&Method::GET, "/Customers/Name").unwrap_err();
//! assert_eq!(err.status_code().as_u16(), 400);
//! ```

pub mod query_options;
pub mod resolver;
pub mod segment;


pub use query_options::QueryOptions;
pub use resolver::{Resolver, allowed_methods, validate_query_options};
pub use segment::{Addressed, PathSegment, ResourcePath, SegmentKind};
