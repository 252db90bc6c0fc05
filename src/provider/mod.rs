//! Update provider abstraction.
//!
//! The pipeline never touches storage directly. It reads and stages changes
//! through an [`UpdateProvider`], one provider session per request (or per
//! batch changeset). Changes become visible to other sessions only after
//! [`UpdateProvider::save_changes`]; [`UpdateProvider::clear_changes`] drops
//! everything staged since the last save.
//!
//! Navigation links are owned by the provider and addressed by the source
//! entity's set, key and navigation property name.
//!
//! # Example Usage
//!
//! ```rust
//! use odata_server::literal::Literal;
//! use odata_server::provider::{Entity, EntityKey, InMemoryDataSource, UpdateProvider};
//! use serde_json::json;
//!
//! let source = InMemoryDataSource::new();
//! let mut session = source.session();
//! let key = EntityKey::single("ID", Literal::Int32(1));
//! let customer = Entity::from_json("Customers", "Customer", json!({"ID": 1})).unwrap();
//! session.create(customer, key.clone()).unwrap();
//!
//! // not visible to other sessions until saved
//! assert!(source.session().get("Customers", &key).unwrap().is_none());
//! session.save_changes().unwrap();
//! assert!(source.session().get("Customers", &key).unwrap().is_some());
//! ```

pub mod entity;
pub mod in_memory;

pub use entity::{Entity, EntityKey};
pub use in_memory::{InMemoryDataSource, InMemoryDataSourceStats};

use crate::error::ODataResult;

/// Read and write access to the entities behind a service.
///
/// Errors returned as [`ODataError::Service`](crate::error::ODataError::Service)
/// keep their status code; any other error kind is reported as-is.
pub trait UpdateProvider: Send {
    /// All entities of a set in a stable order.
    fn enumerate(&mut self, set: &str) -> ODataResult<Vec<Entity>>;

    fn get(&mut self, set: &str, key: &EntityKey) -> ODataResult<Option<Entity>>;

    /// Stage a new entity. A duplicate key is a conflict.
    fn create(&mut self, entity: Entity, key: EntityKey) -> ODataResult<()>;

    /// Stage a replacement for an existing entity.
    fn update(&mut self, key: &EntityKey, entity: Entity) -> ODataResult<()>;

    /// Stage removal of an entity and every link to or from it.
    fn delete(&mut self, set: &str, key: &EntityKey) -> ODataResult<()>;

    /// Keys of entities related through `navigation`.
    fn related(&mut self, set: &str, key: &EntityKey, navigation: &str)
    -> ODataResult<Vec<EntityKey>>;

    fn add_link(
        &mut self,
        set: &str,
        key: &EntityKey,
        navigation: &str,
        target_set: &str,
        target: &EntityKey,
    ) -> ODataResult<()>;

    /// Remove one link; a missing link is not found.
    fn remove_link(
        &mut self,
        set: &str,
        key: &EntityKey,
        navigation: &str,
        target: &EntityKey,
    ) -> ODataResult<()>;

    /// Remove every link of a navigation property.
    fn clear_links(&mut self, set: &str, key: &EntityKey, navigation: &str) -> ODataResult<()>;

    /// Commit staged changes.
    fn save_changes(&mut self) -> ODataResult<()>;

    /// Discard staged changes.
    fn clear_changes(&mut self);
}
