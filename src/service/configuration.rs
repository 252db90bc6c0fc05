//! Per-service configuration filled in by `DataService::initialize_service`.

use super::operation::ServiceOperation;
use crate::config::{EntitySetRights, ServiceBehavior, ServiceOperationRights};
use crate::error::{BuildError, BuildResult, ODataResult};
use crate::interceptor::{EntityPredicate, InterceptorRegistry, UpdateOperations};
use crate::metadata::ServiceModel;
use crate::provider::Entity;
use std::collections::HashMap;

/// Name matching every entity set or service operation in an access rule.
pub const WILDCARD: &str = "*";

/// Access rules, interceptors, operations and behaviour of a service.
///
/// ```rust
/// use odata_server::config::EntitySetRights;
/// use odata_server::service::ServiceConfiguration;
///
/// let mut config = ServiceConfiguration::new();
/// config.set_entity_set_access_rule("*", EntitySetRights::ALL_READ);
/// config.set_entity_set_access_rule("Secrets", EntitySetRights::NONE);
/// assert_eq!(config.entity_set_rights("Customers"), EntitySetRights::ALL_READ);
/// assert!(!config.entity_set_rights("Secrets").is_visible());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServiceConfiguration {
    entity_set_rights: HashMap<String, EntitySetRights>,
    operation_rights: HashMap<String, ServiceOperationRights>,
    operations: Vec<ServiceOperation>,
    interceptors: InterceptorRegistry,
    pub behavior: ServiceBehavior,
}

impl ServiceConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant rights on an entity set, or on every set with `"*"`.
    pub fn set_entity_set_access_rule(&mut self, name: impl Into<String>, rights: EntitySetRights) {
        self.entity_set_rights.insert(name.into(), rights);
    }

    /// Grant rights on a service operation, or on every operation with `"*"`.
    pub fn set_service_operation_access_rule(
        &mut self,
        name: impl Into<String>,
        rights: ServiceOperationRights,
    ) {
        self.operation_rights.insert(name.into(), rights);
    }

    /// Effective rights of a set: its own rule, else the wildcard, else none.
    pub fn entity_set_rights(&self, set: &str) -> EntitySetRights {
        self.entity_set_rights
            .get(set)
            .or_else(|| self.entity_set_rights.get(WILDCARD))
            .copied()
            .unwrap_or(EntitySetRights::NONE)
    }

    pub fn service_operation_rights(&self, name: &str) -> ServiceOperationRights {
        self.operation_rights
            .get(name)
            .or_else(|| self.operation_rights.get(WILDCARD))
            .copied()
            .unwrap_or(ServiceOperationRights::NONE)
    }

    pub fn add_service_operation(&mut self, operation: ServiceOperation) {
        self.operations.push(operation);
    }

    pub fn service_operation(&self, name: &str) -> Option<&ServiceOperation> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn service_operations(&self) -> &[ServiceOperation] {
        &self.operations
    }

    pub fn add_query_interceptor<F>(&mut self, set: impl Into<String>, interceptor: F)
    where
        F: Fn() -> ODataResult<EntityPredicate> + Send + Sync + 'static,
    {
        self.interceptors.add_query_interceptor(set, interceptor);
    }

    pub fn add_change_interceptor<F>(
        &mut self,
        set: impl Into<String>,
        operations: UpdateOperations,
        interceptor: F,
    ) where
        F: Fn(&Entity, UpdateOperations) -> ODataResult<()> + Send + Sync + 'static,
    {
        self.interceptors
            .add_change_interceptor(set, operations, interceptor);
    }

    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    /// Check every name the configuration refers to against the model.
    pub fn validate(&self, model: &ServiceModel) -> BuildResult<()> {
        for name in self.entity_set_rights.keys() {
            if name != WILDCARD && model.resource_set(name).is_none() {
                return Err(BuildError::UnknownReference {
                    owner: "entity set access rule".to_string(),
                    what: "resource set",
                    name: name.clone(),
                });
            }
        }
        for name in self.operation_rights.keys() {
            if name != WILDCARD && self.service_operation(name).is_none() {
                return Err(BuildError::UnknownReference {
                    owner: "service operation access rule".to_string(),
                    what: "service operation",
                    name: name.clone(),
                });
            }
        }
        for set in self.interceptors.intercepted_sets() {
            if model.resource_set(set).is_none() {
                return Err(BuildError::UnknownReference {
                    owner: "interceptor".to_string(),
                    what: "resource set",
                    name: set.to_string(),
                });
            }
        }
        for (index, operation) in self.operations.iter().enumerate() {
            if model.resource_set(&operation.name).is_some()
                || self.operations[..index]
                    .iter()
                    .any(|other| other.name == operation.name)
            {
                return Err(BuildError::DuplicateName {
                    name: operation.name.clone(),
                });
            }
            if let Some(set) = operation.result.set_name() {
                if model.resource_set(set).is_none() {
                    return Err(BuildError::UnknownReference {
                        owner: operation.name.clone(),
                        what: "resource set",
                        name: set.to_string(),
                    });
                }
            }
        }
        if self.behavior.max_changeset_count == 0 || self.behavior.max_batch_count == 0 {
            return Err(BuildError::InvalidConfiguration {
                message: "batch limits must be positive".to_string(),
            });
        }
        Ok(())
    }
}
