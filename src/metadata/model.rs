//! Service model: resource types, resource sets and their type hierarchy.
//!
//! The model is assembled once per service type with [`ModelBuilder`], which
//! validates the type graph and flattens each type's inherited properties so
//! lookups during request processing never walk the base-type chain.

use super::types::{PropertyKind, ResourceProperty, ResourceSet, ResourceType, ResourceTypeKind};
use crate::error::{BuildError, BuildResult};
use std::collections::{HashMap, HashSet};

/// Immutable description of everything a service exposes.
#[derive(Debug, Clone)]
pub struct ServiceModel {
    namespace: String,
    types: HashMap<String, ResourceType>,
    sets: HashMap<String, ResourceSet>,
    set_order: Vec<String>,
    // type name -> declared + inherited properties, base type first
    flattened: HashMap<String, Vec<ResourceProperty>>,
}

impl ServiceModel {
    pub fn builder(namespace: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn resource_type(&self, name: &str) -> Option<&ResourceType> {
        self.types.get(name)
    }

    pub fn resource_set(&self, name: &str) -> Option<&ResourceSet> {
        self.sets.get(name)
    }

    /// Resource sets in declaration order.
    pub fn resource_sets(&self) -> impl Iterator<Item = &ResourceSet> {
        self.set_order.iter().filter_map(|name| self.sets.get(name))
    }

    /// All types, sorted by name for stable output.
    pub fn resource_types(&self) -> Vec<&ResourceType> {
        let mut types: Vec<&ResourceType> = self.types.values().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    /// Declared and inherited properties of a type, base type first.
    pub fn properties(&self, type_name: &str) -> &[ResourceProperty] {
        self.flattened
            .get(type_name)
            .map(|props| props.as_slice())
            .unwrap_or(&[])
    }

    pub fn property(&self, type_name: &str, property_name: &str) -> Option<&ResourceProperty> {
        self.properties(type_name)
            .iter()
            .find(|p| p.name == property_name)
    }

    pub fn key_properties(&self, type_name: &str) -> Vec<&ResourceProperty> {
        self.properties(type_name)
            .iter()
            .filter(|p| p.is_key())
            .collect()
    }

    /// Properties that make up the concurrency token, in declaration order.
    pub fn concurrency_properties(&self, type_name: &str) -> Vec<&ResourceProperty> {
        self.properties(type_name)
            .iter()
            .filter(|p| p.concurrency_token)
            .collect()
    }

    pub fn has_concurrency_token(&self, type_name: &str) -> bool {
        self.properties(type_name)
            .iter()
            .any(|p| p.concurrency_token)
    }

    /// Whether `type_name` is `base_name` or derives from it.
    pub fn is_assignable_to(&self, type_name: &str, base_name: &str) -> bool {
        let mut current = self.types.get(type_name);
        while let Some(resource_type) = current {
            if resource_type.name == base_name {
                return true;
            }
            current = resource_type
                .base_type
                .as_deref()
                .and_then(|base| self.types.get(base));
        }
        false
    }

    /// Entity type of a resource set.
    pub fn set_type(&self, set_name: &str) -> Option<&ResourceType> {
        self.sets
            .get(set_name)
            .and_then(|set| self.types.get(&set.entity_type))
    }
}

/// Builder for [`ServiceModel`].
///
/// ```rust
/// use odata_server::metadata::{ModelBuilder, PrimitiveType, ResourceProperty, ResourceType};
///
/// let model = ModelBuilder::new("Sample")
///     .resource_type(
///         ResourceType::entity("Customer")
///             .property(ResourceProperty::key("ID", PrimitiveType::Int32))
///             .property(ResourceProperty::primitive("Name", PrimitiveType::String).etag()),
///     )
///     .resource_set("Customers", "Customer")
///     .build()
///     .unwrap();
///
/// assert!(model.has_concurrency_token("Customer"));
/// ```
#[derive(Debug, Default)]
pub struct ModelBuilder {
    namespace: String,
    types: Vec<ResourceType>,
    sets: Vec<ResourceSet>,
}

impl ModelBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            types: Vec::new(),
            sets: Vec::new(),
        }
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.types.push(resource_type);
        self
    }

    pub fn resource_set(mut self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.sets.push(ResourceSet::new(name, entity_type));
        self
    }

    /// Validate the type graph and produce the model.
    pub fn build(self) -> BuildResult<ServiceModel> {
        let mut types = HashMap::new();
        for resource_type in self.types {
            let name = resource_type.name.clone();
            if types.insert(name.clone(), resource_type).is_some() {
                return Err(BuildError::DuplicateName { name });
            }
        }

        let mut sets = HashMap::new();
        let mut set_order = Vec::new();
        for set in self.sets {
            if types.contains_key(&set.name) || sets.contains_key(&set.name) {
                return Err(BuildError::DuplicateName { name: set.name });
            }
            match types.get(&set.entity_type) {
                Some(t) if t.kind == ResourceTypeKind::Entity => {}
                _ => {
                    return Err(BuildError::UnknownReference {
                        owner: set.name.clone(),
                        what: "entity type",
                        name: set.entity_type.clone(),
                    });
                }
            }
            set_order.push(set.name.clone());
            sets.insert(set.name.clone(), set);
        }

        let mut flattened = HashMap::new();
        for name in types.keys() {
            let chain = base_chain(&types, name)?;
            let mut props: Vec<ResourceProperty> = Vec::new();
            for (depth, ancestor) in chain.iter().enumerate() {
                for property in &ancestor.properties {
                    if props.iter().any(|p| p.name == property.name) {
                        return Err(BuildError::DuplicateName {
                            name: format!("{}.{}", ancestor.name, property.name),
                        });
                    }
                    if property.is_key() && depth > 0 {
                        return Err(BuildError::InvalidConfiguration {
                            message: format!(
                                "derived type '{}' cannot declare key property '{}'",
                                ancestor.name, property.name
                            ),
                        });
                    }
                    validate_property(&types, &sets, ancestor, property)?;
                    props.push(property.clone());
                }
            }

            let resource_type = &types[name];
            let has_key = props.iter().any(|p| p.is_key());
            match resource_type.kind {
                ResourceTypeKind::Entity if !has_key => {
                    return Err(BuildError::MissingKey {
                        type_name: name.clone(),
                    });
                }
                ResourceTypeKind::Complex if has_key || props.iter().any(|p| !p.is_structural()) => {
                    return Err(BuildError::InvalidConfiguration {
                        message: format!(
                            "complex type '{}' cannot declare keys or navigation properties",
                            name
                        ),
                    });
                }
                _ => {}
            }
            flattened.insert(name.clone(), props);
        }

        Ok(ServiceModel {
            namespace: self.namespace,
            types,
            sets,
            set_order,
            flattened,
        })
    }
}

/// Ancestors of `name`, root first, ending with the type itself.
fn base_chain<'a>(
    types: &'a HashMap<String, ResourceType>,
    name: &str,
) -> BuildResult<Vec<&'a ResourceType>> {
    let mut chain: Vec<&ResourceType> = Vec::new();
    let mut seen = HashSet::new();
    let mut current = name;
    loop {
        if !seen.insert(current.to_string()) {
            return Err(BuildError::InheritanceCycle {
                type_name: name.to_string(),
            });
        }
        let resource_type = types.get(current).ok_or_else(|| BuildError::UnknownBaseType {
            type_name: chain
                .last()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| name.to_string()),
            base_type: current.to_string(),
        })?;
        if let Some(previous) = chain.last() {
            if previous.kind != resource_type.kind {
                return Err(BuildError::InvalidConfiguration {
                    message: format!(
                        "type '{}' and its base '{}' must be of the same kind",
                        previous.name, resource_type.name
                    ),
                });
            }
        }
        chain.push(resource_type);
        match &resource_type.base_type {
            Some(base) => current = base,
            None => break,
        }
    }
    chain.reverse();
    Ok(chain)
}

fn validate_property(
    types: &HashMap<String, ResourceType>,
    sets: &HashMap<String, ResourceSet>,
    owner: &ResourceType,
    property: &ResourceProperty,
) -> BuildResult<()> {
    match &property.kind {
        PropertyKind::Navigation(_) | PropertyKind::Stream | PropertyKind::Complex(_)
            if property.concurrency_token =>
        {
            Err(BuildError::InvalidConfiguration {
                message: format!(
                    "'{}.{}' cannot be a concurrency token",
                    owner.name, property.name
                ),
            })
        }
        PropertyKind::Complex(type_name) => match types.get(type_name) {
            Some(t) if t.kind == ResourceTypeKind::Complex => Ok(()),
            _ => Err(BuildError::UnknownReference {
                owner: format!("{}.{}", owner.name, property.name),
                what: "complex type",
                name: type_name.clone(),
            }),
        },
        PropertyKind::Navigation(target) if !sets.contains_key(&target.target_set) => {
            Err(BuildError::UnknownReference {
                owner: format!("{}.{}", owner.name, property.name),
                what: "resource set",
                name: target.target_set.clone(),
            })
        }
        _ => Ok(()),
    }
}
