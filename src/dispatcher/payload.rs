//! JSON payload reading and writing.
//!
//! Entities are written with `@odata.id`, `@odata.etag` (types with
//! concurrency properties) and `@odata.type` (instances of a derived type).
//! Request payloads are validated against the model before anything reaches
//! the provider: declared primitive values must fit their types, undeclared
//! properties are accepted only on open types, and navigation properties are
//! either `@odata.bind` references or inline entities for deep insert.

use crate::error::{ODataError, ODataResult};
use crate::etag::ConcurrencyToken;
use crate::literal::Literal;
use crate::metadata::{NavigationTarget, PropertyKind, ResourceProperty, ServiceModel};
use crate::provider::{Entity, EntityKey};
use serde_json::{Map, Value, json};

const BIND_SUFFIX: &str = "@odata.bind";

/// A validated entity from a request body.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPayload {
    pub type_name: String,
    /// Structural and dynamic properties as sent
    pub properties: Map<String, Value>,
    /// Navigation content in declaration order of the type
    pub navigation: Vec<NavigationPayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationPayload {
    pub name: String,
    pub target: NavigationTarget,
    pub content: NavigationContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationContent {
    /// Entity references (`Orders@odata.bind`)
    Bind(Vec<String>),
    /// Inline entities to insert
    Inline(Vec<EntityPayload>),
}

/// Parse a request body as JSON. An empty body is a bad request.
pub fn parse_json(body: &[u8]) -> ODataResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ODataError::bad_request(
            "The request body is empty; a JSON payload is required.",
        ));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Absolute id of an entity.
pub fn entity_id(service_root: &str, set: &str, key: &EntityKey) -> String {
    format!("{}{}{}", service_root, set, key.to_predicate())
}

/// `{"@odata.id": ...}` reference object.
pub fn reference_json(service_root: &str, set: &str, key: &EntityKey) -> Value {
    json!({ "@odata.id": entity_id(service_root, set, key) })
}

/// Read the `@odata.id` of a reference payload.
pub fn parse_reference(body: &[u8]) -> ODataResult<String> {
    match parse_json(body)? {
        Value::Object(mut object) => match object.remove("@odata.id") {
            Some(Value::String(id)) => Ok(id),
            _ => Err(ODataError::bad_request(
                "A reference payload must contain a string '@odata.id' property.",
            )),
        },
        _ => Err(ODataError::bad_request(
            "A reference payload must be a JSON object.",
        )),
    }
}

/// Write one entity, restricted to `select` when given.
pub fn entity_json(
    model: &ServiceModel,
    service_root: &str,
    entity: &Entity,
    select: Option<&[String]>,
) -> ODataResult<Map<String, Value>> {
    let selected = |name: &str| select.is_none_or(|names| names.iter().any(|n| n == name));
    let type_name = entity.type_name();
    let key = entity.key(model)?;

    let mut object = Map::new();
    object.insert(
        "@odata.id".to_string(),
        json!(entity_id(service_root, entity.set_name(), &key)),
    );
    if let Some(token) = ConcurrencyToken::compute(entity, model)? {
        object.insert("@odata.etag".to_string(), json!(token.to_header()));
    }
    let base_type = model
        .resource_set(entity.set_name())
        .map(|set| set.entity_type.as_str());
    if base_type != Some(type_name) {
        object.insert(
            "@odata.type".to_string(),
            json!(format!("#{}.{}", model.namespace(), type_name)),
        );
    }

    let declared = model.properties(type_name);
    for property in declared {
        if !property.is_structural() || matches!(property.kind, PropertyKind::Stream) {
            continue;
        }
        if selected(&property.name) {
            let value = entity.get(&property.name).cloned().unwrap_or(Value::Null);
            object.insert(property.name.clone(), value);
        }
    }
    if model.resource_type(type_name).is_some_and(|t| t.is_open) {
        for (name, value) in entity.properties() {
            if declared.iter().all(|p| &p.name != name) && selected(name) {
                object.insert(name.clone(), value.clone());
            }
        }
    }
    Ok(object)
}

/// Check `$select` names against the type of the addressed entities.
pub fn validate_select(
    model: &ServiceModel,
    type_name: &str,
    select: &[String],
    expand: &[String],
) -> ODataResult<()> {
    let open = model.resource_type(type_name).is_some_and(|t| t.is_open);
    for name in select {
        let known = match model.property(type_name, name) {
            Some(property) if property.is_structural() => true,
            Some(_) => expand.contains(name),
            None => open,
        };
        if !known {
            return Err(ODataError::bad_request(format!(
                "The property '{}' in $select is not defined on type '{}'.",
                name, type_name
            )));
        }
    }
    Ok(())
}

/// Navigation properties named by `$expand`, with their targets.
pub fn expand_targets(
    model: &ServiceModel,
    type_name: &str,
    expand: &[String],
) -> ODataResult<Vec<(String, NavigationTarget)>> {
    expand
        .iter()
        .map(|name| {
            model
                .property(type_name, name)
                .and_then(ResourceProperty::navigation_target)
                .map(|target| (name.clone(), target.clone()))
                .ok_or_else(|| {
                    ODataError::bad_request(format!(
                        "The property '{}' in $expand is not a navigation property of type '{}'.",
                        name, type_name
                    ))
                })
        })
        .collect()
}

/// Resolve the entity type of a payload for `set_type`.
///
/// `@odata.type` may name a type derived from the set's type; abstract
/// types cannot be instantiated.
pub fn payload_type(
    model: &ServiceModel,
    set_type: &str,
    annotation: Option<&Value>,
) -> ODataResult<String> {
    let type_name = match annotation {
        None => set_type.to_string(),
        Some(Value::String(qualified)) => {
            let name = qualified.trim_start_matches('#');
            let prefix = format!("{}.", model.namespace());
            name.strip_prefix(&prefix).unwrap_or(name).to_string()
        }
        Some(other) => {
            return Err(ODataError::bad_request(format!(
                "Invalid @odata.type annotation '{}'.",
                other
            )));
        }
    };
    let resource_type = model
        .resource_type(&type_name)
        .filter(|t| t.is_entity())
        .ok_or_else(|| {
            ODataError::bad_request(format!("Unknown entity type '{}' in payload.", type_name))
        })?;
    if !model.is_assignable_to(&type_name, set_type) {
        return Err(ODataError::bad_request(format!(
            "Type '{}' is not compatible with the expected type '{}'.",
            type_name, set_type
        )));
    }
    if resource_type.is_abstract {
        return Err(ODataError::bad_request(format!(
            "Cannot create an instance of abstract type '{}'.",
            type_name
        )));
    }
    Ok(type_name)
}

/// Validate an entity payload addressed to a set of type `set_type`.
pub fn parse_entity(model: &ServiceModel, set_type: &str, value: Value) -> ODataResult<EntityPayload> {
    let Value::Object(object) = value else {
        return Err(ODataError::bad_request(
            "An entity payload must be a JSON object.",
        ));
    };
    let type_name = payload_type(model, set_type, object.get("@odata.type"))?;
    let open = model.resource_type(&type_name).is_some_and(|t| t.is_open);

    let mut properties = Map::new();
    let mut navigation: Vec<(usize, NavigationPayload)> = Vec::new();
    let declared = model.properties(&type_name);

    for (name, value) in object {
        if let Some(nav_name) = name.strip_suffix(BIND_SUFFIX) {
            let (position, target) = navigation_property(model, &type_name, nav_name)?;
            let references = bind_references(nav_name, &target, value)?;
            navigation.push((
                position,
                NavigationPayload {
                    name: nav_name.to_string(),
                    target,
                    content: NavigationContent::Bind(references),
                },
            ));
            continue;
        }
        if name.starts_with('@') || name.contains('@') {
            // instance and property annotations are not stored
            continue;
        }

        match declared.iter().position(|p| p.name == name) {
            Some(position) => {
                let property = &declared[position];
                if let Some(target) = property.navigation_target() {
                    let entities = inline_entities(model, &name, target, value)?;
                    navigation.push((
                        position,
                        NavigationPayload {
                            name: name.clone(),
                            target: target.clone(),
                            content: NavigationContent::Inline(entities),
                        },
                    ));
                } else {
                    check_value(model, property, &value)?;
                    properties.insert(name, value);
                }
            }
            None if open => {
                properties.insert(name, value);
            }
            None => {
                return Err(ODataError::bad_request(format!(
                    "The property '{}' does not exist on type '{}'. Make sure to only use property names that are defined by the type.",
                    name, type_name
                )));
            }
        }
    }

    navigation.sort_by_key(|(position, _)| *position);
    Ok(EntityPayload {
        type_name,
        properties,
        navigation: navigation.into_iter().map(|(_, nav)| nav).collect(),
    })
}

/// Validate a structural value against its declared property.
pub fn check_value(model: &ServiceModel, property: &ResourceProperty, value: &Value) -> ODataResult<()> {
    if value.is_null() {
        if !property.nullable {
            return Err(ODataError::bad_request(format!(
                "The property '{}' cannot be set to null.",
                property.name
            )));
        }
        return Ok(());
    }
    match &property.kind {
        PropertyKind::Key(primitive) | PropertyKind::Primitive(primitive) => {
            Literal::from_json(value, *primitive).map(|_| ()).map_err(|e| {
                ODataError::bad_request(format!(
                    "Invalid value for property '{}': {}",
                    property.name, e
                ))
            })
        }
        PropertyKind::Complex(type_name) => check_complex(model, type_name, value),
        PropertyKind::Stream => Err(ODataError::bad_request(format!(
            "The stream property '{}' cannot be set in an entity payload; write it through $value.",
            property.name
        ))),
        PropertyKind::Navigation(_) => Err(ODataError::bad_request(format!(
            "The navigation property '{}' cannot be written as a value.",
            property.name
        ))),
    }
}

fn check_complex(model: &ServiceModel, type_name: &str, value: &Value) -> ODataResult<()> {
    let Value::Object(object) = value else {
        return Err(ODataError::bad_request(format!(
            "A value of complex type '{}' must be a JSON object.",
            type_name
        )));
    };
    let open = model.resource_type(type_name).is_some_and(|t| t.is_open);
    for (name, value) in object {
        if name.contains('@') {
            continue;
        }
        match model.property(type_name, name) {
            Some(property) => check_value(model, property, value)?,
            None if open => {}
            None => {
                return Err(ODataError::bad_request(format!(
                    "The property '{}' does not exist on complex type '{}'.",
                    name, type_name
                )));
            }
        }
    }
    Ok(())
}

fn navigation_property(
    model: &ServiceModel,
    type_name: &str,
    name: &str,
) -> ODataResult<(usize, NavigationTarget)> {
    model
        .properties(type_name)
        .iter()
        .enumerate()
        .find(|(_, p)| p.name == name)
        .and_then(|(position, p)| p.navigation_target().map(|t| (position, t.clone())))
        .ok_or_else(|| {
            ODataError::bad_request(format!(
                "'{}' is not a navigation property of type '{}'.",
                name, type_name
            ))
        })
}

fn bind_references(name: &str, target: &NavigationTarget, value: Value) -> ODataResult<Vec<String>> {
    let invalid = || {
        ODataError::bad_request(format!(
            "Invalid @odata.bind value for navigation property '{}'.",
            name
        ))
    };
    match (value, target.multiplicity.is_collection()) {
        (Value::String(reference), false) => Ok(vec![reference]),
        (Value::Array(items), true) => items
            .into_iter()
            .map(|item| match item {
                Value::String(reference) => Ok(reference),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

fn inline_entities(
    model: &ServiceModel,
    name: &str,
    target: &NavigationTarget,
    value: Value,
) -> ODataResult<Vec<EntityPayload>> {
    let target_type = model
        .resource_set(&target.target_set)
        .map(|set| set.entity_type.clone())
        .ok_or_else(|| ODataError::internal_message(format!("unknown set '{}'", target.target_set)))?;
    match (value, target.multiplicity.is_collection()) {
        (Value::Array(items), true) => items
            .into_iter()
            .map(|item| parse_entity(model, &target_type, item))
            .collect(),
        (item @ Value::Object(_), false) => Ok(vec![parse_entity(model, &target_type, item)?]),
        _ => Err(ODataError::bad_request(format!(
            "The value of navigation property '{}' does not match its multiplicity.",
            name
        ))),
    }
}
