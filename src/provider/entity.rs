//! Entity instances and their keys.

use crate::error::{ODataError, ODataResult};
use crate::literal::Literal;
use crate::metadata::ServiceModel;
use serde_json::{Map, Value};
use std::fmt;

/// An entity instance: its set, its concrete type and its structural values.
///
/// Navigation links are not stored on the entity; the provider keeps them.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    set_name: String,
    type_name: String,
    properties: Map<String, Value>,
}

impl Entity {
    pub fn new(set_name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            set_name: set_name.into(),
            type_name: type_name.into(),
            properties: Map::new(),
        }
    }

    /// Build an entity from a JSON object.
    pub fn from_json(
        set_name: impl Into<String>,
        type_name: impl Into<String>,
        value: Value,
    ) -> ODataResult<Self> {
        match value {
            Value::Object(properties) => Ok(Self {
                set_name: set_name.into(),
                type_name: type_name.into(),
                properties,
            }),
            other => Err(ODataError::bad_request(format!(
                "Expected a JSON object for an entity, found '{}'",
                other
            ))),
        }
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties.get(property)
    }

    pub fn set(&mut self, property: impl Into<String>, value: Value) {
        self.properties.insert(property.into(), value);
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.properties
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.properties.clone())
    }

    /// Key of this entity according to the model.
    pub fn key(&self, model: &ServiceModel) -> ODataResult<EntityKey> {
        EntityKey::from_entity(self, model)
    }
}

/// Ordered key values of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityKey {
    values: Vec<(String, Literal)>,
}

impl EntityKey {
    pub fn new(values: Vec<(String, Literal)>) -> Self {
        Self { values }
    }

    /// Single-valued key.
    pub fn single(name: impl Into<String>, value: Literal) -> Self {
        Self {
            values: vec![(name.into(), value)],
        }
    }

    /// Extract the key of an entity. Missing or null key values are a bad
    /// request since they can only come from a payload.
    pub fn from_entity(entity: &Entity, model: &ServiceModel) -> ODataResult<Self> {
        let mut values = Vec::new();
        for property in model.key_properties(entity.type_name()) {
            let Some(primitive) = property.primitive_type() else {
                continue;
            };
            let raw = entity.get(&property.name).unwrap_or(&Value::Null);
            let literal = Literal::from_json(raw, primitive).map_err(|e| {
                ODataError::bad_request(format!("Invalid key property '{}': {}", property.name, e))
            })?;
            if literal.is_null() {
                return Err(ODataError::bad_request(format!(
                    "Key property '{}' of type '{}' cannot be null",
                    property.name,
                    entity.type_name()
                )));
            }
            values.push((property.name.clone(), literal));
        }
        if values.is_empty() {
            return Err(ODataError::internal_message(format!(
                "type '{}' has no key",
                entity.type_name()
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[(String, Literal)] {
        &self.values
    }

    /// Key predicate as it appears in a URI, e.g. `(1)` or `(A=1,B='x')`.
    pub fn to_predicate(&self) -> String {
        match self.values.as_slice() {
            [(_, value)] => format!("({})", value.to_uri_literal()),
            values => format!(
                "({})",
                values
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value.to_uri_literal()))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    /// Whether an entity carries this key.
    pub fn identifies(&self, entity: &Entity) -> bool {
        self.values.iter().all(|(name, literal)| {
            let Some(raw) = entity.get(name) else {
                return false;
            };
            literal.to_json() == *raw || literal_matches(literal, raw)
        })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_predicate())
    }
}

fn literal_matches(literal: &Literal, raw: &Value) -> bool {
    match literal {
        Literal::Int64(v) => raw.as_str().and_then(|s| s.parse::<i64>().ok()) == Some(*v),
        Literal::Guid(g) => raw
            .as_str()
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
            .is_some_and(|parsed| parsed == *g),
        _ => false,
    }
}
