//! Core type definitions for the service model.
//!
//! Resource types are declared explicitly at startup: each property carries a
//! tagged [`PropertyKind`] and inheritance is an explicit base-type link
//! resolved by the [`ServiceModel`](super::ServiceModel).

use serde::{Deserialize, Serialize};
use std::fmt;

/// EDM primitive types understood by key, property and ETag handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Int16,
    Int32,
    Int64,
    Decimal,
    Double,
    Single,
    String,
    Guid,
    DateTimeOffset,
    Binary,
}

impl PrimitiveType {
    /// Qualified EDM name, e.g. `Edm.Int32`.
    pub fn edm_name(&self) -> &'static str {
        match self {
            Self::Boolean => "Edm.Boolean",
            Self::Byte => "Edm.Byte",
            Self::Int16 => "Edm.Int16",
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
            Self::Decimal => "Edm.Decimal",
            Self::Double => "Edm.Double",
            Self::Single => "Edm.Single",
            Self::String => "Edm.String",
            Self::Guid => "Edm.Guid",
            Self::DateTimeOffset => "Edm.DateTimeOffset",
            Self::Binary => "Edm.Binary",
        }
    }

    /// Whether values of this type are integral numbers.
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Byte | Self::Int16 | Self::Int32 | Self::Int64)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.edm_name())
    }
}

/// Whether a type describes addressable entities or structured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceTypeKind {
    Entity,
    Complex,
}

/// Cardinality of a navigation property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Zero or one related entity
    ZeroOrOne,
    /// Exactly one related entity
    One,
    /// A collection of related entities
    Many,
}

impl Multiplicity {
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Many)
    }
}

/// Target of a navigation property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTarget {
    /// Entity set the related entities live in
    pub target_set: String,
    pub multiplicity: Multiplicity,
}

/// Tagged property kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Key property; part of the entity identity
    Key(PrimitiveType),
    /// Ordinary primitive property
    Primitive(PrimitiveType),
    /// Structured value of the named complex type
    Complex(String),
    /// Relationship to entities of another set
    Navigation(NavigationTarget),
    /// Named binary stream
    Stream,
}

/// A declared property of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProperty {
    pub name: String,
    pub kind: PropertyKind,
    /// Part of the concurrency token of the declaring type
    pub concurrency_token: bool,
    pub nullable: bool,
}

impl ResourceProperty {
    pub fn key(name: impl Into<String>, primitive: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Key(primitive),
            concurrency_token: false,
            nullable: false,
        }
    }

    pub fn primitive(name: impl Into<String>, primitive: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Primitive(primitive),
            concurrency_token: false,
            nullable: true,
        }
    }

    pub fn complex(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Complex(type_name.into()),
            concurrency_token: false,
            nullable: true,
        }
    }

    pub fn navigation(
        name: impl Into<String>,
        target_set: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Navigation(NavigationTarget {
                target_set: target_set.into(),
                multiplicity,
            }),
            concurrency_token: false,
            nullable: !matches!(multiplicity, Multiplicity::One),
        }
    }

    pub fn stream(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Stream,
            concurrency_token: false,
            nullable: true,
        }
    }

    /// Flag this property as part of the concurrency token.
    pub fn etag(mut self) -> Self {
        self.concurrency_token = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Primitive type of key and primitive properties.
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        match &self.kind {
            PropertyKind::Key(t) | PropertyKind::Primitive(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(self.kind, PropertyKind::Key(_))
    }

    pub fn navigation_target(&self) -> Option<&NavigationTarget> {
        match &self.kind {
            PropertyKind::Navigation(target) => Some(target),
            _ => None,
        }
    }

    /// Structural properties are everything except navigation properties.
    pub fn is_structural(&self) -> bool {
        !matches!(self.kind, PropertyKind::Navigation(_))
    }
}

/// An entity or complex type description.
///
/// `properties` holds only the properties declared on this type; inherited
/// properties are resolved through the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    pub kind: ResourceTypeKind,
    pub base_type: Option<String>,
    pub is_abstract: bool,
    /// Accepts dynamic properties not declared in the model
    pub is_open: bool,
    pub properties: Vec<ResourceProperty>,
}

impl ResourceType {
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ResourceTypeKind::Entity,
            base_type: None,
            is_abstract: false,
            is_open: false,
            properties: Vec::new(),
        }
    }

    pub fn complex(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceTypeKind::Complex,
            ..Self::entity(name)
        }
    }

    pub fn derived_from(mut self, base_type: impl Into<String>) -> Self {
        self.base_type = Some(base_type.into());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn open(mut self) -> Self {
        self.is_open = true;
        self
    }

    pub fn property(mut self, property: ResourceProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn is_entity(&self) -> bool {
        self.kind == ResourceTypeKind::Entity
    }
}

/// A named, addressable collection of entities of one base type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    pub name: String,
    pub entity_type: String,
}

impl ResourceSet {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}
