//! Resolved request path segments.

use crate::metadata::PrimitiveType;
use crate::provider::EntityKey;
use std::fmt;

/// Kind of a path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    EntitySet,
    Key,
    Navigation,
    Property,
    Value,
    Ref,
    Count,
    Batch,
    ServiceOperation,
    Metadata,
}

impl SegmentKind {
    /// `$value`, `$ref` and `$count` end a path.
    pub fn is_terminal_marker(&self) -> bool {
        matches!(self, Self::Value | Self::Ref | Self::Count)
    }
}

/// What the path addresses after a segment has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Addressed {
    /// Markers, `$metadata`, `$batch` and void operations
    Nothing,
    Entities { set: String, type_name: String },
    Entity { set: String, type_name: String },
    Complex { type_name: String },
    /// `None` for dynamic properties of open types
    Primitive(Option<PrimitiveType>),
    Stream,
}

impl Addressed {
    pub fn set_name(&self) -> Option<&str> {
        match self {
            Self::Entities { set, .. } | Self::Entity { set, .. } => Some(set),
            _ => None,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Entities { type_name, .. }
            | Self::Entity { type_name, .. }
            | Self::Complex { type_name } => Some(type_name),
            _ => None,
        }
    }
}

/// One step of a resolved request path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub kind: SegmentKind,
    /// Name as written in the URI
    pub identifier: String,
    /// Parsed key values of `Key` segments
    pub key: Option<EntityKey>,
    pub addressed: Addressed,
    /// Dynamic property of an open type
    pub open: bool,
}

impl PathSegment {
    pub fn new(kind: SegmentKind, identifier: impl Into<String>, addressed: Addressed) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            key: None,
            addressed,
            open: false,
        }
    }

    pub fn key(identifier: impl Into<String>, key: EntityKey, set: &str, type_name: &str) -> Self {
        Self {
            kind: SegmentKind::Key,
            identifier: identifier.into(),
            key: Some(key),
            addressed: Addressed::Entity {
                set: set.to_string(),
                type_name: type_name.to_string(),
            },
            open: false,
        }
    }

    pub fn marker(kind: SegmentKind, identifier: &str) -> Self {
        Self::new(kind, identifier, Addressed::Nothing)
    }

    /// Whether this segment addresses entities of a set.
    pub fn addresses_entities(&self) -> bool {
        matches!(
            self.addressed,
            Addressed::Entities { .. } | Addressed::Entity { .. }
        )
    }
}

/// A fully resolved request path. An empty path is the service document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcePath {
    pub segments: Vec<PathSegment>,
}

impl ResourcePath {
    pub fn is_service_document(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first_kind(&self) -> Option<SegmentKind> {
        self.segments.first().map(|s| s.kind)
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Terminal marker (`$value`, `$ref`, `$count`) if the path ends with one.
    pub fn marker(&self) -> Option<SegmentKind> {
        self.last()
            .map(|s| s.kind)
            .filter(|kind| kind.is_terminal_marker())
    }

    /// Index of the last segment that addresses a resource, skipping a
    /// trailing marker.
    pub fn target_index(&self) -> Option<usize> {
        let len = self.segments.len();
        match self.marker() {
            Some(_) => len.checked_sub(2),
            None => len.checked_sub(1),
        }
    }

    pub fn target(&self) -> Option<&PathSegment> {
        self.target_index().and_then(|i| self.segments.get(i))
    }

    /// Whether the path passes through a navigation property.
    pub fn has_navigation(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s.kind == SegmentKind::Navigation)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment.kind {
                SegmentKind::Key => {
                    if let Some(key) = &segment.key {
                        write!(f, "{}", key)?;
                    }
                }
                _ => write!(f, "/{}", segment.identifier)?,
            }
        }
        Ok(())
    }
}
