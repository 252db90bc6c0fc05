//! Request path resolution.
//!
//! Turns the path of a request into a [`ResourcePath`] against the service
//! model. Failures map to the protocol statuses:
//!
//! * malformed syntax, key literals that do not fit the declared key types,
//!   navigation off a collection without a key, or segments after `$value`,
//!   `$ref` or `$count` - 400
//! * unknown or hidden entity sets, properties and operations - 404
//! * a method the addressed resource does not support - 405

use super::query_options::QueryOptions;
use super::segment::{Addressed, PathSegment, ResourcePath, SegmentKind};
use crate::error::{ODataError, ODataResult};
use crate::literal::{parse_typed, split_top_level};
use crate::metadata::{PropertyKind, ServiceModel};
use crate::provider::EntityKey;
use crate::service::{ResultKind, ServiceConfiguration};
use http::Method;
use log::trace;
use percent_encoding::percent_decode_str;

/// Resolves request paths against one service's model and configuration.
pub struct Resolver<'a> {
    model: &'a ServiceModel,
    configuration: &'a ServiceConfiguration,
}

impl<'a> Resolver<'a> {
    pub fn new(model: &'a ServiceModel, configuration: &'a ServiceConfiguration) -> Self {
        Self {
            model,
            configuration,
        }
    }

    /// Resolve `path` (relative to the service root) for `method`.
    pub fn resolve(&self, method: &Method, path: &str) -> ODataResult<ResourcePath> {
        let path = self.parse_path(path)?;
        check_method(self.configuration, method, &path)?;
        trace!("Resolved {} {}", method, path);
        Ok(path)
    }

    /// Resolve without the method check.
    pub fn parse_path(&self, path: &str) -> ODataResult<ResourcePath> {
        let raw_segments = split_path(path)?;
        let mut segments: Vec<PathSegment> = Vec::new();

        for raw in raw_segments {
            let (identifier, predicate) = split_predicate(&raw)?;
            match segments.last() {
                None => self.resolve_first(&mut segments, identifier, predicate)?,
                Some(previous) => {
                    let previous = previous.clone();
                    self.resolve_next(&mut segments, &previous, identifier, predicate)?
                }
            }
        }
        Ok(ResourcePath { segments })
    }

    /// Resolve an entity reference such as a `$id` value or an
    /// `@odata.bind` URL to its set and key.
    ///
    /// Absolute references must start with the service root.
    pub fn resolve_entity_reference(
        &self,
        reference: &str,
        service_root: &str,
    ) -> ODataResult<(String, EntityKey)> {
        let invalid = || {
            ODataError::bad_request(format!(
                "The reference '{}' does not identify a single entity.",
                reference
            ))
        };
        let relative = match url::Url::parse(reference) {
            Ok(absolute) => {
                let root = url::Url::parse(service_root).map_err(|_| invalid())?;
                let text = absolute.as_str();
                text.strip_prefix(root.as_str())
                    .ok_or_else(|| {
                        ODataError::bad_request(format!(
                            "The reference '{}' is not located under the service root '{}'.",
                            reference, service_root
                        ))
                    })?
                    .to_string()
            }
            Err(_) => reference.to_string(),
        };

        let path = self.parse_path(&relative)?;
        match path.segments.as_slice() {
            [set, key] if set.kind == SegmentKind::EntitySet && key.kind == SegmentKind::Key => {
                let key_value = key.key.clone().ok_or_else(invalid)?;
                Ok((set.identifier.clone(), key_value))
            }
            _ => Err(invalid()),
        }
    }

    fn resolve_first(
        &self,
        segments: &mut Vec<PathSegment>,
        identifier: &str,
        predicate: Option<&str>,
    ) -> ODataResult<()> {
        match identifier {
            "$metadata" | "$batch" => {
                if predicate.is_some() {
                    return Err(syntax_error(identifier));
                }
                let kind = if identifier == "$metadata" {
                    SegmentKind::Metadata
                } else {
                    SegmentKind::Batch
                };
                segments.push(PathSegment::marker(kind, identifier));
                return Ok(());
            }
            "$value" | "$ref" | "$count" => {
                return Err(ODataError::bad_request(format!(
                    "The segment '{}' cannot be the first segment of a request path.",
                    identifier
                )));
            }
            _ => {}
        }

        if let Some(set) = self.model.resource_set(identifier) {
            if !self.configuration.entity_set_rights(&set.name).is_visible() {
                return Err(not_found(identifier));
            }
            let type_name = set.entity_type.clone();
            segments.push(PathSegment::new(
                SegmentKind::EntitySet,
                identifier,
                Addressed::Entities {
                    set: set.name.clone(),
                    type_name: type_name.clone(),
                },
            ));
            if let Some(predicate) = predicate {
                let key = self.parse_key(&type_name, predicate)?;
                segments.push(PathSegment::key(predicate, key, &set.name, &type_name));
            }
            return Ok(());
        }

        if let Some(operation) = self.configuration.service_operation(identifier) {
            let rights = self.configuration.service_operation_rights(identifier);
            if !rights.is_visible() {
                return Err(not_found(identifier));
            }
            if let Some(set) = operation.result.set_name() {
                if !rights.overrides_entity_set_rights()
                    && !self.configuration.entity_set_rights(set).is_visible()
                {
                    return Err(not_found(identifier));
                }
            }
            if predicate.is_some_and(|p| !p.is_empty()) {
                return Err(ODataError::bad_request(format!(
                    "Service operation '{}' does not accept a key predicate.",
                    identifier
                )));
            }
            let addressed = match &operation.result {
                ResultKind::Void => Addressed::Nothing,
                ResultKind::Primitive(primitive) => Addressed::Primitive(Some(*primitive)),
                ResultKind::Entity(set) | ResultKind::Entities(set) => {
                    let type_name = self
                        .model
                        .resource_set(set)
                        .map(|s| s.entity_type.clone())
                        .ok_or_else(|| not_found(set))?;
                    if matches!(operation.result, ResultKind::Entity(_)) {
                        Addressed::Entity {
                            set: set.clone(),
                            type_name,
                        }
                    } else {
                        Addressed::Entities {
                            set: set.clone(),
                            type_name,
                        }
                    }
                }
            };
            segments.push(PathSegment::new(
                SegmentKind::ServiceOperation,
                identifier,
                addressed,
            ));
            return Ok(());
        }

        Err(not_found(identifier))
    }

    fn resolve_next(
        &self,
        segments: &mut Vec<PathSegment>,
        previous: &PathSegment,
        identifier: &str,
        predicate: Option<&str>,
    ) -> ODataResult<()> {
        if previous.kind.is_terminal_marker()
            || matches!(previous.kind, SegmentKind::Metadata | SegmentKind::Batch)
        {
            return Err(ODataError::bad_request(format!(
                "The request URI is not valid. The segment '{}' must be the last segment in the URI because it is one of the following: $batch, $value, $metadata, $count, $ref.",
                previous.identifier
            )));
        }

        if previous.kind == SegmentKind::ServiceOperation {
            return match (&previous.addressed, identifier) {
                (Addressed::Entities { .. }, "$count") if predicate.is_none() => {
                    segments.push(PathSegment::marker(SegmentKind::Count, identifier));
                    Ok(())
                }
                _ => Err(ODataError::bad_request(format!(
                    "The request URI is not valid. Segments cannot follow service operation '{}' here.",
                    previous.identifier
                ))),
            };
        }

        match identifier {
            "$count" => {
                reject_predicate(identifier, predicate)?;
                match &previous.addressed {
                    Addressed::Entities { .. } => {
                        segments.push(PathSegment::marker(SegmentKind::Count, identifier));
                        Ok(())
                    }
                    _ => Err(ODataError::bad_request(
                        "The request URI is not valid, $count cannot be applied to the segment since $count can only follow an entity set or a collection navigation property.",
                    )),
                }
            }
            "$ref" => {
                reject_predicate(identifier, predicate)?;
                match &previous.addressed {
                    Addressed::Entities { .. } | Addressed::Entity { .. } => {
                        segments.push(PathSegment::marker(SegmentKind::Ref, identifier));
                        Ok(())
                    }
                    _ => Err(ODataError::bad_request(
                        "The request URI is not valid, $ref can only follow an entity or a collection of entities.",
                    )),
                }
            }
            "$value" => {
                reject_predicate(identifier, predicate)?;
                match &previous.addressed {
                    Addressed::Primitive(_) | Addressed::Stream => {
                        segments.push(PathSegment::marker(SegmentKind::Value, identifier));
                        Ok(())
                    }
                    _ => Err(ODataError::bad_request(
                        "The request URI is not valid, $value can only follow a primitive or stream property.",
                    )),
                }
            }
            _ if identifier.starts_with('$') => Err(not_found(identifier)),
            _ => match &previous.addressed {
                Addressed::Entities { .. } => Err(ODataError::bad_request(format!(
                    "The request URI is not valid. Since the segment '{}' refers to a collection, this must be the last segment in the request URI or it must be followed by a key predicate.",
                    previous.identifier
                ))),
                Addressed::Entity { type_name, .. } => {
                    self.resolve_member(segments, type_name, true, identifier, predicate)
                }
                Addressed::Complex { type_name } => {
                    self.resolve_member(segments, type_name, false, identifier, predicate)
                }
                Addressed::Primitive(_) | Addressed::Stream | Addressed::Nothing => {
                    Err(ODataError::bad_request(format!(
                        "The request URI is not valid. The segment '{}' cannot be followed by '{}'.",
                        previous.identifier, identifier
                    )))
                }
            },
        }
    }

    /// Property or navigation member of an entity or complex value.
    fn resolve_member(
        &self,
        segments: &mut Vec<PathSegment>,
        owner_type: &str,
        owner_is_entity: bool,
        identifier: &str,
        predicate: Option<&str>,
    ) -> ODataResult<()> {
        let Some(property) = self.model.property(owner_type, identifier) else {
            let open = self
                .model
                .resource_type(owner_type)
                .is_some_and(|t| t.is_open);
            if !open {
                return Err(not_found(identifier));
            }
            reject_predicate(identifier, predicate)?;
            let mut segment = PathSegment::new(
                SegmentKind::Property,
                identifier,
                Addressed::Primitive(None),
            );
            segment.open = true;
            segments.push(segment);
            return Ok(());
        };

        match &property.kind {
            PropertyKind::Navigation(target) => {
                if !owner_is_entity {
                    return Err(not_found(identifier));
                }
                if !self
                    .configuration
                    .entity_set_rights(&target.target_set)
                    .is_visible()
                {
                    return Err(not_found(identifier));
                }
                let type_name = self
                    .model
                    .resource_set(&target.target_set)
                    .map(|s| s.entity_type.clone())
                    .ok_or_else(|| not_found(&target.target_set))?;
                if target.multiplicity.is_collection() {
                    segments.push(PathSegment::new(
                        SegmentKind::Navigation,
                        identifier,
                        Addressed::Entities {
                            set: target.target_set.clone(),
                            type_name: type_name.clone(),
                        },
                    ));
                    if let Some(predicate) = predicate {
                        let key = self.parse_key(&type_name, predicate)?;
                        segments.push(PathSegment::key(
                            predicate,
                            key,
                            &target.target_set,
                            &type_name,
                        ));
                    }
                } else {
                    reject_predicate(identifier, predicate)?;
                    segments.push(PathSegment::new(
                        SegmentKind::Navigation,
                        identifier,
                        Addressed::Entity {
                            set: target.target_set.clone(),
                            type_name,
                        },
                    ));
                }
            }
            PropertyKind::Key(primitive) | PropertyKind::Primitive(primitive) => {
                reject_predicate(identifier, predicate)?;
                segments.push(PathSegment::new(
                    SegmentKind::Property,
                    identifier,
                    Addressed::Primitive(Some(*primitive)),
                ));
            }
            PropertyKind::Complex(type_name) => {
                reject_predicate(identifier, predicate)?;
                segments.push(PathSegment::new(
                    SegmentKind::Property,
                    identifier,
                    Addressed::Complex {
                        type_name: type_name.clone(),
                    },
                ));
            }
            PropertyKind::Stream => {
                reject_predicate(identifier, predicate)?;
                segments.push(PathSegment::new(
                    SegmentKind::Property,
                    identifier,
                    Addressed::Stream,
                ));
            }
        }
        Ok(())
    }

    /// Parse a key predicate against the key properties of `type_name`.
    ///
    /// Every failure is a bad request, including values out of range.
    pub fn parse_key(&self, type_name: &str, predicate: &str) -> ODataResult<EntityKey> {
        let invalid = |detail: &str| {
            ODataError::bad_request(format!(
                "Bad Request - Error in query syntax. The key predicate '({})' is not valid: {}",
                predicate, detail
            ))
        };
        let key_properties = self.model.key_properties(type_name);
        let parts = split_top_level(predicate, ',').ok_or_else(|| invalid("unterminated string"))?;
        if parts.len() != key_properties.len() {
            return Err(invalid("wrong number of key values"));
        }

        let mut named: Vec<(&str, &str)> = Vec::with_capacity(parts.len());
        for part in &parts {
            match split_top_level(part, '=').as_deref() {
                Some([value]) if key_properties.len() == 1 => {
                    named.push((key_properties[0].name.as_str(), value.trim()));
                }
                Some([name, value]) => named.push((name.trim(), value.trim())),
                _ => return Err(invalid("expected name=value")),
            }
        }

        let mut values = Vec::with_capacity(key_properties.len());
        for property in key_properties {
            let mut matching = named.iter().filter(|(name, _)| *name == property.name);
            let (_, text) = matching
                .next()
                .ok_or_else(|| invalid(&format!("missing value for '{}'", property.name)))?;
            if matching.next().is_some() {
                return Err(invalid(&format!("duplicate value for '{}'", property.name)));
            }
            let primitive = property
                .primitive_type()
                .ok_or_else(|| invalid("key property is not primitive"))?;
            let literal = parse_typed(text, primitive).map_err(|e| invalid(&e.to_string()))?;
            if literal.is_null() {
                return Err(invalid("key values cannot be null"));
            }
            values.push((property.name.clone(), literal));
        }
        Ok(EntityKey::new(values))
    }
}

/// Query option rules that depend on the resolved path.
pub fn validate_query_options(
    path: &ResourcePath,
    method: &Method,
    options: &QueryOptions,
) -> ODataResult<()> {
    match path.marker() {
        Some(SegmentKind::Ref) => {
            if options.has_structural_options() {
                return Err(ODataError::bad_request(
                    "Query options $select, $expand, $top, $skip and $count cannot be applied to a $ref request.",
                ));
            }
        }
        Some(SegmentKind::Count) | Some(SegmentKind::Value) => {
            if options.shapes_entities() {
                return Err(ODataError::bad_request(
                    "Query options $select and $expand cannot be applied to a $count or $value request.",
                ));
            }
        }
        _ => {}
    }

    if options.id.is_some() && !(path.marker() == Some(SegmentKind::Ref) && method == Method::DELETE)
    {
        return Err(ODataError::bad_request(
            "The $id query option can only be used when deleting a link from a collection navigation property.",
        ));
    }

    let addresses_entities = path.target().is_some_and(|s| s.addresses_entities());
    if options.shapes_entities() && !addresses_entities {
        return Err(ODataError::bad_request(
            "Query options $select and $expand can only be applied to entities.",
        ));
    }
    if (options.top.is_some() || options.skip.is_some() || options.count.is_some())
        && !matches!(
            path.target().map(|s| &s.addressed),
            Some(Addressed::Entities { .. })
        )
    {
        return Err(ODataError::bad_request(
            "Query options $top, $skip and $count can only be applied to collections.",
        ));
    }
    Ok(())
}

/// Methods supported by the addressed resource.
pub fn allowed_methods(configuration: &ServiceConfiguration, path: &ResourcePath) -> Vec<Method> {
    let Some(last) = path.last() else {
        return vec![Method::GET];
    };
    match last.kind {
        SegmentKind::Metadata | SegmentKind::Count => vec![Method::GET],
        SegmentKind::Batch => vec![Method::POST],
        SegmentKind::ServiceOperation => configuration
            .service_operation(&last.identifier)
            .map(|op| vec![op.method.clone()])
            .unwrap_or_default(),
        SegmentKind::Value => vec![Method::GET, Method::PUT],
        SegmentKind::Ref => ref_methods(path),
        SegmentKind::EntitySet | SegmentKind::Key | SegmentKind::Navigation => {
            match &last.addressed {
                Addressed::Entities { .. } => vec![Method::GET, Method::POST],
                _ => vec![Method::GET, Method::PUT, Method::PATCH, Method::DELETE],
            }
        }
        SegmentKind::Property => match &last.addressed {
            Addressed::Complex { .. } => {
                vec![Method::GET, Method::PUT, Method::PATCH, Method::DELETE]
            }
            Addressed::Stream => vec![Method::GET, Method::PUT],
            _ => vec![Method::GET, Method::PUT, Method::DELETE],
        },
    }
}

fn ref_methods(path: &ResourcePath) -> Vec<Method> {
    let Some(target_index) = path.target_index() else {
        return vec![Method::GET];
    };
    let target = &path.segments[target_index];
    let navigation = match target.kind {
        SegmentKind::Navigation => Some(target),
        SegmentKind::Key if target_index > 0 => path
            .segments
            .get(target_index - 1)
            .filter(|s| s.kind == SegmentKind::Navigation),
        _ => None,
    };
    let Some(navigation) = navigation else {
        return vec![Method::GET];
    };

    match (target.kind, &navigation.addressed) {
        (SegmentKind::Key, _) => vec![Method::GET, Method::DELETE],
        (_, Addressed::Entities { .. }) => vec![Method::GET, Method::POST, Method::DELETE],
        _ => vec![Method::GET, Method::PUT, Method::DELETE],
    }
}

fn check_method(
    configuration: &ServiceConfiguration,
    method: &Method,
    path: &ResourcePath,
) -> ODataResult<()> {
    let allowed = allowed_methods(configuration, path);
    if allowed.contains(method) {
        return Ok(());
    }
    Err(ODataError::method_not_allowed(format!(
        "The method '{}' is not allowed for the resource '{}'; allowed: {}.",
        method,
        if path.is_service_document() {
            "/".to_string()
        } else {
            path.to_string()
        },
        allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

fn split_path(path: &str) -> ODataResult<Vec<String>> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for raw in trimmed.split('/') {
        if raw.is_empty() {
            return Err(ODataError::bad_request(
                "The request URI is not valid. Empty segments are not allowed.",
            ));
        }
        let decoded = percent_decode_str(raw).decode_utf8().map_err(|_| {
            ODataError::bad_request(format!("The segment '{}' is not valid UTF-8.", raw))
        })?;
        segments.push(decoded.into_owned());
    }
    Ok(segments)
}

/// `Name(predicate)` into name and predicate text.
fn split_predicate(raw: &str) -> ODataResult<(&str, Option<&str>)> {
    match raw.find('(') {
        None => {
            if raw.contains(')') {
                return Err(syntax_error(raw));
            }
            Ok((raw, None))
        }
        Some(open) => {
            let inner = raw[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| syntax_error(raw))?;
            let identifier = &raw[..open];
            if identifier.is_empty() {
                return Err(syntax_error(raw));
            }
            Ok((identifier, Some(inner)))
        }
    }
}

fn reject_predicate(identifier: &str, predicate: Option<&str>) -> ODataResult<()> {
    match predicate {
        None => Ok(()),
        Some(_) => Err(ODataError::bad_request(format!(
            "The request URI is not valid. The segment '{}' cannot include key predicates.",
            identifier
        ))),
    }
}

fn syntax_error(segment: &str) -> ODataError {
    ODataError::bad_request(format!(
        "Bad Request - Error in query syntax at segment '{}'.",
        segment
    ))
}

fn not_found(identifier: &str) -> ODataError {
    ODataError::not_found(format!(
        "Resource not found for the segment '{}'.",
        identifier
    ))
}
