//! Property, `$value` and stream access.

use super::read::not_modified;
use super::{Located, Target, entity_end, walk};
use crate::dispatcher::context::DispatchState;
use crate::dispatcher::core::{Dispatch, ODataResponse, Prepared};
use crate::dispatcher::negotiation::{APPLICATION_OCTET_STREAM, ensure_json_content};
use crate::dispatcher::payload::{self, check_value};
use crate::error::{ODataError, ODataResult};
use crate::etag::{ConcurrencyToken, RequestIntent};
use crate::interceptor::{UpdateOperations, notify_change};
use crate::literal::{Literal, parse_typed};
use crate::metadata::{PrimitiveType, PropertyKind, ResourceProperty, ServiceModel};
use crate::uri::{Addressed, SegmentKind};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use http::header::{CONTENT_TYPE, ETAG};
use http::{Method, StatusCode};
use serde_json::{Map, Value, json};

/// Property path below an entity, with the declarations along it.
struct PropertyPath<'m> {
    names: Vec<String>,
    /// `None` for dynamic properties of open types
    declarations: Vec<Option<&'m ResourceProperty>>,
    addressed: Addressed,
    raw_value: bool,
}

impl PropertyPath<'_> {
    fn leaf(&self) -> Option<&ResourceProperty> {
        self.declarations.last().copied().flatten()
    }

    fn display(&self) -> String {
        self.names.join("/")
    }
}

fn property_path<'m>(
    model: &'m ServiceModel,
    request: &Prepared,
    entity_type: &str,
) -> ODataResult<PropertyPath<'m>> {
    let segments = &request.path.segments[entity_end(&request.path)..];
    let mut names = Vec::new();
    let mut declarations = Vec::new();
    let mut addressed = Addressed::Nothing;
    let mut owner = Some(entity_type.to_string());
    for segment in segments.iter().filter(|s| s.kind == SegmentKind::Property) {
        let declaration = owner
            .as_deref()
            .and_then(|type_name| model.property(type_name, &segment.identifier));
        owner = match declaration.map(|p| &p.kind) {
            Some(PropertyKind::Complex(type_name)) => Some(type_name.clone()),
            _ => None,
        };
        names.push(segment.identifier.clone());
        declarations.push(declaration);
        addressed = segment.addressed.clone();
    }
    if names.is_empty() {
        return Err(ODataError::internal_message("property request without a property"));
    }
    Ok(PropertyPath {
        names,
        declarations,
        addressed,
        raw_value: request.path.marker() == Some(SegmentKind::Value),
    })
}

fn lookup<'e>(properties: &'e Map<String, Value>, names: &[String]) -> Option<&'e Value> {
    let (first, rest) = names.split_first()?;
    let value = properties.get(first)?;
    match rest {
        [] => Some(value),
        _ => lookup(value.as_object()?, rest),
    }
}

fn assign(properties: &mut Map<String, Value>, names: &[String], value: Value) -> ODataResult<()> {
    let Some((first, rest)) = names.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        properties.insert(first.clone(), value);
        return Ok(());
    }
    let slot = properties
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    match slot.as_object_mut() {
        Some(inner) => assign(inner, rest, value),
        None => Err(ODataError::bad_request(format!(
            "The property '{}' is not a complex value.",
            first
        ))),
    }
}

/// GET, PUT, PATCH or DELETE of a property or its raw value.
pub(crate) fn handle(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    let model = d.model();
    let walk = walk(d, &request.path, true)?;
    let Target::Single(located) = walk.target else {
        return Err(ODataError::internal_message("property owner is not a single entity"));
    };
    let path = property_path(model, request, located.entity.type_name())?;
    let token = ConcurrencyToken::compute(&located.entity, model)?;

    if request.request.method == Method::GET {
        if !request
            .precondition
            .evaluate(RequestIntent::Read, token.as_ref())
            .into_result()?
        {
            return Ok(not_modified(d, token.as_ref()));
        }
        return read(d, &located, &path, token.as_ref());
    }

    request
        .precondition
        .evaluate(RequestIntent::Mutate, token.as_ref())
        .into_result()?;
    write(d, request, located, &path)
}

fn read(
    d: &mut Dispatch,
    located: &Located,
    path: &PropertyPath,
    token: Option<&ConcurrencyToken>,
) -> ODataResult<ODataResponse> {
    d.context.enter(DispatchState::Executing);
    let value = lookup(located.entity.properties(), &path.names)
        .cloned()
        .unwrap_or(Value::Null);

    d.context.enter(DispatchState::Serializing);
    let mut response = if path.raw_value || path.addressed == Addressed::Stream {
        raw_response(path, value)?
    } else if value.is_null() {
        ODataResponse::no_content()
    } else {
        let context = format!(
            "{}$metadata#{}{}/{}",
            d.service_root,
            located.set,
            located.key.to_predicate(),
            path.display()
        );
        let body = match (&path.addressed, value) {
            (Addressed::Complex { .. }, Value::Object(mut object)) => {
                object.insert("@odata.context".to_string(), json!(context));
                Value::Object(object)
            }
            (_, value) => json!({ "@odata.context": context, "value": value }),
        };
        ODataResponse::with_json(StatusCode::OK, &body)
    };
    if let Some(token) = token {
        response.insert_header(ETAG, &token.to_header());
    }
    Ok(response)
}

fn raw_response(path: &PropertyPath, value: Value) -> ODataResult<ODataResponse> {
    if value.is_null() {
        return Err(ODataError::not_found(format!(
            "The value of the property '{}' is null.",
            path.display()
        )));
    }
    let binary = |value: &Value| {
        value
            .as_str()
            .and_then(|text| BASE64.decode(text).ok())
            .ok_or_else(|| {
                ODataError::internal_message(format!(
                    "stored value of '{}' is not base64",
                    path.display()
                ))
            })
    };
    match &path.addressed {
        Addressed::Stream | Addressed::Primitive(Some(PrimitiveType::Binary)) => Ok(
            ODataResponse::with_bytes(StatusCode::OK, APPLICATION_OCTET_STREAM, binary(&value)?),
        ),
        Addressed::Primitive(Some(primitive)) => {
            let literal = Literal::from_json(&value, *primitive).map_err(ODataError::internal)?;
            Ok(ODataResponse::with_text(StatusCode::OK, literal.to_raw_string()))
        }
        Addressed::Primitive(None) => {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            Ok(ODataResponse::with_text(StatusCode::OK, text))
        }
        _ => Err(ODataError::bad_request(format!(
            "$value cannot be applied to the property '{}'.",
            path.display()
        ))),
    }
}

fn write(
    d: &mut Dispatch,
    request: &Prepared,
    located: Located,
    path: &PropertyPath,
) -> ODataResult<ODataResponse> {
    let model = d.model();
    if path.names.len() == 1 && path.leaf().is_some_and(ResourceProperty::is_key) {
        return Err(ODataError::bad_request(format!(
            "The key property '{}' cannot be modified.",
            path.display()
        )));
    }

    let new_value = match request.request.method {
        Method::DELETE => Value::Null,
        _ if path.raw_value || path.addressed == Addressed::Stream => {
            raw_value(path, &request.request.body)?
        }
        _ => {
            ensure_json_content(request.request.header(CONTENT_TYPE)?)?;
            let body = payload::parse_json(&request.request.body)?;
            json_value(path, body)?
        }
    };
    let merge = request.request.method == Method::PATCH;
    if let Some(declaration) = path.leaf() {
        if !(merge || matches!(declaration.kind, PropertyKind::Stream)) {
            check_value(model, declaration, &new_value)?;
        }
    }

    d.context.enter(DispatchState::Executing);
    let mut entity = located.entity;
    let new_value = match (merge, lookup(entity.properties(), &path.names), new_value) {
        (true, Some(Value::Object(current)), Value::Object(changes)) => {
            let mut merged = current.clone();
            merged.extend(changes);
            Value::Object(merged)
        }
        (_, _, value) => value,
    };
    if merge {
        if let Some(declaration) = path.leaf() {
            if !matches!(declaration.kind, PropertyKind::Stream) {
                check_value(model, declaration, &new_value)?;
            }
        }
    }
    assign(entity.properties_mut(), &path.names, new_value)?;
    d.provider.update(&located.key, entity.clone())?;
    notify_change(
        d.configuration().interceptors(),
        &entity,
        UpdateOperations::CHANGE,
        &mut d.context.counters,
    )?;

    d.context.enter(DispatchState::Serializing);
    let mut response = ODataResponse::no_content();
    if let Some(token) = ConcurrencyToken::compute(&entity, model)? {
        response.insert_header(ETAG, &token.to_header());
    }
    Ok(response)
}

/// Value of a JSON property body: `{"value": ...}` for primitives, the
/// object itself for complex values.
fn json_value(path: &PropertyPath, body: Value) -> ODataResult<Value> {
    match (&path.addressed, body) {
        (Addressed::Complex { .. }, Value::Object(mut object)) => {
            object.retain(|name, _| !name.starts_with('@'));
            Ok(Value::Object(object))
        }
        (_, Value::Object(mut object)) if object.contains_key("value") => {
            Ok(object.remove("value").unwrap_or(Value::Null))
        }
        _ => Err(ODataError::bad_request(format!(
            "The payload for the property '{}' must be an object with a 'value' property.",
            path.display()
        ))),
    }
}

/// Value of a raw (`$value` or stream) body in its stored form.
fn raw_value(path: &PropertyPath, body: &[u8]) -> ODataResult<Value> {
    let text = || {
        std::str::from_utf8(body).map_err(|_| {
            ODataError::bad_request(format!(
                "The value for the property '{}' is not valid UTF-8 text.",
                path.display()
            ))
        })
    };
    match &path.addressed {
        Addressed::Stream | Addressed::Primitive(Some(PrimitiveType::Binary)) => {
            Ok(Value::String(BASE64.encode(body)))
        }
        Addressed::Primitive(Some(PrimitiveType::String)) | Addressed::Primitive(None) => {
            Ok(Value::String(text()?.to_string()))
        }
        Addressed::Primitive(Some(primitive)) => parse_typed(text()?.trim(), *primitive)
            .map(|literal| literal.to_json())
            .map_err(|e| {
                ODataError::bad_request(format!(
                    "Invalid value for the property '{}': {}",
                    path.display(),
                    e
                ))
            }),
        _ => Err(ODataError::bad_request(format!(
            "$value cannot be applied to the property '{}'.",
            path.display()
        ))),
    }
}
