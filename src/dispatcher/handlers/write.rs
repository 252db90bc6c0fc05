//! Entity writes: create (with deep insert and binding), update and delete.

use super::{Target, require_set, walk};
use crate::config::EntitySetRights;
use crate::dispatcher::context::DispatchState;
use crate::dispatcher::core::{Dispatch, ODATA_ENTITY_ID, ODataResponse, Prepared};
use crate::dispatcher::negotiation::ensure_json_content;
use crate::dispatcher::payload::{self, EntityPayload, NavigationContent, NavigationPayload};
use crate::error::{ODataError, ODataResult};
use crate::etag::{ConcurrencyToken, RequestIntent};
use crate::interceptor::{UpdateOperations, notify_change};
use crate::metadata::PropertyKind;
use crate::provider::{Entity, EntityKey};
use http::header::{CONTENT_TYPE, ETAG, LOCATION};
use http::{Method, StatusCode};
use log::debug;
use serde_json::{Value, json};

/// POST to an entity set or a collection navigation property.
pub(crate) fn create(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    request
        .precondition
        .ensure_absent("on POST requests")?;
    ensure_json_content(request.request.header(CONTENT_TYPE)?)?;
    let model = d.model();
    let walk = walk(d, &request.path, false)?;
    let Target::Unloaded { set, .. } = walk.target else {
        return Err(ODataError::internal_message("create target was loaded"));
    };
    let set_type = model
        .resource_set(&set)
        .map(|s| s.entity_type.clone())
        .ok_or_else(|| ODataError::internal_message(format!("unknown entity set '{}'", set)))?;
    let body = payload::parse_json(&request.request.body)?;
    let entity_payload = payload::parse_entity(model, &set_type, body)?;

    d.context.enter(DispatchState::Executing);
    let (entity, key) = insert(d, &set, entity_payload)?;
    if let (Some(parent), Some(navigation)) = (&walk.parent, &walk.navigation) {
        d.provider
            .add_link(&parent.set, &parent.key, navigation, &set, &key)?;
    }

    d.context.enter(DispatchState::Serializing);
    let location = payload::entity_id(&d.service_root, &set, &key);
    let token = ConcurrencyToken::compute(&entity, model)?;
    let mut response = if request.request.prefers_return("minimal") {
        let mut response = ODataResponse::no_content();
        response.insert_header(ODATA_ENTITY_ID, &location);
        response
    } else {
        let mut object = payload::entity_json(model, &d.service_root, &entity, None)?;
        object.insert(
            "@odata.context".to_string(),
            json!(format!("{}$metadata#{}/$entity", d.service_root, set)),
        );
        ODataResponse::with_json(StatusCode::CREATED, &Value::Object(object))
    };
    response.insert_header(LOCATION, &location);
    if let Some(token) = token {
        response.insert_header(ETAG, &token.to_header());
    }
    Ok(response)
}

/// Create an entity and everything nested in it.
///
/// The entity is staged first so nested entities and bound references can
/// link to it. Navigation content is processed in declaration order, and
/// the `ADD` change interceptors of the entity run after those of every
/// nested entity.
fn insert(d: &mut Dispatch, set: &str, entity_payload: EntityPayload) -> ODataResult<(Entity, EntityKey)> {
    let model = d.model();
    let mut entity = Entity::new(set, &entity_payload.type_name);
    for (name, value) in entity_payload.properties {
        entity.set(name, value);
    }
    let key = entity.key(model)?;
    debug!("Inserting {}{}", set, key.to_predicate());
    d.provider.create(entity.clone(), key.clone())?;

    for NavigationPayload {
        name,
        target,
        content,
    } in entity_payload.navigation
    {
        match content {
            NavigationContent::Bind(references) => {
                for reference in &references {
                    let target_key = bound_entity(d, reference, &target.target_set)?;
                    d.provider
                        .add_link(set, &key, &name, &target.target_set, &target_key)?;
                }
            }
            NavigationContent::Inline(children) => {
                require_set(
                    d.configuration(),
                    &target.target_set,
                    EntitySetRights::WRITE_APPEND,
                )?;
                for child in children {
                    let (_, child_key) = insert(d, &target.target_set, child)?;
                    d.provider
                        .add_link(set, &key, &name, &target.target_set, &child_key)?;
                }
            }
        }
    }

    notify_change(
        d.configuration().interceptors(),
        &entity,
        UpdateOperations::ADD,
        &mut d.context.counters,
    )?;
    Ok((entity, key))
}

/// Resolve an `@odata.bind` reference to the key of an existing entity of
/// `expected_set`.
fn bound_entity(d: &mut Dispatch, reference: &str, expected_set: &str) -> ODataResult<EntityKey> {
    let (set, key) = d.resolve_reference(reference)?;
    if set != expected_set {
        return Err(ODataError::bad_request(format!(
            "The reference '{}' does not point to an entity of the set '{}'.",
            reference, expected_set
        )));
    }
    if d.provider.get(&set, &key)?.is_none() {
        return Err(ODataError::not_found(format!(
            "The entity referenced by '{}' does not exist.",
            reference
        )));
    }
    Ok(key)
}

/// PUT (replace) or PATCH (merge) of a single entity.
pub(crate) fn update(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    ensure_json_content(request.request.header(CONTENT_TYPE)?)?;
    let model = d.model();
    let walk = walk(d, &request.path, true)?;
    let Target::Single(located) = walk.target else {
        return Err(ODataError::internal_message("update target is not a single entity"));
    };
    let token = ConcurrencyToken::compute(&located.entity, model)?;
    request
        .precondition
        .evaluate(RequestIntent::Mutate, token.as_ref())
        .into_result()?;

    let body = payload::parse_json(&request.request.body)?;
    let entity_payload = payload::parse_entity(model, located.entity.type_name(), body)?;

    d.context.enter(DispatchState::Executing);
    let replace = request.request.method == Method::PUT;
    let mut updated = if replace {
        let mut fresh = Entity::new(&located.set, located.entity.type_name());
        for property in model.properties(located.entity.type_name()) {
            // keys and streams are not part of an entity payload
            if property.is_key() || matches!(property.kind, PropertyKind::Stream) {
                if let Some(value) = located.entity.get(&property.name) {
                    fresh.set(property.name.clone(), value.clone());
                }
            } else if property.is_structural() {
                fresh.set(property.name.clone(), Value::Null);
            }
        }
        fresh
    } else {
        located.entity.clone()
    };
    for (name, value) in entity_payload.properties {
        updated.set(name, value);
    }
    if replace {
        for property in model.properties(located.entity.type_name()) {
            let required = property.is_structural() && !property.nullable;
            if required && updated.get(&property.name).is_none_or(Value::is_null) {
                return Err(ODataError::bad_request(format!(
                    "The property '{}' cannot be set to null.",
                    property.name
                )));
            }
        }
    }
    if updated.key(model)? != located.key {
        return Err(ODataError::bad_request(
            "The key properties of an entity cannot be changed.",
        ));
    }

    for NavigationPayload {
        name,
        target,
        content,
    } in entity_payload.navigation
    {
        let NavigationContent::Bind(references) = content else {
            return Err(ODataError::bad_request(format!(
                "Inline entities for '{}' are not supported in an update; bind existing entities instead.",
                name
            )));
        };
        if !target.multiplicity.is_collection() {
            d.provider.clear_links(&located.set, &located.key, &name)?;
        }
        for reference in &references {
            let target_key = bound_entity(d, reference, &target.target_set)?;
            d.provider.add_link(
                &located.set,
                &located.key,
                &name,
                &target.target_set,
                &target_key,
            )?;
        }
    }

    d.provider.update(&located.key, updated.clone())?;
    notify_change(
        d.configuration().interceptors(),
        &updated,
        UpdateOperations::CHANGE,
        &mut d.context.counters,
    )?;

    d.context.enter(DispatchState::Serializing);
    let token = ConcurrencyToken::compute(&updated, model)?;
    let mut response = if request.request.prefers_return("representation") {
        let mut object = payload::entity_json(model, &d.service_root, &updated, None)?;
        object.insert(
            "@odata.context".to_string(),
            json!(format!("{}$metadata#{}/$entity", d.service_root, located.set)),
        );
        ODataResponse::with_json(StatusCode::OK, &Value::Object(object))
    } else {
        ODataResponse::no_content()
    };
    if let Some(token) = token {
        response.insert_header(ETAG, &token.to_header());
    }
    Ok(response)
}

/// DELETE of a single entity.
pub(crate) fn delete(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    let model = d.model();
    let walk = walk(d, &request.path, true)?;
    let Target::Single(located) = walk.target else {
        return Err(ODataError::internal_message("delete target is not a single entity"));
    };
    let token = ConcurrencyToken::compute(&located.entity, model)?;
    request
        .precondition
        .evaluate(RequestIntent::Mutate, token.as_ref())
        .into_result()?;

    d.context.enter(DispatchState::Executing);
    notify_change(
        d.configuration().interceptors(),
        &located.entity,
        UpdateOperations::DELETE,
        &mut d.context.counters,
    )?;
    d.provider.delete(&located.set, &located.key)?;

    d.context.enter(DispatchState::Serializing);
    Ok(ODataResponse::no_content())
}
