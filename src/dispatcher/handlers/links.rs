//! `$ref` handling: reading, adding, replacing and removing links.

use super::{Located, Target, walk};
use crate::dispatcher::context::DispatchState;
use crate::dispatcher::core::{Dispatch, ODataResponse, Prepared};
use crate::dispatcher::negotiation::ensure_json_content;
use crate::dispatcher::payload::{parse_reference, reference_json};
use crate::error::{ODataError, ODataResult};
use crate::interceptor::{UpdateOperations, notify_change};
use crate::provider::EntityKey;
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use log::debug;
use serde_json::{Value, json};

pub(crate) fn handle(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    request
        .precondition
        .ensure_absent("on $ref requests")?;
    match request.request.method {
        Method::GET => read(d, request),
        _ => modify(d, request),
    }
}

fn read(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    let model = d.model();
    let walk = walk(d, &request.path, true)?;

    d.context.enter(DispatchState::Executing);
    let body = match walk.target {
        Target::Collection(plan) => {
            let entities = plan.execute(&mut *d.provider, &mut d.context.counters)?;
            let mut references = Vec::with_capacity(entities.len());
            for entity in &entities {
                let key = entity.key(model)?;
                references.push(reference_json(&d.service_root, plan.set(), &key));
            }
            d.context.enter(DispatchState::Serializing);
            json!({
                "@odata.context": format!("{}$metadata#Collection($ref)", d.service_root),
                "value": references,
            })
        }
        Target::Single(located) => {
            d.context.enter(DispatchState::Serializing);
            let mut reference = reference_json(&d.service_root, &located.set, &located.key);
            if let Value::Object(object) = &mut reference {
                object.insert(
                    "@odata.context".to_string(),
                    json!(format!("{}$metadata#$ref", d.service_root)),
                );
            }
            reference
        }
        Target::Unloaded { .. } => {
            return Err(ODataError::internal_message("$ref target was not loaded"));
        }
    };
    Ok(ODataResponse::with_json(StatusCode::OK, &body))
}

/// POST, PUT or DELETE of a link. The source entity's `CHANGE` interceptors
/// run for additions; for removals only when the service asks for it.
fn modify(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    let walk = walk(d, &request.path, false)?;
    let (Some(parent), Some(navigation)) = (walk.parent, walk.navigation) else {
        return Err(ODataError::method_not_allowed(
            "Links can only be changed through a navigation property.",
        ));
    };
    let Target::Unloaded { set, key } = walk.target else {
        return Err(ODataError::internal_message("$ref target was loaded"));
    };
    let collection = d
        .model()
        .property(parent.entity.type_name(), &navigation)
        .and_then(|p| p.navigation_target())
        .is_some_and(|t| t.multiplicity.is_collection());

    let notify = match request.request.method {
        Method::POST | Method::PUT => {
            ensure_json_content(request.request.header(CONTENT_TYPE)?)?;
            let reference = parse_reference(&request.request.body)?;
            let target_key = referenced_entity(d, &reference, &set)?;

            d.context.enter(DispatchState::Executing);
            if request.request.method == Method::PUT {
                d.provider.clear_links(&parent.set, &parent.key, &navigation)?;
            }
            debug!(
                "Linking {}{}/{} to {}{}",
                parent.set,
                parent.key.to_predicate(),
                navigation,
                set,
                target_key.to_predicate()
            );
            d.provider
                .add_link(&parent.set, &parent.key, &navigation, &set, &target_key)?;
            true
        }
        Method::DELETE => {
            let target_key = match (key, &request.options.id) {
                (Some(_), Some(_)) => {
                    return Err(ODataError::bad_request(
                        "The $id query option cannot be combined with a key in the path.",
                    ));
                }
                (Some(key), None) => Some(key),
                (None, Some(id)) => Some(referenced_key(d, id, &set)?),
                (None, None) if collection => {
                    return Err(ODataError::bad_request(
                        "The $id query option is required to delete a link from a collection.",
                    ));
                }
                (None, None) => None,
            };

            d.context.enter(DispatchState::Executing);
            match target_key {
                Some(target_key) => {
                    d.provider
                        .remove_link(&parent.set, &parent.key, &navigation, &target_key)?
                }
                None => d.provider.clear_links(&parent.set, &parent.key, &navigation)?,
            }
            d.behavior().invoke_interceptors_on_link_delete
        }
        _ => {
            return Err(ODataError::method_not_allowed(format!(
                "The method '{}' is not supported for links.",
                request.request.method
            )));
        }
    };

    if notify {
        notify_source(d, &parent)?;
    }
    d.context.enter(DispatchState::Serializing);
    Ok(ODataResponse::no_content())
}

fn notify_source(d: &mut Dispatch, parent: &Located) -> ODataResult<()> {
    notify_change(
        d.configuration().interceptors(),
        &parent.entity,
        UpdateOperations::CHANGE,
        &mut d.context.counters,
    )
}

fn referenced_key(d: &Dispatch, reference: &str, expected_set: &str) -> ODataResult<EntityKey> {
    let (set, key) = d.resolve_reference(reference)?;
    if set != expected_set {
        return Err(ODataError::bad_request(format!(
            "The reference '{}' does not point to an entity of the set '{}'.",
            reference, expected_set
        )));
    }
    Ok(key)
}

/// Key of an existing entity named by a reference payload.
fn referenced_entity(d: &mut Dispatch, reference: &str, expected_set: &str) -> ODataResult<EntityKey> {
    let key = referenced_key(d, reference, expected_set)?;
    if d.provider.get(expected_set, &key)?.is_none() {
        return Err(ODataError::not_found(format!(
            "The entity referenced by '{}' does not exist.",
            reference
        )));
    }
    Ok(key)
}
