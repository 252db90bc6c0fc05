//! Read handlers: service document, `$metadata`, entities and `$count`.

use super::{Target, expanded_entity_json, page, plan_expansions, walk};
use crate::dispatcher::context::DispatchState;
use crate::dispatcher::core::{Dispatch, ODataResponse, Prepared};
use crate::dispatcher::payload;
use crate::error::{ODataError, ODataResult};
use crate::etag::{ConcurrencyToken, RequestIntent};
use crate::metadata::csdl;
use http::StatusCode;
use http::header::ETAG;
use serde_json::{Map, Value, json};

/// Entity sets and operations visible to clients.
pub(crate) fn service_document(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    request
        .precondition
        .ensure_absent("on the service document")?;
    d.context.enter(DispatchState::Executing);
    let configuration = d.configuration();

    let mut resources = Vec::new();
    for set in d.model().resource_sets() {
        if configuration.entity_set_rights(&set.name).is_visible() {
            resources.push(json!({
                "name": set.name,
                "kind": "EntitySet",
                "url": set.name,
            }));
        }
    }
    for operation in configuration.service_operations() {
        if configuration
            .service_operation_rights(&operation.name)
            .is_visible()
        {
            resources.push(json!({
                "name": operation.name,
                "kind": if operation.is_action() { "ActionImport" } else { "FunctionImport" },
                "url": operation.name,
            }));
        }
    }

    d.context.enter(DispatchState::Serializing);
    Ok(ODataResponse::with_json(
        StatusCode::OK,
        &json!({
            "@odata.context": format!("{}$metadata", d.service_root),
            "value": resources,
        }),
    ))
}

/// JSON CSDL of the visible part of the model.
pub(crate) fn metadata(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    request
        .precondition
        .ensure_absent("on $metadata requests")?;
    d.context.enter(DispatchState::Executing);
    let configuration = d.configuration();
    let operations: Vec<(&str, bool)> = configuration
        .service_operations()
        .iter()
        .filter(|op| configuration.service_operation_rights(&op.name).is_visible())
        .map(|op| (op.name.as_str(), op.is_action()))
        .collect();
    let document = csdl::render(
        d.model(),
        |set| configuration.entity_set_rights(set).is_visible(),
        &operations,
    );

    d.context.enter(DispatchState::Serializing);
    Ok(ODataResponse::with_json(StatusCode::OK, &document))
}

/// GET of an entity set, a single entity, or a navigation target.
pub(crate) fn entities(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    let model = d.model();
    let target_segment = request
        .path
        .target()
        .ok_or_else(|| ODataError::internal_message("entity request without a target"))?;
    let type_name = target_segment
        .addressed
        .type_name()
        .ok_or_else(|| ODataError::internal_message("entity target without a type"))?
        .to_string();
    let set_name = target_segment.addressed.set_name().unwrap_or_default().to_string();

    let options = &request.options;
    if let Some(select) = &options.select {
        payload::validate_select(model, &type_name, select, &options.expand)?;
    }
    let expansions = plan_expansions(d, &type_name, &options.expand)?;
    let walk = walk(d, &request.path, true)?;
    let select = options.select.as_deref();

    match walk.target {
        Target::Collection(plan) => {
            request
                .precondition
                .ensure_absent("on a request for a collection of resources")?;
            d.context.enter(DispatchState::Executing);
            let all = plan.execute(&mut *d.provider, &mut d.context.counters)?;
            let count = all.len();
            let entities = page(all, options.skip, options.top);

            d.context.enter(DispatchState::Serializing);
            let mut values = Vec::with_capacity(entities.len());
            for entity in &entities {
                values.push(Value::Object(expanded_entity_json(
                    d,
                    entity,
                    select,
                    &expansions,
                )?));
            }
            let mut body = Map::new();
            body.insert(
                "@odata.context".to_string(),
                json!(format!("{}$metadata#{}", d.service_root, set_name)),
            );
            if options.counts() {
                body.insert("@odata.count".to_string(), json!(count));
            }
            body.insert("value".to_string(), Value::Array(values));
            Ok(ODataResponse::with_json(StatusCode::OK, &Value::Object(body)))
        }
        Target::Single(located) => {
            if !expansions.is_empty() {
                request
                    .precondition
                    .ensure_absent("when $expand is specified")?;
            }
            let token = ConcurrencyToken::compute(&located.entity, model)?;
            if !request
                .precondition
                .evaluate(RequestIntent::Read, token.as_ref())
                .into_result()?
            {
                return Ok(not_modified(d, token.as_ref()));
            }

            d.context.enter(DispatchState::Executing);
            let mut object = expanded_entity_json(d, &located.entity, select, &expansions)?;

            d.context.enter(DispatchState::Serializing);
            object.insert(
                "@odata.context".to_string(),
                json!(format!("{}$metadata#{}/$entity", d.service_root, located.set)),
            );
            let mut response = ODataResponse::with_json(StatusCode::OK, &Value::Object(object));
            if let Some(token) = &token {
                response.insert_header(ETAG, &token.to_header());
            }
            Ok(response)
        }
        Target::Unloaded { .. } => Err(ODataError::internal_message(
            "entity target was not loaded",
        )),
    }
}

/// 304 for a read whose `If-None-Match` matched.
pub(crate) fn not_modified(d: &mut Dispatch, token: Option<&ConcurrencyToken>) -> ODataResponse {
    d.context.enter(DispatchState::Serializing);
    let mut response = ODataResponse::new(StatusCode::NOT_MODIFIED);
    if let Some(token) = token {
        response.insert_header(ETAG, &token.to_header());
    }
    response
}

/// `$count` of an entity set or navigation collection, as plain text.
pub(crate) fn count(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    request
        .precondition
        .ensure_absent("on $count requests")?;
    let walk = walk(d, &request.path, true)?;
    let Target::Collection(plan) = walk.target else {
        return Err(ODataError::bad_request(
            "$count can only be applied to a collection of entities.",
        ));
    };

    d.context.enter(DispatchState::Executing);
    let count = plan.execute(&mut *d.provider, &mut d.context.counters)?.len();

    d.context.enter(DispatchState::Serializing);
    Ok(ODataResponse::with_text(StatusCode::OK, count.to_string()))
}
