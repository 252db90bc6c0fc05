//! Service operation invocation.

use super::{expanded_entity_json, page, plan_expansions};
use crate::dispatcher::context::DispatchState;
use crate::dispatcher::core::{Dispatch, ODataResponse, Prepared};
use crate::dispatcher::payload;
use crate::error::{ODataError, ODataResult};
use crate::etag::ConcurrencyToken;
use crate::interceptor::{QueryPlan, QuerySource, guarded};
use crate::service::{OperationOutput, ResultKind};
use crate::uri::SegmentKind;
use http::StatusCode;
use http::header::ETAG;
use log::debug;
use serde_json::{Map, Value, json};

/// Bind the query string to the operation's parameters, run it, and
/// serialize its result.
///
/// Entity results pass through the query interceptors of their set like
/// any other read.
pub(crate) fn invoke(d: &mut Dispatch, request: &Prepared) -> ODataResult<ODataResponse> {
    request
        .precondition
        .ensure_absent("on service operation requests")?;
    let definition = d.definition;
    let model = &definition.model;
    let segment = request
        .path
        .segments
        .first()
        .ok_or_else(|| ODataError::internal_message("operation request without a segment"))?;
    let operation = definition
        .configuration
        .service_operation(&segment.identifier)
        .ok_or_else(|| {
            ODataError::not_found(format!(
                "Resource not found for the segment '{}'.",
                segment.identifier
            ))
        })?;
    let arguments = operation.bind_arguments(&request.options)?;

    let options = &request.options;
    let (plan, expansions) = match operation.result.set_name() {
        Some(set) => {
            let plan = QueryPlan::compose(
                set,
                QuerySource::Set,
                definition.configuration.interceptors(),
                &mut d.context.counters,
            )?;
            let type_name = model
                .resource_set(set)
                .map(|s| s.entity_type.clone())
                .unwrap_or_default();
            if let Some(select) = &options.select {
                payload::validate_select(model, &type_name, select, &options.expand)?;
            }
            let expansions = plan_expansions(d, &type_name, &options.expand)?;
            (Some(plan), expansions)
        }
        None => (None, Vec::new()),
    };

    d.context.enter(DispatchState::Executing);
    debug!(
        "Invoking service operation '{}' with {} argument(s)",
        operation.name,
        arguments.len()
    );
    let output = guarded("service operation", || {
        operation.invoke(&arguments, &mut *d.provider)
    })?;
    let context_url = match &operation.result {
        ResultKind::Entities(set) => format!("{}$metadata#{}", d.service_root, set),
        ResultKind::Entity(set) => format!("{}$metadata#{}/$entity", d.service_root, set),
        ResultKind::Primitive(primitive) => {
            format!("{}$metadata#{}", d.service_root, primitive.edm_name())
        }
        ResultKind::Void => String::new(),
    };

    match (output, plan) {
        (OperationOutput::Void, _) => {
            d.context.enter(DispatchState::Serializing);
            Ok(ODataResponse::no_content())
        }
        (OperationOutput::Primitive(literal), _) => {
            d.context.enter(DispatchState::Serializing);
            if literal.is_null() {
                return Ok(ODataResponse::no_content());
            }
            Ok(ODataResponse::with_json(
                StatusCode::OK,
                &json!({ "@odata.context": context_url, "value": literal.to_json() }),
            ))
        }
        (OperationOutput::Entity(entity), Some(plan)) => {
            let entity = match entity {
                Some(entity) => plan
                    .filter(vec![entity], &mut d.context.counters)?
                    .into_iter()
                    .next(),
                None => None,
            };
            let entity = entity.ok_or_else(|| {
                ODataError::not_found(format!(
                    "The service operation '{}' returned no resource.",
                    operation.name
                ))
            })?;

            d.context.enter(DispatchState::Serializing);
            let mut object =
                expanded_entity_json(d, &entity, options.select.as_deref(), &expansions)?;
            object.insert("@odata.context".to_string(), json!(context_url));
            let mut response = ODataResponse::with_json(StatusCode::OK, &Value::Object(object));
            if let Some(token) = ConcurrencyToken::compute(&entity, model)? {
                response.insert_header(ETAG, &token.to_header());
            }
            Ok(response)
        }
        (OperationOutput::Entities(entities), Some(plan)) => {
            let all = plan.filter(entities, &mut d.context.counters)?;
            let count = all.len();
            if request.path.marker() == Some(SegmentKind::Count) {
                d.context.enter(DispatchState::Serializing);
                return Ok(ODataResponse::with_text(StatusCode::OK, count.to_string()));
            }
            let entities = page(all, options.skip, options.top);

            d.context.enter(DispatchState::Serializing);
            let mut values = Vec::with_capacity(entities.len());
            for entity in &entities {
                values.push(Value::Object(expanded_entity_json(
                    d,
                    entity,
                    options.select.as_deref(),
                    &expansions,
                )?));
            }
            let mut body = Map::new();
            body.insert("@odata.context".to_string(), json!(context_url));
            if options.counts() {
                body.insert("@odata.count".to_string(), json!(count));
            }
            body.insert("value".to_string(), Value::Array(values));
            Ok(ODataResponse::with_json(StatusCode::OK, &Value::Object(body)))
        }
        _ => Err(ODataError::internal_message(format!(
            "service operation '{}' returned entities without a result set",
            operation.name
        ))),
    }
}
