//! JSON batch processing.
//!
//! A batch is a `POST $batch` with a body of the form
//!
//! ```json
//! {"requests": [{"id": "1", "atomicityGroup": "g1", "method": "POST",
//!                "url": "Customers", "headers": {}, "body": {}}]}
//! ```
//!
//! Adjacent requests sharing an `atomicityGroup` form a changeset. A
//! changeset runs in one provider session and is committed only when every
//! request in it succeeds; otherwise its changes are discarded and a single
//! error response is reported for the group. Inside a changeset a request
//! may refer to an entity created by an earlier one as `$<id>`, both at the
//! start of its URL and in `@odata.bind` values.

use super::context::{DispatchState, RequestContext};
use super::core::{Dispatch, ODataRequest, ODataResponse, ODataServer, execute, fault, finish};
use super::negotiation::{APPLICATION_JSON, ensure_json_content};
use super::payload::parse_json;
use crate::error::{ODataError, ODataResult};
use crate::etag::Precondition;
use crate::interceptor::guarded;
use crate::provider::UpdateProvider;
use crate::service::{DataService, ServiceDefinition};
use crate::uri::Resolver;
use http::header::{CONTENT_TYPE, IF_MATCH, IF_NONE_MATCH, LOCATION};
use http::{Method, StatusCode};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One request of a batch body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchPart {
    id: String,
    #[serde(default)]
    atomicity_group: Option<String>,
    method: String,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchEnvelope {
    requests: Vec<BatchPart>,
}

/// Top-level item of a batch.
#[derive(Debug)]
enum BatchUnit {
    Single(BatchPart),
    Changeset { group: String, parts: Vec<BatchPart> },
}

/// Process a `$batch` request.
pub(crate) fn dispatch_batch<S: DataService>(
    server: &ODataServer<S>,
    definition: &ServiceDefinition,
    request: &ODataRequest,
    context: &mut RequestContext,
) -> ODataResponse {
    context.enter(DispatchState::Resolving);
    let behavior = &definition.configuration.behavior;
    let units = match parse_batch(definition, request) {
        Ok(units) => units,
        Err(error) => return fault(error, context, behavior),
    };
    info!(
        "Processing batch with {} part(s) (request: '{}')",
        units.len(),
        context.request_id
    );

    context.enter(DispatchState::Executing);
    let mut responses = Vec::new();
    for unit in units {
        match unit {
            BatchUnit::Single(part) => {
                let (response, sub_context) = run_single(server, definition, &part);
                context.counters.merge(&sub_context.counters);
                responses.push(response_entry(&part.id, None, &response));
            }
            BatchUnit::Changeset { group, parts } => {
                responses.extend(run_changeset(server, definition, &group, &parts, context));
            }
        }
    }

    context.enter(DispatchState::Serializing);
    finish(
        ODataResponse::with_json(StatusCode::OK, &json!({ "responses": responses })),
        context,
    )
}

fn parse_batch(definition: &ServiceDefinition, request: &ODataRequest) -> ODataResult<Vec<BatchUnit>> {
    let behavior = &definition.configuration.behavior;
    Resolver::new(&definition.model, &definition.configuration)
        .resolve(&request.method, &request.path)?;
    Precondition::from_headers(request.header(IF_MATCH)?, request.header(IF_NONE_MATCH)?)?
        .ensure_absent("on $batch requests")?;
    ensure_json_content(request.header(CONTENT_TYPE)?)?;
    let envelope: BatchEnvelope = serde_json::from_value(parse_json(&request.body)?)?;

    let mut units: Vec<BatchUnit> = Vec::new();
    let mut closed_groups: HashSet<String> = HashSet::new();
    let mut ids: HashSet<String> = HashSet::new();
    for part in envelope.requests {
        if !ids.insert(part.id.clone()) {
            return Err(ODataError::bad_request(format!(
                "The batch request id '{}' is used more than once.",
                part.id
            )));
        }
        if part.url.split('?').next().unwrap_or_default().trim_matches('/') == "$batch" {
            return Err(ODataError::bad_request(
                "A batch request cannot contain another batch request.",
            ));
        }
        let Some(group) = part.atomicity_group.clone() else {
            if let Some(BatchUnit::Changeset { group, .. }) = units.last() {
                closed_groups.insert(group.clone());
            }
            units.push(BatchUnit::Single(part));
            continue;
        };
        if part.method.eq_ignore_ascii_case("GET") {
            return Err(ODataError::bad_request(format!(
                "The GET request '{}' cannot be part of the changeset '{}'.",
                part.id, group
            )));
        }
        match units.last_mut() {
            Some(BatchUnit::Changeset {
                group: current,
                parts,
            }) if *current == group => {
                if parts.len() >= behavior.max_changeset_count {
                    return Err(ODataError::bad_request(format!(
                        "The number of requests in the changeset '{}' exceeds the maximum of {}.",
                        group, behavior.max_changeset_count
                    )));
                }
                parts.push(part);
            }
            last => {
                if let Some(BatchUnit::Changeset { group: previous, .. }) = last {
                    closed_groups.insert(previous.clone());
                }
                if closed_groups.contains(&group) {
                    return Err(ODataError::bad_request(format!(
                        "The requests of the atomicity group '{}' must be adjacent.",
                        group
                    )));
                }
                units.push(BatchUnit::Changeset {
                    group,
                    parts: vec![part],
                });
            }
        }
        if units.len() > behavior.max_batch_count {
            break;
        }
    }
    if units.len() > behavior.max_batch_count {
        return Err(ODataError::bad_request(format!(
            "The number of parts in the batch exceeds the maximum of {}.",
            behavior.max_batch_count
        )));
    }
    Ok(units)
}

/// Turn a batch part into a request, substituting `$<id>` references.
fn part_request(
    part: &BatchPart,
    service_root: &str,
    references: &HashMap<String, String>,
) -> ODataResult<ODataRequest> {
    let method = Method::from_bytes(part.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        ODataError::bad_request(format!(
            "The method '{}' of batch request '{}' is not valid.",
            part.method, part.id
        ))
    })?;

    let mut url = part.url.as_str();
    if url.contains("://") {
        url = url.strip_prefix(service_root).ok_or_else(|| {
            ODataError::bad_request(format!(
                "The URL '{}' of batch request '{}' is not under the service root.",
                part.url, part.id
            ))
        })?;
    }
    let url = url.trim_start_matches('/');
    let url = match url.strip_prefix('$').and_then(|rest| {
        let end = rest.find(['/', '?']).unwrap_or(rest.len());
        references
            .get(&rest[..end])
            .map(|target| format!("{}{}", target, &rest[end..]))
    }) {
        Some(substituted) => substituted,
        None => url.to_string(),
    };

    let mut request = ODataRequest::new(method, &url);
    for (name, value) in &part.headers {
        request = request.with_header(name, value);
    }
    match &part.body {
        None | Some(Value::Null) => {}
        Some(Value::String(text)) if request.header(CONTENT_TYPE)?.is_some() => {
            request = request.with_body(text.clone());
        }
        Some(value) => {
            if request.header(CONTENT_TYPE)?.is_none() {
                request = request.with_header(CONTENT_TYPE.as_str(), APPLICATION_JSON);
            }
            request = request.with_body(value.to_string());
        }
    }
    Ok(request)
}

fn run_single<S: DataService>(
    server: &ODataServer<S>,
    definition: &ServiceDefinition,
    part: &BatchPart,
) -> (ODataResponse, RequestContext) {
    let behavior = &definition.configuration.behavior;
    let mut sub_context = RequestContext::new(part.id.clone(), Method::GET, part.url.clone());
    let response = match part_request(part, &behavior.service_root(), &HashMap::new()) {
        Ok(request) => {
            sub_context.method = request.method.clone();
            server.dispatch_single(definition, &request, &mut sub_context)
        }
        Err(error) => fault(error, &mut sub_context, behavior),
    };
    (response, sub_context)
}

/// Run the requests of one changeset in a shared session.
fn run_changeset<S: DataService>(
    server: &ODataServer<S>,
    definition: &ServiceDefinition,
    group: &str,
    parts: &[BatchPart],
    context: &mut RequestContext,
) -> Vec<Value> {
    let behavior = &definition.configuration.behavior;
    let service_root = behavior.service_root();
    let mut provider = server.create_data_source();
    let mut references: HashMap<String, String> = HashMap::new();
    let mut entries = Vec::with_capacity(parts.len());
    let mut failure: Option<(&BatchPart, ODataError, RequestContext)> = None;

    debug!("Running changeset '{}' with {} request(s)", group, parts.len());
    for part in parts {
        let mut sub_context = RequestContext::new(part.id.clone(), Method::POST, part.url.clone());
        let outcome = part_request(part, &service_root, &references).and_then(|request| {
            sub_context.method = request.method.clone();
            let mut dispatch = Dispatch::new(definition, &mut provider, &mut sub_context, &references);
            execute(&mut dispatch, &request)
        });
        context.counters.merge(&sub_context.counters);
        match outcome {
            Ok(response) => {
                if let Some(location) = response.header(LOCATION) {
                    let relative = location.strip_prefix(&service_root).unwrap_or(location);
                    references.insert(part.id.clone(), relative.to_string());
                }
                let response = finish(response, &mut sub_context);
                entries.push(response_entry(&part.id, Some(group), &response));
            }
            Err(error) => {
                failure = Some((part, error, sub_context));
                break;
            }
        }
    }

    if failure.is_none() {
        if let Err(error) = guarded("save changes", || provider.save_changes()) {
            if let Some(last) = parts.last() {
                let sub_context = RequestContext::new(last.id.clone(), Method::POST, last.url.clone());
                failure = Some((last, error, sub_context));
            }
        }
    }

    match failure {
        None => entries,
        Some((part, error, mut sub_context)) => {
            provider.clear_changes();
            info!(
                "Changeset '{}' failed at request '{}'; its changes were discarded",
                group, part.id
            );
            let response = fault(error, &mut sub_context, behavior);
            vec![response_entry(&part.id, Some(group), &response)]
        }
    }
}

fn response_entry(id: &str, group: Option<&str>, response: &ODataResponse) -> Value {
    let mut entry = Map::new();
    entry.insert("id".to_string(), json!(id));
    if let Some(group) = group {
        entry.insert("atomicityGroup".to_string(), json!(group));
    }
    entry.insert("status".to_string(), json!(response.status.as_u16()));
    let headers: Map<String, Value> = response
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), json!(v)))
        })
        .collect();
    entry.insert("headers".to_string(), Value::Object(headers));
    if !response.body.is_empty() {
        let body = response
            .json()
            .unwrap_or_else(|| Value::String(response.text()));
        entry.insert("body".to_string(), body);
    }
    Value::Object(entry)
}
