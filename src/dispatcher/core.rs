//! Core dispatcher infrastructure
//!
//! This module contains the transport-agnostic request and response types,
//! the [`ODataServer`] entry point and the dispatch state machine that every
//! request runs through:
//!
//! `Resolving -> Authorizing -> QueryBuilding -> Executing -> Serializing -> Done`
//!
//! Any state may move to `Faulted`, which turns the error into the final
//! response.

use super::context::{DispatchState, RequestContext};
use super::errors::create_error_response;
use super::handlers;
use super::negotiation::{self, ResponseFormat};
use crate::config::{ProtocolVersion, ServiceBehavior};
use crate::error::{ODataError, ODataResult};
use crate::etag::Precondition;
use crate::interceptor::guarded;
use crate::metadata::ServiceModel;
use crate::provider::{EntityKey, UpdateProvider};
use crate::service::{DataService, ServiceConfiguration, ServiceDefinition, ServiceRegistry};
use crate::uri::{QueryOptions, ResourcePath, Resolver, SegmentKind, validate_query_options};
use http::header::{
    ACCEPT, AsHeaderName, CONTENT_TYPE, ETAG, HeaderMap, HeaderName, HeaderValue, IF_MATCH,
    IF_NONE_MATCH,
};
use http::{Method, StatusCode};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// `OData-Version` header.
pub const ODATA_VERSION: HeaderName = HeaderName::from_static("odata-version");
/// `OData-MaxVersion` header.
pub const ODATA_MAX_VERSION: HeaderName = HeaderName::from_static("odata-maxversion");
/// Legacy `DataServiceVersion` header.
pub const DATA_SERVICE_VERSION: HeaderName = HeaderName::from_static("dataserviceversion");
/// Legacy `MaxDataServiceVersion` header.
pub const MAX_DATA_SERVICE_VERSION: HeaderName = HeaderName::from_static("maxdataserviceversion");
/// `OData-EntityId` header of `return=minimal` creates.
pub const ODATA_ENTITY_ID: HeaderName = HeaderName::from_static("odata-entityid");
/// `Prefer` header.
pub const PREFER: HeaderName = HeaderName::from_static("prefer");
/// Correlation id supplied by the host.
pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// A request as seen by the dispatcher.
///
/// The path is relative to the service root; hosts strip their own prefix
/// before dispatching.
#[derive(Debug, Clone)]
pub struct ODataRequest {
    pub method: Method,
    /// Path below the service root, still percent-encoded
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ODataRequest {
    /// Create a request from a method and a root-relative URI with an
    /// optional query string.
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn put(uri: &str) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn patch(uri: &str) -> Self {
        Self::new(Method::PATCH, uri)
    }

    pub fn delete(uri: &str) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// Convert an HTTP request whose URI path starts with `base_path`.
    pub fn from_http(request: http::Request<Vec<u8>>, base_path: &str) -> Self {
        let (parts, body) = request.into_parts();
        let full_path = parts.uri.path();
        let path = full_path
            .strip_prefix(base_path.trim_end_matches('/'))
            .unwrap_or(full_path)
            .to_string();
        Self {
            method: parts.method,
            path,
            query: parts.uri.query().unwrap_or_default().to_string(),
            headers: parts.headers,
            body,
        }
    }

    /// Add a header. Names or values that are not valid HTTP are dropped
    /// with a warning.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!("Ignoring invalid header '{}: {}'", name, value),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body and its content type.
    pub fn with_json(self, value: &Value) -> Self {
        self.with_header(CONTENT_TYPE.as_str(), negotiation::APPLICATION_JSON)
            .with_body(value.to_string())
    }

    /// Text of a header. A value that is not visible ASCII is a bad request.
    pub fn header(&self, name: impl AsHeaderName) -> ODataResult<Option<&str>> {
        match self.headers.get(name) {
            None => Ok(None),
            Some(value) => value.to_str().map(Some).map_err(|_| {
                ODataError::bad_request("A request header contains characters that are not allowed.")
            }),
        }
    }

    /// Whether the `Prefer` header asks for `return=<preference>`.
    pub fn prefers_return(&self, preference: &str) -> bool {
        self.header(PREFER).ok().flatten().is_some_and(|prefer| {
            prefer
                .split(',')
                .any(|p| p.trim().eq_ignore_ascii_case(&format!("return={}", preference)))
        })
    }
}

/// A response produced by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ODataResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ODataResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    /// JSON body with the OData JSON content type.
    pub fn with_json(status: StatusCode, value: &Value) -> Self {
        Self::with_bytes(
            status,
            ResponseFormat::Json.content_type(),
            value.to_string().into_bytes(),
        )
    }

    pub fn with_text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::with_bytes(status, negotiation::TEXT_PLAIN, text.into().into_bytes())
    }

    pub fn with_bytes(status: StatusCode, content_type: &str, body: Vec<u8>) -> Self {
        let mut response = Self::new(status);
        response.insert_header(CONTENT_TYPE, content_type);
        response.body = body;
        response
    }

    /// Set a header, replacing any previous value. Values that are not valid
    /// HTTP are dropped with a warning.
    pub fn insert_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_bytes(value.as_bytes()) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!("Dropping invalid value for response header '{}'", name),
        }
    }

    pub fn header(&self, name: impl AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header(ETAG)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn into_http(self) -> http::Response<Vec<u8>> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Entry point for a data service.
///
/// ```rust
/// # use odata_server::config::EntitySetRights;
/// # use odata_server::error::BuildResult;
/// # use odata_server::metadata::{ModelBuilder, PrimitiveType, ResourceProperty, ResourceType, ServiceModel};
/// # use odata_server::provider::InMemoryDataSource;
/// # use odata_server::service::{DataService, ServiceConfiguration};
/// use odata_server::dispatcher::{ODataRequest, ODataServer};
/// use serde_json::json;
///
/// # struct Catalog { data: InMemoryDataSource }
/// # impl DataService for Catalog {
/// #     type Source = InMemoryDataSource;
/// #     fn metadata() -> BuildResult<ServiceModel> {
/// #         ModelBuilder::new("Catalog")
/// #             .resource_type(ResourceType::entity("Product")
/// #                 .property(ResourceProperty::key("ID", PrimitiveType::Int32))
/// #                 .property(ResourceProperty::primitive("Name", PrimitiveType::String)))
/// #             .resource_set("Products", "Product")
/// #             .build()
/// #     }
/// #     fn initialize_service(config: &mut ServiceConfiguration) {
/// #         config.set_entity_set_access_rule("*", EntitySetRights::ALL);
/// #     }
/// #     fn create_data_source(&self) -> InMemoryDataSource { self.data.session() }
/// # }
/// let server = ODataServer::new(Catalog { data: InMemoryDataSource::new() });
///
/// let created = server.dispatch(&ODataRequest::post("/Products").with_json(&json!({"ID": 1, "Name": "Tea"})));
/// assert_eq!(created.status, 201);
/// assert_eq!(created.header("location"), Some("http://localhost/service.svc/Products(1)"));
///
/// let read = server.dispatch(&ODataRequest::get("/Products(1)/Name"));
/// assert_eq!(read.json().unwrap()["value"], "Tea");
/// assert_eq!(read.header("odata-version"), Some("4.0;"));
/// ```
pub struct ODataServer<S: DataService> {
    service: S,
}

impl<S: DataService> ODataServer<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Cached model and configuration of the service type.
    pub fn definition(&self) -> ODataResult<Arc<ServiceDefinition>> {
        ServiceRegistry::definition::<S>()
    }

    /// Process one request.
    pub fn dispatch(&self, request: &ODataRequest) -> ODataResponse {
        self.dispatch_traced(request).0
    }

    /// Process one request and return its context with the response.
    pub fn dispatch_traced(&self, request: &ODataRequest) -> (ODataResponse, RequestContext) {
        let request_id = request
            .header(REQUEST_ID)
            .ok()
            .flatten()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            "OData dispatcher processing {} {} (request: '{}')",
            request.method, request.path, request_id
        );

        let mut context = RequestContext::new(request_id, request.method.clone(), &request.path);
        let response = match self.definition() {
            Ok(definition) if is_batch_path(&request.path) => {
                super::batch::dispatch_batch(self, &definition, request, &mut context)
            }
            Ok(definition) => self.dispatch_single(&definition, request, &mut context),
            Err(error) => {
                context.enter(DispatchState::Resolving);
                fault(error, &mut context, &ServiceBehavior::default())
            }
        };
        (response, context)
    }

    /// Run one request in its own provider session.
    pub(crate) fn dispatch_single(
        &self,
        definition: &ServiceDefinition,
        request: &ODataRequest,
        context: &mut RequestContext,
    ) -> ODataResponse {
        let mut provider = self.service.create_data_source();
        let references = HashMap::new();
        let result = {
            let mut dispatch = Dispatch::new(definition, &mut provider, context, &references);
            execute(&mut dispatch, request)
        };
        let result = result.and_then(|response| {
            guarded("save changes", || provider.save_changes())?;
            Ok(response)
        });
        match result {
            Ok(response) => finish(response, context),
            Err(error) => {
                provider.clear_changes();
                fault(error, context, &definition.configuration.behavior)
            }
        }
    }

    /// A fresh provider session, used for batch parts.
    pub(crate) fn create_data_source(&self) -> S::Source {
        self.service.create_data_source()
    }
}

fn is_batch_path(path: &str) -> bool {
    path.trim_matches('/') == "$batch"
}

/// Complete a successful response.
pub(crate) fn finish(mut response: ODataResponse, context: &mut RequestContext) -> ODataResponse {
    context.enter(DispatchState::Done);
    response.insert_header(ODATA_VERSION, &context.response_version.header_value());
    debug!(
        "OData dispatcher completed with {} (request: '{}')",
        response.status, context.request_id
    );
    response
}

/// Turn an error into the final response.
///
/// Faulted responses always report the server's maximum protocol version.
pub(crate) fn fault(
    error: ODataError,
    context: &mut RequestContext,
    behavior: &ServiceBehavior,
) -> ODataResponse {
    warn!(
        "OData dispatcher failed in {}: {} (request: '{}')",
        context
            .state()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Start".to_string()),
        error,
        context.request_id
    );
    context.enter(DispatchState::Faulted);
    let mut response = create_error_response(&error, context.format, behavior.use_verbose_errors);
    response.insert_header(ODATA_VERSION, &behavior.max_protocol_version.header_value());
    response
}

/// Borrowed state shared by the handlers of one request.
pub(crate) struct Dispatch<'a> {
    pub definition: &'a ServiceDefinition,
    pub provider: &'a mut dyn UpdateProvider,
    pub context: &'a mut RequestContext,
    /// Content id -> root-relative URL of entities created earlier in the
    /// same changeset
    pub references: &'a HashMap<String, String>,
    pub service_root: String,
}

impl<'a> Dispatch<'a> {
    pub fn new(
        definition: &'a ServiceDefinition,
        provider: &'a mut dyn UpdateProvider,
        context: &'a mut RequestContext,
        references: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            definition,
            provider,
            context,
            references,
            service_root: definition.configuration.behavior.service_root(),
        }
    }

    pub fn model(&self) -> &'a ServiceModel {
        &self.definition.model
    }

    pub fn configuration(&self) -> &'a ServiceConfiguration {
        &self.definition.configuration
    }

    pub fn behavior(&self) -> &'a ServiceBehavior {
        &self.definition.configuration.behavior
    }

    /// Resolve an entity reference (`$id`, `@odata.bind`), including
    /// `$<content-id>` references to entities created in the changeset.
    pub fn resolve_reference(&self, reference: &str) -> ODataResult<(String, EntityKey)> {
        let reference = match reference.strip_prefix('$') {
            Some(id) => self
                .references
                .get(id)
                .map(String::as_str)
                .unwrap_or(reference),
            None => reference,
        };
        Resolver::new(self.model(), self.configuration())
            .resolve_entity_reference(reference, &self.service_root)
    }
}

/// A request after resolution.
pub(crate) struct Prepared<'r> {
    pub request: &'r ODataRequest,
    pub path: ResourcePath,
    pub options: QueryOptions,
    pub precondition: Precondition,
}

/// Kind of handler a resolved path is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    ServiceDocument,
    Metadata,
    Batch,
    Operation,
    Count,
    Ref,
    Property,
    Entities,
}

impl Route {
    fn of(path: &ResourcePath) -> Self {
        match path.first_kind() {
            None => return Self::ServiceDocument,
            Some(SegmentKind::Metadata) => return Self::Metadata,
            Some(SegmentKind::Batch) => return Self::Batch,
            Some(SegmentKind::ServiceOperation) => return Self::Operation,
            _ => {}
        }
        match path.marker() {
            Some(SegmentKind::Count) => Self::Count,
            Some(SegmentKind::Ref) => Self::Ref,
            Some(_) => Self::Property,
            None if path.last().is_some_and(|s| s.kind == SegmentKind::Property) => {
                Self::Property
            }
            None => Self::Entities,
        }
    }
}

/// Whether the response is plain text or bytes rather than a JSON payload.
fn is_raw(path: &ResourcePath) -> bool {
    matches!(path.marker(), Some(SegmentKind::Value) | Some(SegmentKind::Count))
        || path
            .last()
            .is_some_and(|s| s.addressed == crate::uri::Addressed::Stream)
}

/// Run the state machine for one request without committing the provider.
pub(crate) fn execute(d: &mut Dispatch, request: &ODataRequest) -> ODataResult<ODataResponse> {
    d.context.enter(DispatchState::Resolving);
    let behavior = d.behavior();

    let options = QueryOptions::parse(&request.query)?;
    d.context.format = negotiation::negotiate(options.format.as_deref(), request.header(ACCEPT)?, true)?;
    negotiate_versions(d.context, request, behavior.max_protocol_version)?;

    let path = Resolver::new(d.model(), d.configuration()).resolve(&request.method, &request.path)?;
    validate_query_options(&path, &request.method, &options)?;
    let route = Route::of(&path);
    if !is_raw(&path) {
        negotiation::negotiate(options.format.as_deref(), request.header(ACCEPT)?, false)?;
        let writes_payload = matches!(request.method, Method::GET | Method::POST);
        if d.context.format == ResponseFormat::Xml && writes_payload && route != Route::Batch {
            return Err(ODataError::unsupported_media_type(
                "Only JSON responses are supported for this resource.",
            ));
        }
    }
    let counts = options.counts() || path.marker() == Some(SegmentKind::Count);
    if counts && !behavior.accept_count_requests {
        return Err(ODataError::bad_request(
            "The ability of the data service to return row count information is disabled.",
        ));
    }
    if options.selected && !behavior.accept_projection_requests {
        return Err(ODataError::bad_request(
            "The ability to use the $select query option to define a projection in a data service query is disabled.",
        ));
    }
    let precondition = Precondition::from_headers(request.header(IF_MATCH)?, request.header(IF_NONE_MATCH)?)?;

    d.context.enter(DispatchState::Authorizing);
    handlers::authorize(d.configuration(), &path, &request.method)?;

    d.context.enter(DispatchState::QueryBuilding);
    let prepared = Prepared {
        request,
        path,
        options,
        precondition,
    };
    match route {
        Route::ServiceDocument => handlers::read::service_document(d, &prepared),
        Route::Metadata => handlers::read::metadata(d, &prepared),
        Route::Batch => Err(ODataError::bad_request(
            "A batch request cannot contain another batch request.",
        )),
        Route::Operation => handlers::operation::invoke(d, &prepared),
        Route::Count => handlers::read::count(d, &prepared),
        Route::Ref => handlers::links::handle(d, &prepared),
        Route::Property => handlers::property::handle(d, &prepared),
        Route::Entities => match request.method {
            Method::GET => handlers::read::entities(d, &prepared),
            Method::POST => handlers::write::create(d, &prepared),
            Method::PUT | Method::PATCH => handlers::write::update(d, &prepared),
            Method::DELETE => handlers::write::delete(d, &prepared),
            _ => Err(ODataError::method_not_allowed(format!(
                "The method '{}' is not supported.",
                request.method
            ))),
        },
    }
}

/// Read the version headers of a request.
///
/// A request version above the server maximum, or a client maximum below
/// 4.0, is a bad request. The response version is the lower of the two
/// maximums.
fn negotiate_versions(
    context: &mut RequestContext,
    request: &ODataRequest,
    server_max: ProtocolVersion,
) -> ODataResult<()> {
    let version = match request.header(ODATA_VERSION)? {
        Some(value) => Some(value),
        None => request.header(DATA_SERVICE_VERSION)?,
    };
    if let Some(value) = version {
        let version = ProtocolVersion::parse(value)?;
        if version > server_max {
            return Err(ODataError::bad_request(format!(
                "Request version '{}' is not supported for the request payload. The only supported version is '{}'.",
                version, server_max
            )));
        }
        context.request_version = Some(version);
    }

    let max_version = match request.header(ODATA_MAX_VERSION)? {
        Some(value) => Some(value),
        None => request.header(MAX_DATA_SERVICE_VERSION)?,
    };
    context.response_version = match max_version {
        Some(value) => {
            let client_max = ProtocolVersion::parse(value)?;
            if client_max < ProtocolVersion::V4_0 {
                return Err(ODataError::bad_request(format!(
                    "The MaxDataServiceVersion '{}' is too low for the response. The lowest supported version is '{}'.",
                    client_max,
                    ProtocolVersion::V4_0
                )));
            }
            client_max.min(server_max)
        }
        None => server_max,
    };
    Ok(())
}
