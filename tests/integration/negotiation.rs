//! Formats, protocol versions, error bodies and faults.

use crate::common::services::{BrokenService, Northwind, RestrictedNorthwind};
use crate::common::{SERVICE_ROOT, assert_status, body, send};
use odata_server::{DispatchState, ODataRequest, ODataServer};
use serde_json::json;

#[test]
fn test_json_is_the_default() {
    let (server, _) = Northwind::server();
    let (response, context) = send(&server, ODataRequest::get("/Customers(1)"));

    assert_status(&response, 200);
    assert_eq!(
        response.header("content-type"),
        Some("application/json;odata.metadata=minimal")
    );
    assert_eq!(response.header("odata-version"), Some("4.0;"));
    assert_eq!(
        body(&response)["@odata.context"],
        format!("{}$metadata#Customers/$entity", SERVICE_ROOT)
    );
    assert_eq!(context.trace().last(), Some(&DispatchState::Done));
}

#[test]
fn test_accept_and_format() {
    let (server, _) = Northwind::server();
    let cases = [
        (ODataRequest::get("/Customers").with_header("Accept", "application/json"), 200),
        (ODataRequest::get("/Customers").with_header("Accept", "*/*"), 200),
        (
            ODataRequest::get("/Customers")
                .with_header("Accept", "image/png, application/json;q=0.2"),
            200,
        ),
        (ODataRequest::get("/Customers?$format=json"), 200),
        (ODataRequest::get("/Customers?$format=csv"), 400),
        (ODataRequest::get("/Customers").with_header("Accept", "image/png"), 415),
        // raw values answer in their own media type
        (
            ODataRequest::get("/Customers(1)/Name/$value").with_header("Accept", "image/png"),
            200,
        ),
        (
            ODataRequest::get("/Customers/$count").with_header("Accept", "application/xml"),
            200,
        ),
    ];
    for (request, status) in cases {
        let description = format!("{} {}?{}", request.method, request.path, request.query);
        let (response, _) = send(&server, request);
        assert_eq!(response.status.as_u16(), status, "{}", description);
    }
}

#[test]
fn test_xml_is_only_used_for_errors() {
    let (server, _) = Northwind::server();

    let (read, context) = send(
        &server,
        ODataRequest::get("/Customers").with_header("Accept", "application/xml"),
    );
    assert_status(&read, 415);
    assert!(context.is_faulted());
    assert_eq!(read.header("content-type"), Some("application/xml"));
    let text = read.text();
    assert!(text.starts_with("<?xml"), "{}", text);
    assert!(text.contains("<m:error"));
    assert!(text.contains("<m:code>UnsupportedMediaType</m:code>"));

    // failures before the payload check keep the negotiated format
    let (missing, _) = send(&server, ODataRequest::get("/Nowhere?$format=xml"));
    assert_status(&missing, 404);
    assert!(missing.text().contains("<m:code>NotFound</m:code>"));

    // nothing is written back, so XML is acceptable
    let (deleted, _) = send(
        &server,
        ODataRequest::delete("/Orders(12)")
            .with_header("Accept", "application/xml")
            .with_header("If-Match", "*"),
    );
    assert_status(&deleted, 204);
}

#[test]
fn test_protocol_versions() {
    let (server, _) = Northwind::server();

    let (current, _) = send(
        &server,
        ODataRequest::get("/Customers(1)")
            .with_header("OData-Version", "4.0")
            .with_header("OData-MaxVersion", "4.01"),
    );
    assert_status(&current, 200);
    assert_eq!(current.header("odata-version"), Some("4.0;"));

    let (legacy, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("DataServiceVersion", "4.0;NetFx"),
    );
    assert_status(&legacy, 200);

    let (too_new, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("OData-Version", "4.01"),
    );
    assert_status(&too_new, 400);
    assert_eq!(too_new.header("odata-version"), Some("4.0;"));

    let (too_old, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("OData-MaxVersion", "3.0"),
    );
    assert_status(&too_old, 400);

    let (garbled, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("OData-Version", "four"),
    );
    assert_status(&garbled, 400);
}

#[test]
fn test_errors_hide_details_unless_verbose() {
    let (quiet, _) = Northwind::server();
    let (response, _) = send(&quiet, ODataRequest::get("/Nowhere"));
    assert_status(&response, 404);
    let error = &body(&response)["error"];
    assert_eq!(error["code"], "NotFound");
    assert!(error["message"].as_str().is_some_and(|m| m.contains("Nowhere")));
    assert!(error.get("innererror").is_none());

    let (verbose, _) = RestrictedNorthwind::server();
    let (response, _) = send(&verbose, ODataRequest::get("/Nowhere"));
    assert_status(&response, 404);
    let inner = &body(&response)["error"]["innererror"];
    assert_eq!(inner["type"], "NotFound");
    assert!(inner["message"].as_str().is_some_and(|m| m.contains("Nowhere")));
}

#[test]
fn test_invalid_service_definition_fails_every_request() {
    let server = ODataServer::new(BrokenService);
    for uri in ["/", "/$metadata", "/Things"] {
        let (response, context) = send(&server, ODataRequest::get(uri));
        assert_status(&response, 500);
        assert!(context.is_faulted());
        assert_eq!(
            body(&response)["error"]["message"],
            "An error occurred while processing this request."
        );
    }
    assert!(server.definition().is_err());
}

#[test]
fn test_request_id() {
    let (server, _) = Northwind::server();

    let (_, supplied) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("X-Request-Id", "req-42"),
    );
    assert_eq!(supplied.request_id, "req-42");

    let (_, first) = send(&server, ODataRequest::get("/Customers(1)"));
    let (_, second) = send(&server, ODataRequest::get("/Customers(1)"));
    assert!(!first.request_id.is_empty());
    assert_ne!(first.request_id, second.request_id);
}

#[test]
fn test_http_conversion() {
    let (server, _) = Northwind::server();
    let request = http::Request::builder()
        .method("GET")
        .uri("http://localhost/service.svc/Customers(1)?$select=Name")
        .header("Accept", "application/json")
        .body(Vec::new())
        .unwrap();

    let request = ODataRequest::from_http(request, "/service.svc/");
    assert_eq!(request.path, "/Customers(1)");
    assert_eq!(request.query, "$select=Name");

    let response = server.dispatch(&request).into_http();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(response.headers()["odata-version"], "4.0;");
    let payload: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(payload["Name"], "Alice");
    assert!(payload.get("Rating").is_none());
}

#[test]
fn test_service_behavior() {
    let (server, _) = RestrictedNorthwind::server();

    let (alice, _) = send(&server, ODataRequest::get("/Customers(1)"));
    assert_status(&alice, 200);
    assert_eq!(
        body(&alice)["@odata.context"],
        format!("{}/$metadata#Customers/$entity", RestrictedNorthwind::ROOT)
    );

    let (count, _) = send(&server, ODataRequest::get("/Orders?$count=true"));
    assert_status(&count, 400);
    assert_eq!(
        body(&count)["error"]["message"],
        "The ability of the data service to return row count information is disabled."
    );
    let (count_segment, _) = send(&server, ODataRequest::get("/Orders/$count"));
    assert_status(&count_segment, 400);

    let (select, _) = send(&server, ODataRequest::get("/Customers(1)?$select=Name"));
    assert_status(&select, 400);

    let (created, _) = send(
        &server,
        ODataRequest::post("/Orders").with_json(&json!({"ID": 60, "Total": 3.0})),
    );
    assert_status(&created, 201);
    assert_eq!(
        created.header("location"),
        Some(format!("{}/Orders(60)", RestrictedNorthwind::ROOT).as_str())
    );
}
