//! Reading and changing links through `$ref`.

use crate::common::services::{Northwind, RestrictedNorthwind};
use crate::common::{SERVICE_ROOT, assert_status, body, ids, send};
use odata_server::ODataRequest;
use serde_json::{Value, json};

fn reference(id: &str) -> Value {
    json!({ "@odata.id": id })
}

fn linked_ids(server: &odata_server::ODataServer<Northwind>, uri: &str) -> Vec<i64> {
    let (response, _) = send(server, ODataRequest::get(uri));
    ids(&response)
}

#[test]
fn test_read_collection_references() {
    let (server, _) = Northwind::server();
    let (response, _) = send(&server, ODataRequest::get("/Customers(1)/Orders/$ref"));

    assert_status(&response, 200);
    assert_eq!(
        body(&response),
        json!({
            "@odata.context": format!("{}$metadata#Collection($ref)", SERVICE_ROOT),
            "value": [
                {"@odata.id": format!("{}Orders(10)", SERVICE_ROOT)},
                {"@odata.id": format!("{}Orders(11)", SERVICE_ROOT)},
            ],
        })
    );
}

#[test]
fn test_read_single_references() {
    let (server, _) = Northwind::server();

    let (friend, _) = send(&server, ODataRequest::get("/Customers(1)/BestFriend/$ref"));
    assert_status(&friend, 200);
    let friend = body(&friend);
    assert_eq!(friend["@odata.id"], format!("{}Customers(2)", SERVICE_ROOT));
    assert_eq!(friend["@odata.context"], format!("{}$metadata#$ref", SERVICE_ROOT));

    let (entity, _) = send(&server, ODataRequest::get("/Customers(1)/$ref"));
    assert_status(&entity, 200);
    assert_eq!(body(&entity)["@odata.id"], format!("{}Customers(1)", SERVICE_ROOT));

    let (hidden, _) = send(&server, ODataRequest::get("/Customers(3)/$ref"));
    assert_status(&hidden, 404);

    let (with_options, _) = send(&server, ODataRequest::get("/Customers(1)/Orders/$ref?$top=1"));
    assert_status(&with_options, 400);
}

#[test]
fn test_add_link_to_collection() {
    let (server, _) = Northwind::server();
    let (response, context) = send(
        &server,
        ODataRequest::post("/Customers(2)/Orders/$ref").with_json(&reference("Orders(10)")),
    );

    assert_status(&response, 204);
    assert!(response.body.is_empty());
    assert_eq!(context.counters.change_invocations("Customers"), 1);
    assert_eq!(linked_ids(&server, "/Customers(2)/Orders"), vec![12, 10]);

    // adding the same link again changes nothing
    let (again, _) = send(
        &server,
        ODataRequest::post("/Customers(2)/Orders/$ref")
            .with_json(&reference(&format!("{}Orders(10)", SERVICE_ROOT))),
    );
    assert_status(&again, 204);
    assert_eq!(linked_ids(&server, "/Customers(2)/Orders"), vec![12, 10]);
}

#[test]
fn test_replace_single_link() {
    let (server, _) = Northwind::server();

    let (response, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/BestFriend/$ref").with_json(&reference("Customers(4)")),
    );
    assert_status(&response, 204);
    let (friend, _) = send(&server, ODataRequest::get("/Customers(1)/BestFriend"));
    assert_eq!(body(&friend)["Name"], "Dave");

    let (post_single, _) = send(
        &server,
        ODataRequest::post("/Customers(1)/BestFriend/$ref").with_json(&reference("Customers(2)")),
    );
    assert_status(&post_single, 405);

    let (put_collection, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Orders/$ref").with_json(&reference("Orders(12)")),
    );
    assert_status(&put_collection, 405);
}

#[test]
fn test_remove_links() {
    let (server, _) = Northwind::server();

    let (by_key, _) = send(&server, ODataRequest::delete("/Customers(1)/Orders(10)/$ref"));
    assert_status(&by_key, 204);
    assert_eq!(linked_ids(&server, "/Customers(1)/Orders"), vec![11]);

    let (by_id, context) = send(
        &server,
        ODataRequest::delete(&format!("/Customers(1)/Orders/$ref?$id={}Orders(11)", SERVICE_ROOT)),
    );
    assert_status(&by_id, 204);
    assert_eq!(context.counters.change_invocations("Customers"), 1);
    assert_eq!(context.counters.change_invocations("Orders"), 0);
    assert!(linked_ids(&server, "/Customers(1)/Orders").is_empty());

    let (single, _) = send(&server, ODataRequest::delete("/Customers(1)/BestFriend/$ref"));
    assert_status(&single, 204);
    let (friend, _) = send(&server, ODataRequest::get("/Customers(1)/BestFriend"));
    assert_status(&friend, 404);

    // the entities themselves are untouched
    let (order, _) = send(&server, ODataRequest::get("/Orders(10)"));
    assert_status(&order, 200);
}

#[test]
fn test_link_errors() {
    let (server, _) = Northwind::server();
    let cases = [
        // a collection link needs $id or a key
        (ODataRequest::delete("/Customers(1)/Orders/$ref"), 400),
        (ODataRequest::delete("/Customers(1)/Orders(10)/$ref?$id=Orders(10)"), 400),
        // no such link
        (ODataRequest::delete("/Customers(2)/Orders(10)/$ref"), 404),
        // no such entity
        (
            ODataRequest::post("/Customers(1)/Orders/$ref").with_json(&reference("Orders(99)")),
            404,
        ),
        // wrong set
        (
            ODataRequest::post("/Customers(1)/Orders/$ref").with_json(&reference("Customers(2)")),
            400,
        ),
        // not a reference
        (
            ODataRequest::post("/Customers(1)/Orders/$ref").with_json(&json!({"ID": 12})),
            400,
        ),
        (
            ODataRequest::post("/Customers(1)/Orders/$ref")
                .with_header("Content-Type", "text/plain")
                .with_body("Orders(12)"),
            415,
        ),
        // links change through navigation properties only
        (ODataRequest::delete("/Customers(1)/$ref"), 405),
        // hidden source
        (
            ODataRequest::post("/Customers(3)/Orders/$ref").with_json(&reference("Orders(12)")),
            404,
        ),
        (
            ODataRequest::post("/Customers(1)/Orders/$ref")
                .with_json(&reference("Orders(12)"))
                .with_header("If-Match", "*"),
            400,
        ),
    ];
    for (request, status) in cases {
        let description = format!("{} {}?{}", request.method, request.path, request.query);
        let (response, _) = send(&server, request);
        assert_eq!(response.status.as_u16(), status, "{}", description);
    }
    assert_eq!(linked_ids(&server, "/Customers(1)/Orders"), vec![10, 11]);
}

#[test]
fn test_link_delete_can_skip_interceptors() {
    let (server, _) = RestrictedNorthwind::server();
    let (response, context) = send(&server, ODataRequest::delete("/Customers(1)/Orders(10)/$ref"));

    assert_status(&response, 204);
    assert_eq!(context.counters.change_invocations("Customers"), 0);

    let (added, context) = send(
        &server,
        ODataRequest::post("/Customers(1)/Orders/$ref")
            .with_json(&reference(&format!("{}/Orders(10)", RestrictedNorthwind::ROOT))),
    );
    assert_status(&added, 204);
    assert_eq!(context.counters.change_invocations("Customers"), 1);
}
