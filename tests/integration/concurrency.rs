//! ETags and conditional requests.

use crate::common::services::Northwind;
use crate::common::{assert_status, body, customer_key, order_key, send, stored};
use odata_server::{DispatchState, ODataRequest};
use serde_json::json;

const ALICE: &str = "W/\"'Alice'\"";

fn rename(uri: &str, name: &str) -> ODataRequest {
    ODataRequest::patch(uri).with_json(&json!({ "Name": name }))
}

#[test]
fn test_if_none_match_returns_not_modified() {
    let (server, _) = Northwind::server();
    let (response, context) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("If-None-Match", ALICE),
    );

    assert_status(&response, 304);
    assert_eq!(response.etag(), Some(ALICE));
    assert!(response.body.is_empty());
    assert!(!context.reached(DispatchState::Executing));
    assert_eq!(
        &context.trace()[context.trace().len() - 2..],
        &[DispatchState::Serializing, DispatchState::Done]
    );
}

#[test]
fn test_if_none_match_variants_on_read() {
    let (server, _) = Northwind::server();

    let (other, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("If-None-Match", "W/\"'Bob'\""),
    );
    assert_status(&other, 200);

    let (any, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("If-None-Match", "*"),
    );
    assert_status(&any, 304);

    let (listed, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("If-None-Match", "W/\"'Bob'\", W/\"'Alice'\""),
    );
    assert_status(&listed, 304);

    let (property, _) = send(
        &server,
        ODataRequest::get("/Customers(1)/Rating").with_header("If-None-Match", ALICE),
    );
    assert_status(&property, 304);
    assert_eq!(property.etag(), Some(ALICE));
}

#[test]
fn test_if_match_on_read() {
    let (server, _) = Northwind::server();

    let (stale, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("If-Match", "W/\"'Bob'\""),
    );
    assert_status(&stale, 412);
    assert_eq!(body(&stale)["error"]["code"], "PreconditionFailed");

    let (current, _) = send(
        &server,
        ODataRequest::get("/Customers(1)").with_header("If-Match", ALICE),
    );
    assert_status(&current, 200);
}

#[test]
fn test_mutation_requires_if_match() {
    let (server, data) = Northwind::server();

    let (response, _) = send(&server, rename("/Customers(1)", "Alicia"));
    assert_status(&response, 400);
    let stored_name = stored(&data, "Customers", &customer_key(1)).and_then(|c| c.get("Name").cloned());
    assert_eq!(stored_name, Some(json!("Alice")));

    let (delete, _) = send(&server, ODataRequest::delete("/Customers(2)"));
    assert_status(&delete, 400);
    assert!(stored(&data, "Customers", &customer_key(2)).is_some());
}

#[test]
fn test_matching_if_match_updates_and_returns_new_etag() {
    let (server, data) = Northwind::server();

    let (response, _) = send(&server, rename("/Customers(1)", "Alicia").with_header("If-Match", ALICE));
    assert_status(&response, 204);
    assert_eq!(response.etag(), Some("W/\"'Alicia'\""));
    let customer = stored(&data, "Customers", &customer_key(1)).unwrap();
    assert_eq!(customer.get("Name"), Some(&json!("Alicia")));

    // the old tag no longer matches
    let (stale, _) = send(&server, rename("/Customers(1)", "Ann").with_header("If-Match", ALICE));
    assert_status(&stale, 412);
    let customer = stored(&data, "Customers", &customer_key(1)).unwrap();
    assert_eq!(customer.get("Name"), Some(&json!("Alicia")));
}

#[test]
fn test_if_match_star_and_if_none_match_on_mutation() {
    let (server, _) = Northwind::server();

    let (star, _) = send(&server, rename("/Customers(1)", "Alicia").with_header("If-Match", "*"));
    assert_status(&star, 204);

    let (conflict, _) = send(
        &server,
        rename("/Customers(2)", "Robert").with_header("If-None-Match", "W/\"'Bob'\""),
    );
    assert_status(&conflict, 412);

    let (no_match, _) = send(
        &server,
        rename("/Customers(2)", "Robert").with_header("If-None-Match", "W/\"'Zed'\""),
    );
    assert_status(&no_match, 204);
}

#[test]
fn test_tag_content_errors() {
    let (server, _) = Northwind::server();
    let cases = [
        // not a weak entity tag list
        ("Alice", 400),
        ("\"'Alice'\"", 400),
        ("W/\"'Alice'\" W/\"'Bob'\"", 400),
        // not a literal
        ("W/\"'unterminated\"", 400),
        // literals of the wrong type or arity never match
        ("W/\"1\"", 412),
        ("W/\"'Alice',1\"", 412),
    ];
    for (tag, status) in cases {
        let (response, _) = send(&server, rename("/Customers(1)", "Alicia").with_header("If-Match", tag));
        assert_eq!(response.status.as_u16(), status, "If-Match: {}", tag);
    }
}

#[test]
fn test_both_precondition_headers_are_rejected() {
    let (server, _) = Northwind::server();
    let (response, _) = send(
        &server,
        ODataRequest::get("/Customers(1)")
            .with_header("If-Match", ALICE)
            .with_header("If-None-Match", ALICE),
    );
    assert_status(&response, 400);
}

#[test]
fn test_types_without_etag_still_check_if_match() {
    let (server, data) = Northwind::server();

    let (read, _) = send(
        &server,
        ODataRequest::get("/Orders(10)").with_header("If-None-Match", "*"),
    );
    assert_status(&read, 400);
    assert!(read.etag().is_none());

    // well-formed tags cannot match a type without a token
    let stale = [
        ODataRequest::patch("/Orders(10)")
            .with_json(&json!({"Total": 99.0}))
            .with_header("If-Match", "W/\"1\""),
        ODataRequest::put("/Orders(10)")
            .with_json(&json!({"ID": 10, "Total": 99.0}))
            .with_header("If-Match", "W/\"'a','b'\""),
        ODataRequest::patch("/Orders(10)")
            .with_json(&json!({"Total": 99.0}))
            .with_header("If-Match", "W/\"99999999999999999999\""),
    ];
    for request in stale {
        let (response, _) = send(&server, request);
        assert_status(&response, 412);
    }

    // unreadable tag content is still a syntax error
    for value in ["W/\"abc\"", "W/\"'a\"", "W/1"] {
        let (response, _) = send(
            &server,
            ODataRequest::patch("/Orders(10)")
                .with_json(&json!({"Total": 99.0}))
                .with_header("If-Match", value),
        );
        assert_status(&response, 400);
    }
    let order = stored(&data, "Orders", &order_key(10)).unwrap();
    assert_eq!(order.get("Total"), Some(&json!(12.5)));

    let (any, _) = send(
        &server,
        ODataRequest::patch("/Orders(10)")
            .with_json(&json!({"Total": 13.0}))
            .with_header("If-Match", "*"),
    );
    assert_status(&any, 204);

    // no etag, so no precondition is needed either
    let (unconditional, _) = send(
        &server,
        ODataRequest::patch("/Orders(10)").with_json(&json!({"Total": 14.0})),
    );
    assert_status(&unconditional, 204);
    assert!(unconditional.etag().is_none());
    let order = stored(&data, "Orders", &order_key(10)).unwrap();
    assert_eq!(order.get("Total"), Some(&json!(14.0)));
}

#[test]
fn test_preconditions_where_they_do_not_apply() {
    let (server, _) = Northwind::server();
    let requests = [
        ODataRequest::get("/Customers").with_header("If-None-Match", "*"),
        ODataRequest::get("/Customers/$count").with_header("If-None-Match", "*"),
        ODataRequest::get("/").with_header("If-Match", "*"),
        ODataRequest::get("/Customers(1)?$expand=Orders").with_header("If-None-Match", ALICE),
        ODataRequest::post("/Customers")
            .with_json(&json!({"ID": 9, "Name": "Ivy"}))
            .with_header("If-Match", "*"),
        ODataRequest::get("/Customers(1)/Orders/$ref").with_header("If-None-Match", "*"),
        ODataRequest::get("/CustomerCount").with_header("If-None-Match", "*"),
    ];
    for request in requests {
        let path = request.path.clone();
        let (response, _) = send(&server, request);
        assert_eq!(response.status.as_u16(), 400, "{}", path);
    }
}

#[test]
fn test_whitespace_in_tokens_survives_the_round_trip() {
    let (server, _) = Northwind::server();

    let (renamed, _) = send(&server, rename("/Customers(2)", "Bob  Smith ").with_header("If-Match", "*"));
    assert_status(&renamed, 204);
    let etag = renamed.etag().unwrap().to_string();
    assert_eq!(etag, "W/\"'Bob%20%20Smith%20'\"");

    let (read, _) = send(&server, ODataRequest::get("/Customers(2)"));
    assert_eq!(read.etag(), Some(etag.as_str()));
    assert_eq!(body(&read)["Name"], "Bob  Smith ");

    let (trimmed, _) = send(
        &server,
        ODataRequest::get("/Customers(2)").with_header("If-None-Match", "W/\"'Bob%20%20Smith'\""),
    );
    assert_status(&trimmed, 200);

    let (exact, _) = send(
        &server,
        ODataRequest::get("/Customers(2)").with_header("If-None-Match", &etag),
    );
    assert_status(&exact, 304);
}

#[test]
fn test_conditional_delete() {
    let (server, data) = Northwind::server();

    let (stale, _) = send(
        &server,
        ODataRequest::delete("/Customers(2)").with_header("If-Match", ALICE),
    );
    assert_status(&stale, 412);
    assert!(stored(&data, "Customers", &customer_key(2)).is_some());

    let (deleted, _) = send(
        &server,
        ODataRequest::delete("/Customers(2)").with_header("If-Match", "W/\"'Bob'\""),
    );
    assert_status(&deleted, 204);
    assert!(stored(&data, "Customers", &customer_key(2)).is_none());
}
