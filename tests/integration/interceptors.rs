//! Query and change interceptors.

use crate::common::services::Northwind;
use crate::common::{assert_status, body, customer_key, order_key, send, stored};
use odata_server::{ODataRequest, UpdateProvider};
use serde_json::json;

#[test]
fn test_query_interceptor_runs_once_per_plan() {
    let (server, _) = Northwind::server();
    let (response, context) = send(&server, ODataRequest::get("/Customers"));

    assert_status(&response, 200);
    let counters = &context.counters;
    assert_eq!(counters.query_invocations("Customers"), 1);
    // the predicate is evaluated once per candidate entity
    assert_eq!(counters.predicate_evaluations("Customers"), 4);
    assert_eq!(counters.query_invocations("Orders"), 0);
    assert_eq!(counters.total_change_invocations(), 0);
}

#[test]
fn test_every_set_on_the_path_is_intercepted() {
    let (server, _) = Northwind::server();
    let (response, context) = send(&server, ODataRequest::get("/Customers(1)/Orders"));

    assert_status(&response, 200);
    assert_eq!(context.counters.query_invocations("Customers"), 1);
    assert_eq!(context.counters.query_invocations("Orders"), 1);
    assert_eq!(context.counters.predicate_evaluations("Customers"), 1);
    assert_eq!(context.counters.predicate_evaluations("Orders"), 2);
}

#[test]
fn test_expanded_sets_are_intercepted() {
    let (server, _) = Northwind::server();
    let (response, context) = send(&server, ODataRequest::get("/Customers(1)?$expand=BestFriend"));

    assert_status(&response, 200);
    assert_eq!(context.counters.query_invocations("Customers"), 2);
    assert_eq!(body(&response)["BestFriend"]["Name"], "Bob");
}

#[test]
fn test_hidden_entities_are_not_expanded() {
    let (server, data) = Northwind::server();
    let mut session = data.session();
    session
        .add_link("Customers", &customer_key(2), "BestFriend", "Customers", &customer_key(3))
        .unwrap();
    session.save_changes().unwrap();

    let (response, _) = send(&server, ODataRequest::get("/Customers(2)?$expand=BestFriend"));
    assert_status(&response, 200);
    assert!(body(&response)["BestFriend"].is_null());

    let (direct, _) = send(&server, ODataRequest::get("/Customers(2)/BestFriend"));
    assert_status(&direct, 404);
}

#[test]
fn test_creates_do_not_query_the_target_set() {
    let (server, data) = Northwind::server();
    let (response, context) = send(
        &server,
        ODataRequest::post("/Customers").with_json(&json!({"ID": 5, "Name": "Eve"})),
    );

    assert_status(&response, 201);
    assert_eq!(context.counters.query_invocations("Customers"), 0);
    assert_eq!(context.counters.change_invocations("Customers"), 1);
    assert!(stored(&data, "Customers", &customer_key(5)).is_some());
}

#[test]
fn test_change_interceptor_rejects_add_and_change() {
    let (server, data) = Northwind::server();

    let (added, _) = send(
        &server,
        ODataRequest::post("/Customers").with_json(&json!({"ID": 5, "Name": "Forbidden"})),
    );
    assert_status(&added, 400);
    assert_eq!(
        body(&added)["error"]["message"],
        "Customers cannot be named 'Forbidden'."
    );
    assert!(stored(&data, "Customers", &customer_key(5)).is_none());

    let (changed, _) = send(
        &server,
        ODataRequest::patch("/Customers(1)")
            .with_json(&json!({"Name": "Forbidden"}))
            .with_header("If-Match", "*"),
    );
    assert_status(&changed, 400);
    let alice = stored(&data, "Customers", &customer_key(1)).unwrap();
    assert_eq!(alice.get("Name"), Some(&json!("Alice")));
}

#[test]
fn test_change_interceptor_status_is_kept() {
    let (server, data) = Northwind::server();

    let (protected, context) = send(
        &server,
        ODataRequest::delete("/Customers(4)").with_header("If-Match", "W/\"'Dave'\""),
    );
    assert_status(&protected, 403);
    assert_eq!(context.counters.change_invocations("Customers"), 1);
    assert!(stored(&data, "Customers", &customer_key(4)).is_some());

    let (negative, _) = send(
        &server,
        ODataRequest::post("/Orders").with_json(&json!({"ID": 20, "Total": -1.0})),
    );
    assert_status(&negative, 422);
    assert_eq!(body(&negative)["error"]["code"], "ServiceError");
    assert!(stored(&data, "Orders", &order_key(20)).is_none());
}

#[test]
fn test_change_interceptors_filter_by_operation() {
    let (server, _) = Northwind::server();

    let (deleted, context) = send(
        &server,
        ODataRequest::delete("/Customers(2)").with_header("If-Match", "*"),
    );
    assert_status(&deleted, 204);
    // only the DELETE registration runs
    assert_eq!(context.counters.change_invocations("Customers"), 1);

    let (updated, context) = send(
        &server,
        ODataRequest::patch("/Customers(1)")
            .with_json(&json!({"Rating": 6}))
            .with_header("If-Match", "*"),
    );
    assert_status(&updated, 204);
    assert_eq!(context.counters.change_invocations("Customers"), 1);
    assert_eq!(context.counters.query_invocations("Customers"), 1);
}

#[test]
fn test_nested_interceptors_run_before_the_parent() {
    let (server, data) = Northwind::server();

    // the nested order fails, so the customer's interceptor never runs
    let (response, context) = send(
        &server,
        ODataRequest::post("/Customers").with_json(&json!({
            "ID": 6,
            "Name": "Finn",
            "Orders": [{"ID": 30, "Total": 1.0}, {"ID": 31, "Total": -5.0}],
        })),
    );
    assert_status(&response, 422);
    assert_eq!(context.counters.change_invocations("Orders"), 2);
    assert_eq!(context.counters.change_invocations("Customers"), 0);
    assert!(stored(&data, "Customers", &customer_key(6)).is_none());
    assert!(stored(&data, "Orders", &order_key(30)).is_none());
}
