//! Property, `$value` and stream access.

use crate::common::services::Northwind;
use crate::common::{SERVICE_ROOT, assert_status, body, customer_key, send, stored};
use odata_server::{InMemoryDataSource, ODataRequest};
use serde_json::json;

const ALICE: &str = "W/\"'Alice'\"";
const DOCUMENT: &str = "6f9619ff-8b86-d011-b42d-00c04fc964ff";

#[test]
fn test_primitive_property() {
    let (server, _) = Northwind::server();
    let (response, _) = send(&server, ODataRequest::get("/Customers(1)/Name"));

    assert_status(&response, 200);
    assert_eq!(
        body(&response),
        json!({
            "@odata.context": format!("{}$metadata#Customers(1)/Name", SERVICE_ROOT),
            "value": "Alice",
        })
    );
    assert_eq!(response.etag(), Some(ALICE));
}

#[test]
fn test_complex_property_and_nested_path() {
    let (server, _) = Northwind::server();

    let (address, _) = send(&server, ODataRequest::get("/Customers(1)/Address"));
    assert_status(&address, 200);
    let address = body(&address);
    assert_eq!(address["City"], "Oslo");
    assert_eq!(address["Street"], "1 Main St");
    assert_eq!(
        address["@odata.context"],
        format!("{}$metadata#Customers(1)/Address", SERVICE_ROOT)
    );

    let (city, _) = send(&server, ODataRequest::get("/Customers(1)/Address/City"));
    assert_status(&city, 200);
    assert_eq!(body(&city)["value"], "Oslo");

    let (city_value, _) = send(&server, ODataRequest::get("/Customers(1)/Address/City/$value"));
    assert_eq!(city_value.text(), "Oslo");

    let (unknown, _) = send(&server, ODataRequest::get("/Customers(1)/Address/Zip"));
    assert_status(&unknown, 404);
}

#[test]
fn test_null_values() {
    let (server, _) = Northwind::server();

    // Bob has no address
    let (address, _) = send(&server, ODataRequest::get("/Customers(2)/Address"));
    assert_status(&address, 204);
    let (city, _) = send(&server, ODataRequest::get("/Customers(2)/Address/City"));
    assert_status(&city, 204);

    let (raw, _) = send(&server, ODataRequest::get("/Customers(2)/Address/City/$value"));
    assert_status(&raw, 404);
}

#[test]
fn test_raw_values_are_text() {
    let (server, _) = Northwind::server();

    let (rating, _) = send(&server, ODataRequest::get("/Customers(1)/Rating/$value"));
    assert_status(&rating, 200);
    assert_eq!(rating.text(), "5");
    assert_eq!(rating.header("content-type"), Some("text/plain"));
    assert_eq!(rating.etag(), Some(ALICE));

    let (flag, _) = send(&server, ODataRequest::get("/Customers(1)/Hidden/$value"));
    assert_eq!(flag.text(), "false");

    let (complex, _) = send(&server, ODataRequest::get("/Customers(1)/Address/$value"));
    assert_status(&complex, 400);
}

#[test]
fn test_put_property() {
    let (server, data) = Northwind::server();

    let (response, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Name")
            .with_json(&json!({"value": "Alicia"}))
            .with_header("If-Match", ALICE),
    );
    assert_status(&response, 204);
    assert_eq!(response.etag(), Some("W/\"'Alicia'\""));
    let alice = stored(&data, "Customers", &customer_key(1)).unwrap();
    assert_eq!(alice.get("Name"), Some(&json!("Alicia")));

    let (bare, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Rating")
            .with_json(&json!(7))
            .with_header("If-Match", "*"),
    );
    assert_status(&bare, 400);

    let (mistyped, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Rating")
            .with_json(&json!({"value": "seven"}))
            .with_header("If-Match", "*"),
    );
    assert_status(&mistyped, 400);

    let (unconditional, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Rating").with_json(&json!({"value": 7})),
    );
    assert_status(&unconditional, 400);
}

#[test]
fn test_put_raw_value() {
    let (server, data) = Northwind::server();

    let (response, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Rating/$value")
            .with_header("Content-Type", "text/plain")
            .with_header("If-Match", "*")
            .with_body("7"),
    );
    assert_status(&response, 204);
    let alice = stored(&data, "Customers", &customer_key(1)).unwrap();
    assert_eq!(alice.get("Rating"), Some(&json!(7)));

    let (invalid, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Rating/$value")
            .with_header("If-Match", "*")
            .with_body("seven"),
    );
    assert_status(&invalid, 400);
}

#[test]
fn test_key_properties_cannot_be_written() {
    let (server, data) = Northwind::server();

    let (json_put, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/ID")
            .with_json(&json!({"value": 9}))
            .with_header("If-Match", "*"),
    );
    assert_status(&json_put, 400);

    let (raw_put, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/ID/$value")
            .with_header("If-Match", "*")
            .with_body("9"),
    );
    assert_status(&raw_put, 400);
    assert!(stored(&data, "Customers", &customer_key(1)).is_some());
    assert!(stored(&data, "Customers", &customer_key(9)).is_none());
}

#[test]
fn test_delete_property_sets_null() {
    let (server, data) = Northwind::server();

    let (rating, _) = send(
        &server,
        ODataRequest::delete("/Customers(1)/Rating").with_header("If-Match", "*"),
    );
    assert_status(&rating, 204);
    let alice = stored(&data, "Customers", &customer_key(1)).unwrap();
    assert_eq!(alice.get("Rating"), Some(&json!(null)));

    // Name is not nullable
    let (name, _) = send(
        &server,
        ODataRequest::delete("/Customers(1)/Name").with_header("If-Match", "*"),
    );
    assert_status(&name, 400);
}

#[test]
fn test_complex_merge_and_replace() {
    let (server, data) = Northwind::server();
    let address = |data: &InMemoryDataSource| {
        stored(data, "Customers", &customer_key(1))
            .and_then(|alice| alice.get("Address").cloned())
            .unwrap_or_default()
    };

    let (merged, _) = send(
        &server,
        ODataRequest::patch("/Customers(1)/Address")
            .with_json(&json!({"City": "Bergen"}))
            .with_header("If-Match", "*"),
    );
    assert_status(&merged, 204);
    assert_eq!(address(&data), json!({"Street": "1 Main St", "City": "Bergen"}));

    let (replaced, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Address")
            .with_json(&json!({"City": "Tromsø"}))
            .with_header("If-Match", "*"),
    );
    assert_status(&replaced, 204);
    assert_eq!(address(&data), json!({"City": "Tromsø"}));

    let (unknown, _) = send(
        &server,
        ODataRequest::patch("/Customers(1)/Address")
            .with_json(&json!({"Zip": "9000"}))
            .with_header("If-Match", "*"),
    );
    assert_status(&unknown, 400);

    // a nested property of a null complex value creates the value
    let (nested, _) = send(
        &server,
        ODataRequest::put("/Customers(2)/Address/City")
            .with_json(&json!({"value": "Bergen"}))
            .with_header("If-Match", "*"),
    );
    assert_status(&nested, 204);
    let bob = stored(&data, "Customers", &customer_key(2)).unwrap();
    assert_eq!(bob.get("Address"), Some(&json!({"City": "Bergen"})));
}

#[test]
fn test_property_change_runs_change_interceptors() {
    let (server, data) = Northwind::server();
    let (response, context) = send(
        &server,
        ODataRequest::put("/Customers(1)/Name")
            .with_json(&json!({"value": "Forbidden"}))
            .with_header("If-Match", "*"),
    );

    assert_status(&response, 400);
    assert_eq!(context.counters.change_invocations("Customers"), 1);
    let alice = stored(&data, "Customers", &customer_key(1)).unwrap();
    assert_eq!(alice.get("Name"), Some(&json!("Alice")));
}

#[test]
fn test_stream_property() {
    let (server, _) = Northwind::server();
    let bytes = vec![0x89, 0x50, 0x4e, 0x47, 0x00, 0xff];

    let (empty, _) = send(&server, ODataRequest::get("/Customers(1)/Photo"));
    assert_status(&empty, 404);

    let (written, _) = send(
        &server,
        ODataRequest::put("/Customers(1)/Photo")
            .with_header("Content-Type", "image/png")
            .with_header("If-Match", "*")
            .with_body(bytes.clone()),
    );
    assert_status(&written, 204);

    let (read, _) = send(&server, ODataRequest::get("/Customers(1)/Photo"));
    assert_status(&read, 200);
    assert_eq!(read.body, bytes);
    assert_eq!(read.header("content-type"), Some("application/octet-stream"));

    // streams stay out of entity payloads and survive a replace
    let (entity, _) = send(&server, ODataRequest::get("/Customers(1)"));
    assert!(body(&entity).get("Photo").is_none());
    let (replaced, _) = send(
        &server,
        ODataRequest::put("/Customers(1)")
            .with_json(&json!({"Name": "Alice"}))
            .with_header("If-Match", "*"),
    );
    assert_status(&replaced, 204);
    let (still_there, _) = send(&server, ODataRequest::get("/Customers(1)/Photo"));
    assert_eq!(still_there.body, bytes);

    let (delete, _) = send(
        &server,
        ODataRequest::delete("/Customers(1)/Photo").with_header("If-Match", "*"),
    );
    assert_status(&delete, 405);
}

#[test]
fn test_dynamic_properties_of_open_types() {
    let (server, _) = Northwind::server();
    let (created, _) = send(
        &server,
        ODataRequest::post("/Documents")
            .with_json(&json!({"ID": DOCUMENT, "Title": "Spec", "Pages": 12})),
    );
    assert_status(&created, 201);
    assert_eq!(body(&created)["Pages"], 12);

    let uri = |suffix: &str| format!("/Documents({}){}", DOCUMENT, suffix);

    let (pages, _) = send(&server, ODataRequest::get(&uri("/Pages")));
    assert_status(&pages, 200);
    assert_eq!(body(&pages)["value"], 12);
    // no concurrency properties, so no ETag
    assert!(pages.etag().is_none());

    let (raw, _) = send(&server, ODataRequest::get(&uri("/Pages/$value")));
    assert_eq!(raw.text(), "12");

    let (missing, _) = send(&server, ODataRequest::get(&uri("/Author")));
    assert_status(&missing, 204);

    let (renamed, _) = send(
        &server,
        ODataRequest::put(&uri("/Title")).with_json(&json!({"value": "Draft"})),
    );
    assert_status(&renamed, 204);
    let (title, _) = send(&server, ODataRequest::get(&uri("/Title/$value")));
    assert_eq!(title.text(), "Draft");

    let (selected, _) = send(&server, ODataRequest::get(&uri("?$select=Title")));
    let document = body(&selected);
    assert_eq!(document["Title"], "Draft");
    assert!(document.get("Pages").is_none());
}
