//! Common test utilities for dispatcher integration testing.
//!
//! Provides a small Northwind-style service with interceptors and service
//! operations, seeded data, and helpers for building requests and checking
//! responses.

use http::Method;
use odata_server::config::{EntitySetRights, ServiceOperationRights};
use odata_server::error::{BuildResult, ODataError};
use odata_server::interceptor::{UpdateOperations, predicate};
use odata_server::literal::Literal;
use odata_server::metadata::{
    ModelBuilder, Multiplicity, PrimitiveType, ResourceProperty, ResourceType, ServiceModel,
};
use odata_server::provider::{Entity, EntityKey, InMemoryDataSource, UpdateProvider};
use odata_server::service::{
    DataService, OperationOutput, ResultKind, ServiceConfiguration, ServiceOperation,
};
use odata_server::{ODataRequest, ODataResponse, ODataServer, RequestContext};
use serde_json::{Value, json};


pub const SERVICE_ROOT: &str = "http://localhost/service.svc/";

/// Northwind-style model shared by the test services.
///
/// * `Customers` (`Customer`, derived `PreferredCustomer`): `Name` is the
///   concurrency token; `Orders` and `BestFriend` navigate; `Photo` is a stream
/// * `Orders` (`Order`): no concurrency token; `Lines` navigates
/// * `OrderLines` (`OrderLine`): composite key `OrderID, Line`
/// * `Documents` (`Document`): open type with a Guid key
pub fn northwind_model() -> BuildResult<ServiceModel> {
    ModelBuilder::new("Northwind")
        .resource_type(
            ResourceType::complex("Address")
                .property(ResourceProperty::primitive("Street", PrimitiveType::String))
                .property(ResourceProperty::primitive("City", PrimitiveType::String)),
        )
        .resource_type(
            ResourceType::entity("Customer")
                .property(ResourceProperty::key("ID", PrimitiveType::Int32))
                .property(
                    ResourceProperty::primitive("Name", PrimitiveType::String)
                        .etag()
                        .not_null(),
                )
                .property(ResourceProperty::complex("Address", "Address"))
                .property(ResourceProperty::primitive("Rating", PrimitiveType::Int32))
                .property(ResourceProperty::primitive("Hidden", PrimitiveType::Boolean))
                .property(ResourceProperty::navigation(
                    "Orders",
                    "Orders",
                    Multiplicity::Many,
                ))
                .property(ResourceProperty::navigation(
                    "BestFriend",
                    "Customers",
                    Multiplicity::ZeroOrOne,
                ))
                .property(ResourceProperty::stream("Photo")),
        )
        .resource_type(
            ResourceType::entity("PreferredCustomer")
                .derived_from("Customer")
                .property(ResourceProperty::primitive("Discount", PrimitiveType::Double)),
        )
        .resource_type(
            ResourceType::entity("Order")
                .property(ResourceProperty::key("ID", PrimitiveType::Int32))
                .property(ResourceProperty::primitive("Total", PrimitiveType::Decimal))
                .property(ResourceProperty::primitive(
                    "ShippedOn",
                    PrimitiveType::DateTimeOffset,
                ))
                .property(ResourceProperty::navigation(
                    "Lines",
                    "OrderLines",
                    Multiplicity::Many,
                )),
        )
        .resource_type(
            ResourceType::entity("OrderLine")
                .property(ResourceProperty::key("OrderID", PrimitiveType::Int32))
                .property(ResourceProperty::key("Line", PrimitiveType::Int32))
                .property(ResourceProperty::primitive("Product", PrimitiveType::String))
                .property(ResourceProperty::primitive("Quantity", PrimitiveType::Int16)),
        )
        .resource_type(
            ResourceType::entity("Document")
                .open()
                .property(ResourceProperty::key("ID", PrimitiveType::Guid)),
        )
        .resource_set("Customers", "Customer")
        .resource_set("Orders", "Order")
        .resource_set("OrderLines", "OrderLine")
        .resource_set("Documents", "Document")
        .build()
}

/// Interceptors and operations of the Northwind services.
///
/// * Customers with `Hidden: true` are filtered out of every query
/// * customers named `Forbidden` cannot be added or changed
/// * customers rated 99 cannot be deleted (403)
/// * orders with a negative total are rejected
pub fn configure_northwind(config: &mut ServiceConfiguration) {
    config.add_query_interceptor("Customers", || {
        Ok(predicate(|customer| {
            Ok(customer.get("Hidden") != Some(&Value::Bool(true)))
        }))
    });
    config.add_query_interceptor("Orders", || Ok(predicate(|_| Ok(true))));
    config.add_change_interceptor(
        "Customers",
        UpdateOperations::ADD | UpdateOperations::CHANGE,
        |customer, _| match customer.get("Name") {
            Some(Value::String(name)) if name == "Forbidden" => Err(ODataError::bad_request(
                "Customers cannot be named 'Forbidden'.",
            )),
            _ => Ok(()),
        },
    );
    config.add_change_interceptor("Customers", UpdateOperations::DELETE, |customer, _| {
        match customer.get("Rating") {
            Some(rating) if rating == 99 => Err(ODataError::forbidden(
                "Customers rated 99 are protected.",
            )),
            _ => Ok(()),
        }
    });
    config.add_change_interceptor(
        "Orders",
        UpdateOperations::ADD | UpdateOperations::CHANGE,
        |order, _| {
            let negative = order
                .get("Total")
                .and_then(Value::as_f64)
                .is_some_and(|total| total < 0.0);
            if negative {
                Err(ODataError::service(422, "Order totals cannot be negative."))
            } else {
                Ok(())
            }
        },
    );

    config.add_service_operation(
        ServiceOperation::new(
            "TopCustomers",
            Method::GET,
            ResultKind::Entities("Customers".into()),
            |args, provider| {
                let minimum = match args.get("minRating") {
                    Some(Literal::Int32(value)) => *value,
                    _ => 0,
                };
                let customers = provider
                    .enumerate("Customers")?
                    .into_iter()
                    .filter(|c| c.get("Rating").and_then(Value::as_i64).unwrap_or(0) >= i64::from(minimum))
                    .collect();
                Ok(OperationOutput::Entities(customers))
            },
        )
        .parameter("minRating", PrimitiveType::Int32),
    );
    config.add_service_operation(
        ServiceOperation::new(
            "CustomerByName",
            Method::GET,
            ResultKind::Entity("Customers".into()),
            |args, provider| {
                let name = match args.get("name") {
                    Some(Literal::String(name)) => name.clone(),
                    _ => return Err(ODataError::bad_request("The name parameter is required.")),
                };
                let customer = provider
                    .enumerate("Customers")?
                    .into_iter()
                    .find(|c| c.get("Name") == Some(&Value::String(name.clone())));
                Ok(OperationOutput::Entity(customer))
            },
        )
        .parameter("name", PrimitiveType::String),
    );
    config.add_service_operation(ServiceOperation::new(
        "CustomerCount",
        Method::GET,
        ResultKind::Primitive(PrimitiveType::Int32),
        |_, provider| {
            let count = provider.enumerate("Customers")?.len();
            Ok(OperationOutput::Primitive(Literal::Int32(count as i32)))
        },
    ));
    config.add_service_operation(ServiceOperation::new(
        "ResetRatings",
        Method::POST,
        ResultKind::Void,
        |_, provider| {
            for mut customer in provider.enumerate("Customers")? {
                customer.set("Rating", json!(0));
                let key = EntityKey::from_entity(&customer, &northwind_model()?)?;
                provider.update(&key, customer)?;
            }
            Ok(OperationOutput::Void)
        },
    ));
    config.add_service_operation(ServiceOperation::new(
        "Explode",
        Method::GET,
        ResultKind::Primitive(PrimitiveType::String),
        |_, _| panic!("operation blew up"),
    ));
}

/// Grant full rights on every set and operation.
pub fn grant_all(config: &mut ServiceConfiguration) {
    config.set_entity_set_access_rule("*", EntitySetRights::ALL);
    config.set_service_operation_access_rule("*", ServiceOperationRights::ALL);
}

pub fn customer_key(id: i32) -> EntityKey {
    EntityKey::single("ID", Literal::Int32(id))
}

pub fn order_key(id: i32) -> EntityKey {
    EntityKey::single("ID", Literal::Int32(id))
}

/// Seed the Northwind data set.
///
/// | Customer | Name  | Rating | Notes                         |
/// |----------|-------|--------|-------------------------------|
/// | 1        | Alice | 5      | orders 10, 11; best friend 2  |
/// | 2        | Bob   | 3      | order 12                      |
/// | 3        | Carol | 4      | hidden by the query interceptor |
/// | 4        | Dave  | 99     | `PreferredCustomer`, protected |
///
/// Order 10 has lines (10,1) and (10,2).
pub fn seed_northwind() -> InMemoryDataSource {
    let data = InMemoryDataSource::new();
    let mut session = data.session();
    let customers = [
        json!({"ID": 1, "Name": "Alice", "Rating": 5, "Hidden": false,
               "Address": {"Street": "1 Main St", "City": "Oslo"}}),
        json!({"ID": 2, "Name": "Bob", "Rating": 3, "Hidden": false, "Address": null}),
        json!({"ID": 3, "Name": "Carol", "Rating": 4, "Hidden": true, "Address": null}),
    ];
    for (index, value) in customers.into_iter().enumerate() {
        let entity = Entity::from_json("Customers", "Customer", value).unwrap();
        session.create(entity, customer_key(index as i32 + 1)).unwrap();
    }
    let dave = Entity::from_json(
        "Customers",
        "PreferredCustomer",
        json!({"ID": 4, "Name": "Dave", "Rating": 99, "Hidden": false, "Discount": 0.1}),
    )
    .unwrap();
    session.create(dave, customer_key(4)).unwrap();

    for (id, total) in [(10, 12.5), (11, 30.0), (12, 7.25)] {
        let order = Entity::from_json(
            "Orders",
            "Order",
            json!({"ID": id, "Total": total, "ShippedOn": "2024-03-01T10:00:00+01:00"}),
        )
        .unwrap();
        session.create(order, order_key(id)).unwrap();
    }
    for (line, product, quantity) in [(1, "Tea", 2), (2, "Cake", 1)] {
        let key = EntityKey::new(vec![
            ("OrderID".to_string(), Literal::Int32(10)),
            ("Line".to_string(), Literal::Int32(line)),
        ]);
        let entity = Entity::from_json(
            "OrderLines",
            "OrderLine",
            json!({"OrderID": 10, "Line": line, "Product": product, "Quantity": quantity}),
        )
        .unwrap();
        session.create(entity, key.clone()).unwrap();
        session
            .add_link("Orders", &order_key(10), "Lines", "OrderLines", &key)
            .unwrap();
    }

    let link = |session: &mut InMemoryDataSource, customer: i32, nav: &str, set: &str, target: &EntityKey| {
        session
            .add_link("Customers", &customer_key(customer), nav, set, target)
            .unwrap();
    };
    link(&mut session, 1, "Orders", "Orders", &order_key(10));
    link(&mut session, 1, "Orders", "Orders", &order_key(11));
    link(&mut session, 2, "Orders", "Orders", &order_key(12));
    link(&mut session, 1, "BestFriend", "Customers", &customer_key(2));
    session.save_changes().unwrap();
    data
}

/// Dispatch and return the response with its context.
pub fn send<S: DataService>(
    server: &ODataServer<S>,
    request: ODataRequest,
) -> (ODataResponse, RequestContext) {
    server.dispatch_traced(&request)
}

/// Body of a JSON response; panics with the body text otherwise.
pub fn body(response: &ODataResponse) -> Value {
    response
        .json()
        .unwrap_or_else(|| panic!("expected a JSON body, got {:?}", response.text()))
}

/// Assert the status and, for errors, print the body on failure.
#[track_caller]
pub fn assert_status(response: &ODataResponse, expected: u16) {
    assert_eq!(
        response.status.as_u16(),
        expected,
        "unexpected status; body: {}",
        response.text()
    );
}

/// `ID`s of a collection response, in order.
pub fn ids(response: &ODataResponse) -> Vec<i64> {
    body(response)["value"]
        .as_array()
        .map(|values| values.iter().filter_map(|v| v["ID"].as_i64()).collect())
        .unwrap_or_default()
}

/// The service document's name list.
pub fn service_document_names(response: &ODataResponse) -> Vec<String> {
    body(response)["value"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Read a committed entity straight from the data source.
pub fn stored(data: &InMemoryDataSource, set: &str, key: &EntityKey) -> Option<Entity> {
    data.session().get(set, key).unwrap()
}

pub fn json_request(method: Method, uri: &str, value: Value) -> ODataRequest {
    ODataRequest::new(method, uri).with_json(&value)
}
