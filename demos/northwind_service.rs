//! Northwind Service Example
//!
//! Defines a small data service with access rules, interceptors and a
//! service operation, then drives it with a scripted sequence of requests
//! and prints every response.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example northwind_service
//! ```

use http::Method;
use odata_server::config::{EntitySetRights, ServiceOperationRights};
use odata_server::error::{BuildResult, ODataError};
use odata_server::interceptor::{UpdateOperations, predicate};
use odata_server::literal::Literal;
use odata_server::metadata::{
    ModelBuilder, Multiplicity, PrimitiveType, ResourceProperty, ResourceType, ServiceModel,
};
use odata_server::provider::InMemoryDataSource;
use odata_server::service::{
    DataService, OperationOutput, ResultKind, ServiceConfiguration, ServiceOperation,
};
use odata_server::{ODataRequest, ODataResponse, ODataServer};
use serde_json::{Value, json};

struct Northwind {
    data: InMemoryDataSource,
}

impl DataService for Northwind {
    type Source = InMemoryDataSource;

    fn metadata() -> BuildResult<ServiceModel> {
        ModelBuilder::new("Northwind")
            .resource_type(
                ResourceType::entity("Customer")
                    .property(ResourceProperty::key("ID", PrimitiveType::Int32))
                    .property(
                        ResourceProperty::primitive("Name", PrimitiveType::String)
                            .etag()
                            .not_null(),
                    )
                    .property(ResourceProperty::primitive("City", PrimitiveType::String))
                    .property(ResourceProperty::primitive("Archived", PrimitiveType::Boolean))
                    .property(ResourceProperty::navigation(
                        "Orders",
                        "Orders",
                        Multiplicity::Many,
                    )),
            )
            .resource_type(
                ResourceType::entity("Order")
                    .property(ResourceProperty::key("ID", PrimitiveType::Int32))
                    .property(ResourceProperty::primitive("Total", PrimitiveType::Decimal)),
            )
            .resource_set("Customers", "Customer")
            .resource_set("Orders", "Order")
            .build()
    }

    fn initialize_service(config: &mut ServiceConfiguration) {
        config.set_entity_set_access_rule("Customers", EntitySetRights::ALL);
        // orders can be read and added, never changed or removed
        config.set_entity_set_access_rule(
            "Orders",
            EntitySetRights::ALL_READ | EntitySetRights::WRITE_APPEND,
        );
        config.set_service_operation_access_rule("*", ServiceOperationRights::ALL_READ);

        config.add_query_interceptor("Customers", || {
            Ok(predicate(|customer| {
                Ok(customer.get("Archived") != Some(&Value::Bool(true)))
            }))
        });
        config.add_change_interceptor("Orders", UpdateOperations::ADD, |order, _| {
            match order.get("Total").and_then(Value::as_f64) {
                Some(total) if total <= 0.0 => {
                    Err(ODataError::service(422, "Order totals must be positive."))
                }
                _ => Ok(()),
            }
        });

        config.add_service_operation(
            ServiceOperation::new(
                "CustomersIn",
                Method::GET,
                ResultKind::Entities("Customers".into()),
                |args, provider| {
                    let city = match args.get("city") {
                        Some(Literal::String(city)) => city.clone(),
                        _ => return Err(ODataError::bad_request("The city parameter is required.")),
                    };
                    let customers = provider
                        .enumerate("Customers")?
                        .into_iter()
                        .filter(|c| c.get("City") == Some(&Value::String(city.clone())))
                        .collect();
                    Ok(OperationOutput::Entities(customers))
                },
            )
            .parameter("city", PrimitiveType::String),
        );

        config.behavior.use_verbose_errors = true;
        config.behavior.service_root = "http://localhost:8080/northwind.svc/".to_string();
    }

    fn create_data_source(&self) -> InMemoryDataSource {
        self.data.session()
    }
}

fn show(label: &str, response: &ODataResponse) {
    println!("\n== {} -> {}", label, response.status);
    if let Some(etag) = response.etag() {
        println!("   ETag: {}", etag);
    }
    if let Some(location) = response.header("location") {
        println!("   Location: {}", location);
    }
    match response.json() {
        Some(body) => println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
        ),
        None if !response.body.is_empty() => println!("{}", response.text()),
        None => {}
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    log::info!("Starting Northwind service example");
    let server = ODataServer::new(Northwind {
        data: InMemoryDataSource::new(),
    });
    let definition = server.definition()?;
    log::info!(
        "Service initialized with {} resource sets",
        definition.model.resource_sets().count()
    );

    let script = [
        ("service document", ODataRequest::get("/")),
        (
            "create Ada with an order",
            ODataRequest::post("/Customers").with_json(&json!({
                "ID": 1,
                "Name": "Ada",
                "City": "London",
                "Orders": [{"ID": 100, "Total": 42.5}],
            })),
        ),
        (
            "create an archived customer",
            ODataRequest::post("/Customers").with_json(&json!({
                "ID": 2, "Name": "Babbage", "City": "London", "Archived": true,
            })),
        ),
        ("list customers", ODataRequest::get("/Customers?$count=true")),
        ("archived customers are hidden", ODataRequest::get("/Customers(2)")),
        (
            "expand orders",
            ODataRequest::get("/Customers(1)?$expand=Orders&$select=Name,Orders"),
        ),
        ("raw value", ODataRequest::get("/Customers(1)/City/$value")),
        ("operation", ODataRequest::get("/CustomersIn?city='London'")),
        (
            "update without If-Match",
            ODataRequest::patch("/Customers(1)").with_json(&json!({"City": "Paris"})),
        ),
        (
            "update with If-Match",
            ODataRequest::patch("/Customers(1)")
                .with_json(&json!({"City": "Paris"}))
                .with_header("If-Match", "W/\"'Ada'\""),
        ),
        ("orders cannot be deleted", ODataRequest::delete("/Orders(100)")),
        (
            "batch with a failing changeset",
            ODataRequest::post("/$batch").with_json(&json!({
                "requests": [
                    {"id": "1", "atomicityGroup": "g", "method": "POST", "url": "Orders",
                     "body": {"ID": 101, "Total": 10.0}},
                    {"id": "2", "atomicityGroup": "g", "method": "POST", "url": "Orders",
                     "body": {"ID": 102, "Total": -1.0}},
                    {"id": "3", "method": "GET", "url": "Orders/$count"},
                ],
            })),
        ),
    ];

    for (label, request) in script.iter() {
        let (response, context) = server.dispatch_traced(request);
        log::debug!(
            "Request '{}' went through {:?} with {} change interceptor calls",
            context.request_id,
            context.trace(),
            context.counters.total_change_invocations()
        );
        show(label, &response);
    }

    log::info!("Northwind service example completed");
    Ok(())
}
