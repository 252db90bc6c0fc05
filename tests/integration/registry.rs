//! Service definition caching under concurrency.

use crate::common::services::{
    BrokenService, COUNTING_INITIALIZATIONS, CountingService, Northwind, PanickingService,
};
use odata_server::{DispatchState, ODataRequest, ODataServer, ServiceRegistry};
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_initialize_once() {
    let tasks: Vec<_> = (0..16)
        .map(|_| tokio::task::spawn_blocking(ServiceRegistry::definition::<CountingService>))
        .collect();

    let mut definitions = Vec::new();
    for task in tasks {
        definitions.push(task.await.unwrap().unwrap());
    }

    assert_eq!(COUNTING_INITIALIZATIONS.load(Ordering::SeqCst), 1);
    assert!(ServiceRegistry::is_initialized::<CountingService>());
    assert!(
        definitions
            .windows(2)
            .all(|pair| Arc::ptr_eq(&pair[0], &pair[1]))
    );

    // requests reuse the cached definition
    let server = ODataServer::new(CountingService);
    let response = server.dispatch(&ODataRequest::get("/Customers"));
    assert_eq!(response.status, 200);
    assert_eq!(COUNTING_INITIALIZATIONS.load(Ordering::SeqCst), 1);

    assert!(ServiceRegistry::invalidate::<CountingService>());
    assert!(!ServiceRegistry::is_initialized::<CountingService>());
    let rebuilt = ServiceRegistry::definition::<CountingService>().unwrap();
    assert_eq!(COUNTING_INITIALIZATIONS.load(Ordering::SeqCst), 2);
    assert!(!Arc::ptr_eq(&rebuilt, &definitions[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_definition() {
    let (server, _) = Northwind::server();
    let server = Arc::new(server);

    let tasks: Vec<_> = (1..=8)
        .map(|i| {
            let server = Arc::clone(&server);
            tokio::task::spawn_blocking(move || {
                let id = if i % 2 == 0 { 1 } else { 2 };
                server.dispatch(&ODataRequest::get(&format!("/Customers({})", id)))
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().status, 200);
    }
    assert!(ServiceRegistry::is_initialized::<Northwind>());
}

#[test]
fn test_initialization_failures_are_cached() {
    let first = ServiceRegistry::definition::<BrokenService>().unwrap_err();
    assert!(first.is_internal());
    assert!(first.to_string().contains("MissingType"), "{}", first);

    assert!(ServiceRegistry::is_initialized::<BrokenService>());
    let second = ServiceRegistry::definition::<BrokenService>().unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_panicking_initialization_is_an_internal_error() {
    let server = ODataServer::new(PanickingService);

    let (response, context) = server.dispatch_traced(&ODataRequest::get("/Customers"));
    assert_eq!(response.status, 500);
    assert!(context.is_faulted());
    assert_eq!(context.trace().last(), Some(&DispatchState::Faulted));

    // the failure is cached and explains itself to the host
    assert!(ServiceRegistry::is_initialized::<PanickingService>());
    let error = ServiceRegistry::definition::<PanickingService>().unwrap_err();
    assert!(error.is_internal());
    assert!(error.to_string().contains("configuration blew up"), "{}", error);

    let again = server.dispatch(&ODataRequest::get("/"));
    assert_eq!(again.status, 500);
}
