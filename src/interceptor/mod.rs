//! Query and change interceptors.
//!
//! Interceptors are registered per entity set while a service is initialised.
//!
//! * A **query interceptor** is invoked when a query over its set is
//!   composed and returns a predicate. All predicates of a set are ANDed
//!   into the query's filter. Predicates run only when the query is
//!   enumerated, so an interceptor firing does not mean the query ran.
//! * A **change interceptor** is invoked once per affected entity when an
//!   add, change or delete touches its set. Its filter selects the
//!   operations it wants to see.
//!
//! Interceptor failures keep their status when they are protocol errors. A
//! panicking interceptor is reported as an internal error.
//!
//! # Example Usage
//!
//! ```rust
//! use odata_server::interceptor::{InterceptorRegistry, UpdateOperations, predicate};
//!
//! let mut registry = InterceptorRegistry::new();
//! registry.add_query_interceptor("Customers", || {
//!     Ok(predicate(|customer| Ok(customer.get("Active") == Some(&serde_json::json!(true)))))
//! });
//! registry.add_change_interceptor("Customers", UpdateOperations::DELETE, |_customer, _op| Ok(()));
//! assert_eq!(registry.query_interceptors("Customers").len(), 1);
//! assert_eq!(registry.change_interceptors("Orders").count(), 0);
//! ```

pub mod change;
pub mod counters;
pub mod query;

pub use change::notify_change;
pub use counters::InvocationCounters;
pub use query::{QueryPlan, QuerySource};

use crate::error::{ODataError, ODataResult};
use crate::provider::Entity;
use bitflags::bitflags;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

bitflags! {
    /// Operations a change interceptor is notified about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateOperations: u32 {
        const NONE = 0;
        const ADD = 1;
        const CHANGE = 2;
        const DELETE = 4;
        const ALL = Self::ADD.bits() | Self::CHANGE.bits() | Self::DELETE.bits();
    }
}

/// Filter evaluated against each entity of an intercepted query.
pub type EntityPredicate = Box<dyn Fn(&Entity) -> ODataResult<bool> + Send + Sync>;

/// Box a closure as an [`EntityPredicate`].
pub fn predicate<F>(f: F) -> EntityPredicate
where
    F: Fn(&Entity) -> ODataResult<bool> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Produces the predicate for one query over its set.
pub type QueryInterceptor = Arc<dyn Fn() -> ODataResult<EntityPredicate> + Send + Sync>;

/// Side effect run for each added, changed or deleted entity.
pub type ChangeInterceptor = Arc<dyn Fn(&Entity, UpdateOperations) -> ODataResult<()> + Send + Sync>;

#[derive(Clone)]
pub struct ChangeRegistration {
    pub operations: UpdateOperations,
    pub callback: ChangeInterceptor,
}

/// Interceptors by entity set name, in registration order.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    query: HashMap<String, Vec<QueryInterceptor>>,
    change: HashMap<String, Vec<ChangeRegistration>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_query_interceptor<F>(&mut self, set: impl Into<String>, interceptor: F)
    where
        F: Fn() -> ODataResult<EntityPredicate> + Send + Sync + 'static,
    {
        self.query
            .entry(set.into())
            .or_default()
            .push(Arc::new(interceptor));
    }

    pub fn add_change_interceptor<F>(
        &mut self,
        set: impl Into<String>,
        operations: UpdateOperations,
        interceptor: F,
    ) where
        F: Fn(&Entity, UpdateOperations) -> ODataResult<()> + Send + Sync + 'static,
    {
        self.change
            .entry(set.into())
            .or_default()
            .push(ChangeRegistration {
                operations,
                callback: Arc::new(interceptor),
            });
    }

    pub fn query_interceptors(&self, set: &str) -> &[QueryInterceptor] {
        self.query.get(set).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Change interceptors of a set with their operation filters.
    pub fn change_interceptors(&self, set: &str) -> impl Iterator<Item = &ChangeRegistration> {
        self.change.get(set).into_iter().flatten()
    }

    /// Names of every set with at least one interceptor.
    pub fn intercepted_sets(&self) -> impl Iterator<Item = &str> {
        self.query
            .keys()
            .chain(self.change.keys())
            .map(String::as_str)
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("query_sets", &self.query.keys().collect::<Vec<_>>())
            .field("change_sets", &self.change.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Run service code, turning a panic into an internal error.
pub(crate) fn guarded<T>(what: &str, f: impl FnOnce() -> ODataResult<T>) -> ODataResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ODataError::internal_message(format!(
            "{} failed: {}",
            what,
            panic_message(payload.as_ref())
        ))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
