//! Process-wide cache of service definitions.
//!
//! Each distinct [`DataService`] type is initialised exactly once: its model
//! is built and `initialize_service` runs on the first request, and every
//! later request reuses the cached [`ServiceDefinition`]. Concurrent first
//! requests for the same type wait for a single initialisation.

use super::{DataService, ServiceConfiguration};
use crate::error::{BuildError, ODataResult};
use crate::interceptor::panic_message;
use crate::metadata::ServiceModel;
use log::{info, warn};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Model and configuration of one service type.
#[derive(Debug)]
pub struct ServiceDefinition {
    pub model: ServiceModel,
    pub configuration: ServiceConfiguration,
}

type DefinitionCell = Arc<OnceCell<Result<Arc<ServiceDefinition>, BuildError>>>;

/// Global registry of initialised services (service type -> definition)
static SERVICE_DEFINITIONS: Lazy<Mutex<HashMap<TypeId, DefinitionCell>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Access to the process-wide definition cache.
pub struct ServiceRegistry;

impl ServiceRegistry {
    /// Definition of `S`, initialising it on first use.
    ///
    /// A service whose model or configuration is invalid, or whose
    /// definition code panics, fails every request with an internal error;
    /// the failure is cached like a success.
    pub fn definition<S: DataService>() -> ODataResult<Arc<ServiceDefinition>> {
        let cell = {
            let mut definitions = SERVICE_DEFINITIONS.lock();
            Arc::clone(definitions.entry(TypeId::of::<S>()).or_default())
        };
        // the map lock is released so other service types are not blocked
        let definition = cell.get_or_init(|| {
            info!("Initializing service {}", type_name::<S>());
            let result = catch_unwind(AssertUnwindSafe(build_definition::<S>))
                .unwrap_or_else(|payload| {
                    Err(BuildError::InitializationPanicked {
                        message: panic_message(payload.as_ref()),
                    })
                })
                .map(Arc::new);
            if let Err(error) = &result {
                warn!("Service {} failed to initialize: {}", type_name::<S>(), error);
            }
            result
        });
        definition.clone().map_err(Into::into)
    }

    /// Drop the cached definition of `S`; the next request initialises again.
    pub fn invalidate<S: DataService>() -> bool {
        SERVICE_DEFINITIONS
            .lock()
            .remove(&TypeId::of::<S>())
            .is_some()
    }

    /// Whether `S` has been initialised.
    pub fn is_initialized<S: DataService>() -> bool {
        SERVICE_DEFINITIONS
            .lock()
            .get(&TypeId::of::<S>())
            .is_some_and(|cell| cell.get().is_some())
    }
}

fn build_definition<S: DataService>() -> Result<ServiceDefinition, BuildError> {
    let model = S::metadata()?;
    let mut configuration = ServiceConfiguration::new();
    S::initialize_service(&mut configuration);
    configuration.validate(&model)?;
    Ok(ServiceDefinition {
        model,
        configuration,
    })
}
