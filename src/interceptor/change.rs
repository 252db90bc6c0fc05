//! Change interceptor dispatch.

use super::{InterceptorRegistry, InvocationCounters, UpdateOperations, guarded};
use crate::error::ODataResult;
use crate::provider::Entity;
use log::trace;

/// Notify the change interceptors of the entity's set about `operation`.
///
/// Each matching interceptor runs exactly once. The first failure stops
/// dispatch and is returned unchanged.
pub fn notify_change(
    interceptors: &InterceptorRegistry,
    entity: &Entity,
    operation: UpdateOperations,
    counters: &mut InvocationCounters,
) -> ODataResult<()> {
    let set = entity.set_name();
    for registration in interceptors.change_interceptors(set) {
        if !registration.operations.intersects(operation) {
            continue;
        }
        trace!("Invoking change interceptor for '{}' ({:?})", set, operation);
        counters.record_change(set);
        guarded("change interceptor", || (registration.callback)(entity, operation))?;
    }
    Ok(())
}
