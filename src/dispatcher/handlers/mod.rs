//! Request handlers.
//!
//! Every handler receives the resolved request and the shared [`Dispatch`]
//! state. Entities are always read through [`QueryPlan`]s, so the query
//! interceptors of every set a path touches are applied; entities an
//! interceptor hides are reported as not found.

pub mod links;
pub mod operation;
pub mod property;
pub mod read;
pub mod write;

use super::core::Dispatch;
use super::payload;
use crate::config::{EntitySetRights, ServiceOperationRights};
use crate::error::{ODataError, ODataResult};
use crate::interceptor::{QueryPlan, QuerySource};
use crate::metadata::NavigationTarget;
use crate::provider::{Entity, EntityKey};
use crate::service::{ResultKind, ServiceConfiguration};
use crate::uri::{Addressed, PathSegment, ResourcePath, SegmentKind};
use http::Method;
use serde_json::{Map, Value};

/// An entity loaded through a query plan.
#[derive(Debug, Clone)]
pub(crate) struct Located {
    pub set: String,
    pub key: EntityKey,
    pub entity: Entity,
}

/// What the entity part of a path ends in.
pub(crate) enum Target {
    Collection(QueryPlan),
    Single(Located),
    /// Not queried; `key` is set when the path carries one
    Unloaded { set: String, key: Option<EntityKey> },
}

/// Result of walking the entity segments of a path.
pub(crate) struct Walk {
    /// Entity the last navigation starts from
    pub parent: Option<Located>,
    /// Navigation property of the target, if reached by navigation
    pub navigation: Option<String>,
    pub target: Target,
}

/// Number of leading segments that address entities.
pub(crate) fn entity_end(path: &ResourcePath) -> usize {
    path.segments
        .iter()
        .take_while(|s| {
            matches!(
                s.kind,
                SegmentKind::EntitySet | SegmentKind::Key | SegmentKind::Navigation
            )
        })
        .count()
}

/// Load the entities the path passes through.
///
/// Every intermediate entity is found through a plan composed for its set,
/// so hidden parents make the whole path not found. The target is planned
/// (and loaded when single) only when `load_target` is set.
pub(crate) fn walk(d: &mut Dispatch, path: &ResourcePath, load_target: bool) -> ODataResult<Walk> {
    let segments = &path.segments[..entity_end(path)];

    // (entity segment, key segment)
    let mut groups: Vec<(&PathSegment, Option<&PathSegment>)> = Vec::new();
    let mut index = 0;
    while index < segments.len() {
        match segments.get(index + 1).filter(|s| s.kind == SegmentKind::Key) {
            Some(key) => {
                groups.push((&segments[index], Some(key)));
                index += 2;
            }
            None => {
                groups.push((&segments[index], None));
                index += 1;
            }
        }
    }

    let last = groups.len().checked_sub(1).ok_or_else(|| {
        ODataError::internal_message("path walk started on a path without entity segments")
    })?;
    let interceptors = d.configuration().interceptors();
    let mut parent: Option<Located> = None;

    for (position, (segment, key_segment)) in groups.into_iter().enumerate() {
        let set = segment
            .addressed
            .set_name()
            .ok_or_else(|| ODataError::internal_message("entity segment without a set"))?
            .to_string();
        let key = key_segment.and_then(|s| s.key.clone());
        let source = match segment.kind {
            SegmentKind::Navigation => {
                let from = parent.as_ref().ok_or_else(|| {
                    ODataError::internal_message("navigation segment without a parent")
                })?;
                QuerySource::Related {
                    parent_set: from.set.clone(),
                    parent_key: from.key.clone(),
                    navigation: segment.identifier.clone(),
                }
            }
            _ => QuerySource::Set,
        };
        let display = match key_segment {
            Some(k) => format!("{}({})", segment.identifier, k.identifier),
            None => segment.identifier.clone(),
        };

        if position == last {
            let navigation =
                (segment.kind == SegmentKind::Navigation).then(|| segment.identifier.clone());
            if !load_target {
                return Ok(Walk {
                    parent,
                    navigation,
                    target: Target::Unloaded { set, key },
                });
            }
            let plan = QueryPlan::compose(&set, source, interceptors, &mut d.context.counters)?;
            let target = match key {
                Some(key) => Target::Single(locate(d, &plan, key, &display)?),
                None if matches!(segment.addressed, Addressed::Entities { .. }) => {
                    Target::Collection(plan)
                }
                None => Target::Single(locate_single(d, &plan, &display)?),
            };
            return Ok(Walk {
                parent,
                navigation,
                target,
            });
        }

        let plan = QueryPlan::compose(&set, source, interceptors, &mut d.context.counters)?;
        parent = Some(match key {
            Some(key) => locate(d, &plan, key, &display)?,
            None => locate_single(d, &plan, &display)?,
        });
    }

    Err(ODataError::internal_message("path walk ended without a target"))
}

fn not_found(display: &str) -> ODataError {
    ODataError::not_found(format!("Resource not found for the segment '{}'.", display))
}

fn locate(d: &mut Dispatch, plan: &QueryPlan, key: EntityKey, display: &str) -> ODataResult<Located> {
    let entity = plan
        .find(&mut *d.provider, &key, &mut d.context.counters)?
        .ok_or_else(|| not_found(display))?;
    Ok(Located {
        set: plan.set().to_string(),
        key,
        entity,
    })
}

fn locate_single(d: &mut Dispatch, plan: &QueryPlan, display: &str) -> ODataResult<Located> {
    let entity = plan
        .single(&mut *d.provider, &mut d.context.counters)?
        .ok_or_else(|| not_found(display))?;
    let key = entity.key(d.model())?;
    Ok(Located {
        set: plan.set().to_string(),
        key,
        entity,
    })
}

/// Check the access rights the request needs.
pub(crate) fn authorize(
    configuration: &ServiceConfiguration,
    path: &ResourcePath,
    method: &Method,
) -> ODataResult<()> {
    match path.first_kind() {
        None | Some(SegmentKind::Metadata) | Some(SegmentKind::Batch) => return Ok(()),
        Some(SegmentKind::ServiceOperation) => return authorize_operation(configuration, path),
        _ => {}
    }

    let end = entity_end(path);
    let segments = &path.segments[..end];
    let Some(target) = segments.last() else {
        return Ok(());
    };

    for segment in &segments[..end - 1] {
        if matches!(segment.addressed, Addressed::Entity { .. }) {
            require(configuration, &segment.addressed, EntitySetRights::READ_SINGLE)?;
        }
    }

    let is_collection = matches!(target.addressed, Addressed::Entities { .. });
    let is_property = path
        .segments
        .get(end)
        .is_some_and(|s| s.kind == SegmentKind::Property);

    if path.marker() == Some(SegmentKind::Ref) && *method != Method::GET {
        // link changes modify the entity the navigation starts from
        let navigation_index = if target.kind == SegmentKind::Key {
            end.saturating_sub(2)
        } else {
            end - 1
        };
        return match navigation_index.checked_sub(1).and_then(|i| segments.get(i)) {
            Some(source) => require(configuration, &source.addressed, EntitySetRights::WRITE_MERGE),
            None => Ok(()),
        };
    }

    let required = match *method {
        Method::GET if is_collection => EntitySetRights::READ_MULTIPLE,
        Method::GET => EntitySetRights::READ_SINGLE,
        Method::POST => EntitySetRights::WRITE_APPEND,
        Method::PUT => EntitySetRights::WRITE_REPLACE,
        Method::PATCH => EntitySetRights::WRITE_MERGE,
        Method::DELETE if is_property => EntitySetRights::WRITE_REPLACE,
        Method::DELETE => EntitySetRights::WRITE_DELETE,
        _ => return Ok(()),
    };
    require(configuration, &target.addressed, required)
}

fn require(
    configuration: &ServiceConfiguration,
    addressed: &Addressed,
    required: EntitySetRights,
) -> ODataResult<()> {
    match addressed.set_name() {
        Some(set) => require_set(configuration, set, required),
        None => Ok(()),
    }
}

pub(crate) fn require_set(
    configuration: &ServiceConfiguration,
    set: &str,
    required: EntitySetRights,
) -> ODataResult<()> {
    if configuration.entity_set_rights(set).contains(required) {
        Ok(())
    } else {
        Err(ODataError::forbidden(format!(
            "Access to the resource set '{}' is forbidden for this operation.",
            set
        )))
    }
}

fn authorize_operation(configuration: &ServiceConfiguration, path: &ResourcePath) -> ODataResult<()> {
    let Some(segment) = path.segments.first() else {
        return Ok(());
    };
    let name = segment.identifier.as_str();
    let operation = configuration.service_operation(name).ok_or_else(|| {
        ODataError::not_found(format!("Resource not found for the segment '{}'.", name))
    })?;
    let rights = configuration.service_operation_rights(name);

    let (operation_right, set_right) = match (&operation.result, path.marker()) {
        (ResultKind::Entities(_), _) | (_, Some(SegmentKind::Count)) => (
            ServiceOperationRights::READ_MULTIPLE,
            EntitySetRights::READ_MULTIPLE,
        ),
        (ResultKind::Entity(_), _) => (
            ServiceOperationRights::READ_SINGLE,
            EntitySetRights::READ_SINGLE,
        ),
        _ => return Ok(()),
    };
    if !rights.contains(operation_right) {
        return Err(ODataError::forbidden(format!(
            "Access to the service operation '{}' is forbidden for this request.",
            name
        )));
    }
    match operation.result.set_name() {
        Some(set) if !rights.overrides_entity_set_rights() => {
            require_set(configuration, set, set_right)
        }
        _ => Ok(()),
    }
}

/// Navigation properties to expand, each with a plan over its target set.
pub(crate) struct Expansion {
    pub navigation: String,
    pub target: NavigationTarget,
    pub plan: QueryPlan,
}

/// Plan the `$expand` of entities of `type_name`.
///
/// Expanded sets need read rights like any other read.
pub(crate) fn plan_expansions(
    d: &mut Dispatch,
    type_name: &str,
    expand: &[String],
) -> ODataResult<Vec<Expansion>> {
    let configuration = d.configuration();
    let mut expansions = Vec::new();
    for (navigation, target) in payload::expand_targets(d.model(), type_name, expand)? {
        let right = if target.multiplicity.is_collection() {
            EntitySetRights::READ_MULTIPLE
        } else {
            EntitySetRights::READ_SINGLE
        };
        require_set(configuration, &target.target_set, right)?;
        let plan = QueryPlan::compose(
            &target.target_set,
            QuerySource::Set,
            configuration.interceptors(),
            &mut d.context.counters,
        )?;
        expansions.push(Expansion {
            navigation,
            target,
            plan,
        });
    }
    Ok(expansions)
}

/// Write an entity with its expanded navigation properties.
pub(crate) fn expanded_entity_json(
    d: &mut Dispatch,
    entity: &Entity,
    select: Option<&[String]>,
    expansions: &[Expansion],
) -> ODataResult<Map<String, Value>> {
    let model = d.model();
    let mut object = payload::entity_json(model, &d.service_root, entity, select)?;
    if expansions.is_empty() {
        return Ok(object);
    }
    let key = entity.key(model)?;
    for expansion in expansions {
        let related_keys = d
            .provider
            .related(entity.set_name(), &key, &expansion.navigation)?;
        let mut related = Vec::new();
        for related_key in &related_keys {
            if let Some(found) =
                expansion
                    .plan
                    .find(&mut *d.provider, related_key, &mut d.context.counters)?
            {
                related.push(Value::Object(payload::entity_json(
                    model,
                    &d.service_root,
                    &found,
                    None,
                )?));
            }
        }
        let value = if expansion.target.multiplicity.is_collection() {
            Value::Array(related)
        } else {
            related.into_iter().next().unwrap_or(Value::Null)
        };
        object.insert(expansion.navigation.clone(), value);
    }
    Ok(object)
}

/// Apply `$skip` then `$top`.
pub(crate) fn page(entities: Vec<Entity>, skip: Option<usize>, top: Option<usize>) -> Vec<Entity> {
    entities
        .into_iter()
        .skip(skip.unwrap_or(0))
        .take(top.unwrap_or(usize::MAX))
        .collect()
}
