//! Lazily evaluated, interceptor-filtered queries.

use super::{EntityPredicate, InterceptorRegistry, InvocationCounters, guarded};
use crate::error::ODataResult;
use crate::provider::{Entity, EntityKey, UpdateProvider};
use log::trace;

/// Where the entities of a query come from.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    /// Every entity of the set
    Set,
    /// Entities related to one parent entity
    Related {
        parent_set: String,
        parent_key: EntityKey,
        navigation: String,
    },
}

/// A query over one entity set with its interceptor predicates.
///
/// Composing a plan invokes the set's query interceptors. Their predicates
/// are held unevaluated until the plan is executed.
pub struct QueryPlan {
    set: String,
    source: QuerySource,
    predicates: Vec<EntityPredicate>,
}

impl QueryPlan {
    /// Compose a plan, invoking each query interceptor of `set` once.
    pub fn compose(
        set: &str,
        source: QuerySource,
        interceptors: &InterceptorRegistry,
        counters: &mut InvocationCounters,
    ) -> ODataResult<Self> {
        let mut predicates = Vec::new();
        for interceptor in interceptors.query_interceptors(set) {
            trace!("Invoking query interceptor for '{}'", set);
            counters.record_query(set);
            predicates.push(guarded("query interceptor", || interceptor())?);
        }
        Ok(Self {
            set: set.to_string(),
            source,
            predicates,
        })
    }

    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn source(&self) -> &QuerySource {
        &self.source
    }

    /// Enumerate the source and keep entities passing every predicate.
    pub fn execute(
        &self,
        provider: &mut dyn UpdateProvider,
        counters: &mut InvocationCounters,
    ) -> ODataResult<Vec<Entity>> {
        let candidates = match &self.source {
            QuerySource::Set => provider.enumerate(&self.set)?,
            QuerySource::Related {
                parent_set,
                parent_key,
                navigation,
            } => {
                let mut related = Vec::new();
                for key in provider.related(parent_set, parent_key, navigation)? {
                    if let Some(entity) = provider.get(&self.set, &key)? {
                        related.push(entity);
                    }
                }
                related
            }
        };

        self.filter(candidates, counters)
    }

    /// Keep the entities passing every predicate of the plan.
    pub fn filter(
        &self,
        entities: Vec<Entity>,
        counters: &mut InvocationCounters,
    ) -> ODataResult<Vec<Entity>> {
        let mut result = Vec::with_capacity(entities.len());
        for entity in entities {
            if self.accepts(&entity, counters)? {
                result.push(entity);
            }
        }
        Ok(result)
    }

    /// Look up one entity by key within the plan.
    pub fn find(
        &self,
        provider: &mut dyn UpdateProvider,
        key: &EntityKey,
        counters: &mut InvocationCounters,
    ) -> ODataResult<Option<Entity>> {
        if let QuerySource::Related {
            parent_set,
            parent_key,
            navigation,
        } = &self.source
        {
            let related = provider.related(parent_set, parent_key, navigation)?;
            if !related.contains(key) {
                return Ok(None);
            }
        }
        match provider.get(&self.set, key)? {
            Some(entity) if self.accepts(&entity, counters)? => Ok(Some(entity)),
            _ => Ok(None),
        }
    }

    /// The single entity of a single-valued source, if any.
    pub fn single(
        &self,
        provider: &mut dyn UpdateProvider,
        counters: &mut InvocationCounters,
    ) -> ODataResult<Option<Entity>> {
        Ok(self.execute(provider, counters)?.into_iter().next())
    }

    fn accepts(&self, entity: &Entity, counters: &mut InvocationCounters) -> ODataResult<bool> {
        for predicate in &self.predicates {
            counters.record_predicate(&self.set);
            if !guarded("query interceptor predicate", || predicate(entity))? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlan")
            .field("set", &self.set)
            .field("source", &self.source)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}
