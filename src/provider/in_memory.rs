//! In-memory data source.
//!
//! Committed data lives behind an `Arc<RwLock<..>>` shared by every session
//! created from the same [`InMemoryDataSource`]. A session copies the
//! committed state on its first write and works on that copy until
//! `save_changes` publishes it or `clear_changes` drops it.
//!
//! # Performance Characteristics
//!
//! * GET by key: O(n) in the size of the set
//! * first write of a session: O(total entities) for the working copy
//! * intended for tests, demos and small services

use super::{Entity, EntityKey, UpdateProvider};
use crate::error::{ODataError, ODataResult};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredEntity {
    key_text: String,
    entity: Entity,
    // navigation -> (target set, target key)
    links: HashMap<String, Vec<(String, EntityKey)>>,
}

#[derive(Debug, Clone, Default)]
struct Store {
    // set -> entities in insertion order
    sets: HashMap<String, Vec<StoredEntity>>,
}

impl Store {
    fn find(&self, set: &str, key: &EntityKey) -> Option<&StoredEntity> {
        let key_text = key.to_predicate();
        self.sets
            .get(set)
            .and_then(|entities| entities.iter().find(|e| e.key_text == key_text))
    }

    fn find_mut(&mut self, set: &str, key: &EntityKey) -> Option<&mut StoredEntity> {
        let key_text = key.to_predicate();
        self.sets
            .get_mut(set)
            .and_then(|entities| entities.iter_mut().find(|e| e.key_text == key_text))
    }

    fn require_mut(&mut self, set: &str, key: &EntityKey) -> ODataResult<&mut StoredEntity> {
        self.find_mut(set, key).ok_or_else(|| {
            ODataError::not_found(format!("Resource not found for the segment '{}{}'", set, key))
        })
    }
}

/// Thread-safe in-memory implementation of [`UpdateProvider`].
///
/// Cloning shares the committed data; each clone is an independent session.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    committed: Arc<RwLock<Store>>,
    pending: Option<Store>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new session over the same committed data with nothing staged.
    pub fn session(&self) -> Self {
        Self {
            committed: Arc::clone(&self.committed),
            pending: None,
        }
    }

    /// Whether this session holds uncommitted changes.
    pub fn has_pending_changes(&self) -> bool {
        self.pending.is_some()
    }

    /// Statistics over committed data.
    pub fn stats(&self) -> InMemoryDataSourceStats {
        let store = self.committed.read();
        let mut stats = InMemoryDataSourceStats::default();
        for entities in store.sets.values() {
            stats.set_count += 1;
            stats.entity_count += entities.len();
            stats.link_count += entities
                .iter()
                .map(|e| e.links.values().map(Vec::len).sum::<usize>())
                .sum::<usize>();
        }
        stats
    }

    fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        match &self.pending {
            Some(store) => f(store),
            None => f(&self.committed.read()),
        }
    }

    fn write(&mut self) -> &mut Store {
        let committed = &self.committed;
        self.pending.get_or_insert_with(|| committed.read().clone())
    }
}

impl UpdateProvider for InMemoryDataSource {
    fn enumerate(&mut self, set: &str) -> ODataResult<Vec<Entity>> {
        Ok(self.read(|store| {
            store
                .sets
                .get(set)
                .map(|entities| entities.iter().map(|e| e.entity.clone()).collect())
                .unwrap_or_default()
        }))
    }

    fn get(&mut self, set: &str, key: &EntityKey) -> ODataResult<Option<Entity>> {
        Ok(self.read(|store| store.find(set, key).map(|e| e.entity.clone())))
    }

    fn create(&mut self, entity: Entity, key: EntityKey) -> ODataResult<()> {
        let set = entity.set_name().to_string();
        let store = self.write();
        if store.find(&set, &key).is_some() {
            return Err(ODataError::service(
                409,
                format!("An entity with key {} already exists in '{}'", key, set),
            ));
        }
        debug!("Staging create {}{}", set, key);
        store.sets.entry(set).or_default().push(StoredEntity {
            key_text: key.to_predicate(),
            entity,
            links: HashMap::new(),
        });
        Ok(())
    }

    fn update(&mut self, key: &EntityKey, entity: Entity) -> ODataResult<()> {
        let set = entity.set_name().to_string();
        let stored = self.write().require_mut(&set, key)?;
        debug!("Staging update {}{}", set, key);
        stored.entity = entity;
        Ok(())
    }

    fn delete(&mut self, set: &str, key: &EntityKey) -> ODataResult<()> {
        let store = self.write();
        let key_text = key.to_predicate();
        let entities = store.sets.get_mut(set).ok_or_else(|| {
            ODataError::not_found(format!("Resource not found for the segment '{}{}'", set, key))
        })?;
        let before = entities.len();
        entities.retain(|e| e.key_text != key_text);
        if entities.len() == before {
            return Err(ODataError::not_found(format!(
                "Resource not found for the segment '{}{}'",
                set, key
            )));
        }
        for stored in store.sets.values_mut().flat_map(|entities| entities.iter_mut()) {
            for targets in stored.links.values_mut() {
                targets.retain(|(target_set, target)| {
                    target_set.as_str() != set || target.to_predicate() != key_text
                });
            }
        }
        debug!("Staging delete {}{}", set, key);
        Ok(())
    }

    fn related(
        &mut self,
        set: &str,
        key: &EntityKey,
        navigation: &str,
    ) -> ODataResult<Vec<EntityKey>> {
        self.read(|store| {
            let stored = store.find(set, key).ok_or_else(|| {
                ODataError::not_found(format!(
                    "Resource not found for the segment '{}{}'",
                    set, key
                ))
            })?;
            Ok(stored
                .links
                .get(navigation)
                .map(|targets| targets.iter().map(|(_, k)| k.clone()).collect())
                .unwrap_or_default())
        })
    }

    fn add_link(
        &mut self,
        set: &str,
        key: &EntityKey,
        navigation: &str,
        target_set: &str,
        target: &EntityKey,
    ) -> ODataResult<()> {
        let stored = self.write().require_mut(set, key)?;
        let targets = stored.links.entry(navigation.to_string()).or_default();
        let target_text = target.to_predicate();
        if !targets.iter().any(|(_, k)| k.to_predicate() == target_text) {
            targets.push((target_set.to_string(), target.clone()));
        }
        Ok(())
    }

    fn remove_link(
        &mut self,
        set: &str,
        key: &EntityKey,
        navigation: &str,
        target: &EntityKey,
    ) -> ODataResult<()> {
        let stored = self.write().require_mut(set, key)?;
        let target_text = target.to_predicate();
        let targets = stored.links.entry(navigation.to_string()).or_default();
        let before = targets.len();
        targets.retain(|(_, k)| k.to_predicate() != target_text);
        if targets.len() == before {
            return Err(ODataError::not_found(format!(
                "No link from {}{} through '{}' to {}",
                set, key, navigation, target
            )));
        }
        Ok(())
    }

    fn clear_links(&mut self, set: &str, key: &EntityKey, navigation: &str) -> ODataResult<()> {
        let stored = self.write().require_mut(set, key)?;
        stored.links.remove(navigation);
        Ok(())
    }

    fn save_changes(&mut self) -> ODataResult<()> {
        if let Some(store) = self.pending.take() {
            *self.committed.write() = store;
            debug!("Committed staged changes");
        }
        Ok(())
    }

    fn clear_changes(&mut self) {
        if self.pending.take().is_some() {
            debug!("Discarded staged changes");
        }
    }
}

/// Statistics about committed in-memory data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryDataSourceStats {
    /// Number of sets holding at least one entity at some point
    pub set_count: usize,
    pub entity_count: usize,
    pub link_count: usize,
}
