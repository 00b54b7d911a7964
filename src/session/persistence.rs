// Persistence Context
//
// Identity maps for the entities and collections a session has loaded,
// plus the default read-only policy applied to newly loaded entities.

use std::collections::HashMap;
use std::sync::Arc;

use crate::mapping::entity::{CollectionInstance, CollectionKey, EntityInstance, EntityKey};

/// Entities and collections loaded by one session
#[derive(Debug, Default)]
pub struct PersistenceContext {
    entities: HashMap<EntityKey, Arc<EntityInstance>>,
    collections: HashMap<CollectionKey, Arc<CollectionInstance>>,
    default_read_only: bool,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_entity(&self, key: &EntityKey) -> Option<Arc<EntityInstance>> {
        self.entities.get(key).cloned()
    }

    /// Register a loaded entity, returning the instance already registered
    /// under the same key if there is one
    pub fn add_entity(&mut self, entity: Arc<EntityInstance>) -> Arc<EntityInstance> {
        self.entities.entry(entity.key()).or_insert(entity).clone()
    }

    pub fn contains_entity(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn get_collection(&self, key: &CollectionKey) -> Option<Arc<CollectionInstance>> {
        self.collections.get(key).cloned()
    }

    pub fn add_collection(&mut self, collection: Arc<CollectionInstance>) -> Arc<CollectionInstance> {
        self.collections
            .entry(collection.key().clone())
            .or_insert(collection)
            .clone()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    pub fn is_default_read_only(&self) -> bool {
        self.default_read_only
    }

    pub fn set_default_read_only(&mut self, read_only: bool) {
        self.default_read_only = read_only;
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.collections.clear();
    }
}
