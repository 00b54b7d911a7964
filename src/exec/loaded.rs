// Loaded Values Collector
//
// Records the entities and collections a select materialized at the paths
// chosen for locking, so follow-on locking can lock exactly those rows
// once the select completes.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::mapping::entity::{CollectionDescriptor, CollectionKey, EntityDescriptor, EntityKey};

/// Path of a result or fetch within a query's result graph, e.g. `User`
/// for a root and `User.roles` for a fetched collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NavigablePath {
    full_path: String,
}

impl NavigablePath {
    pub fn root(name: impl Into<String>) -> Self {
        Self { full_path: name.into() }
    }

    pub fn append(&self, part: &str) -> Self {
        Self {
            full_path: format!("{}.{}", self.full_path, part),
        }
    }

    pub fn parent(&self) -> Option<NavigablePath> {
        self.full_path.rfind('.').map(|dot| NavigablePath {
            full_path: self.full_path[..dot].to_string(),
        })
    }

    pub fn is_root(&self) -> bool {
        !self.full_path.contains('.')
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }
}

impl fmt::Display for NavigablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path)
    }
}

/// An entity loaded at a locked path
#[derive(Debug, Clone)]
pub struct LoadedEntityRegistration {
    pub path: NavigablePath,
    pub descriptor: Arc<EntityDescriptor>,
    pub key: EntityKey,
}

/// A collection loaded at a locked path
#[derive(Debug, Clone)]
pub struct LoadedCollectionRegistration {
    pub path: NavigablePath,
    pub descriptor: Arc<CollectionDescriptor>,
    pub key: CollectionKey,
}

#[derive(Debug, Default)]
struct Collected {
    root_entities: Vec<LoadedEntityRegistration>,
    non_root_entities: Vec<LoadedEntityRegistration>,
    collections: Vec<LoadedCollectionRegistration>,
    seen_entities: HashSet<(NavigablePath, EntityKey)>,
    seen_collections: HashSet<CollectionKey>,
}

/// Per-select record of loaded values at the paths to lock
#[derive(Debug)]
pub struct LoadedValuesCollector {
    paths_to_lock: HashSet<NavigablePath>,
    collected: RefCell<Collected>,
}

impl LoadedValuesCollector {
    pub fn new(paths_to_lock: impl IntoIterator<Item = NavigablePath>) -> Self {
        Self {
            paths_to_lock: paths_to_lock.into_iter().collect(),
            collected: RefCell::new(Collected::default()),
        }
    }

    pub fn applies_to(&self, path: &NavigablePath) -> bool {
        self.paths_to_lock.contains(path)
    }

    /// Record an entity loaded at `path`. Entities at paths not chosen for
    /// locking and repeated registrations are ignored.
    pub fn register_entity(&self, path: &NavigablePath, descriptor: &Arc<EntityDescriptor>, key: &EntityKey) {
        if !self.applies_to(path) {
            return;
        }
        let mut collected = self.collected.borrow_mut();
        if !collected.seen_entities.insert((path.clone(), key.clone())) {
            return;
        }
        let registration = LoadedEntityRegistration {
            path: path.clone(),
            descriptor: descriptor.clone(),
            key: key.clone(),
        };
        if path.is_root() {
            collected.root_entities.push(registration);
        } else {
            collected.non_root_entities.push(registration);
        }
    }

    pub fn register_collection(&self, path: &NavigablePath, descriptor: &Arc<CollectionDescriptor>, key: &CollectionKey) {
        if !self.applies_to(path) {
            return;
        }
        let mut collected = self.collected.borrow_mut();
        if !collected.seen_collections.insert(key.clone()) {
            return;
        }
        collected.collections.push(LoadedCollectionRegistration {
            path: path.clone(),
            descriptor: descriptor.clone(),
            key: key.clone(),
        });
    }

    pub fn collected_root_entities(&self) -> Vec<LoadedEntityRegistration> {
        self.collected.borrow().root_entities.clone()
    }

    pub fn collected_non_root_entities(&self) -> Vec<LoadedEntityRegistration> {
        self.collected.borrow().non_root_entities.clone()
    }

    pub fn collected_collections(&self) -> Vec<LoadedCollectionRegistration> {
        self.collected.borrow().collections.clone()
    }

    pub fn is_empty(&self) -> bool {
        let collected = self.collected.borrow();
        collected.root_entities.is_empty() && collected.non_root_entities.is_empty() && collected.collections.is_empty()
    }

    pub fn clear(&self) {
        *self.collected.borrow_mut() = Collected::default();
    }
}
