//! Named collections.
//!
//! A [`Registry`] maps caller-chosen names to live collections of any of the three kinds,
//! sharing a single namespace. Its lock is only taken to create, remove or look up a name;
//! once a handle has been obtained, operations go straight to the collection and rely on its
//! own synchronisation.
//!
//! Items, values and keys are opaque byte sequences, which the registry never interprets.

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::structures::{ConcurrentQueue, HashMap, OrSet};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap as StdHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The three kinds of collection a registry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Queue,
    OrSet,
    HashMap
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CollectionKind::Queue => "queue",
            CollectionKind::OrSet => "OR-Set",
            CollectionKind::HashMap => "hash map"
        };
        f.write_str(name)
    }
}

/// A handle to a registered collection.
#[derive(Debug, Clone)]
pub enum Collection {
    Queue(Arc<ConcurrentQueue<Bytes>>),
    OrSet(Arc<OrSet<Bytes>>),
    HashMap(Arc<HashMap<Bytes, Bytes>>)
}

impl Collection {
    pub fn kind(&self) -> CollectionKind {
        match self {
            Collection::Queue(_) => CollectionKind::Queue,
            Collection::OrSet(_) => CollectionKind::OrSet,
            Collection::HashMap(_) => CollectionKind::HashMap
        }
    }
}

/// An operation to run against a named collection through [`Registry::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Enqueue(Bytes),
    Dequeue,
    QueueSize,
    SetAdd(Bytes),
    SetRemove(Bytes),
    SetContains(Bytes),
    SetElements,
    /// Merge the OR-Set registered under the given name into the target.
    SetMerge(String),
    MapInsert(Bytes, Bytes),
    MapFind(Bytes),
    MapRemove(Bytes),
    MapSize
}

impl Operation {
    /// The kind of collection the operation applies to.
    pub fn kind(&self) -> CollectionKind {
        match self {
            Operation::Enqueue(_) | Operation::Dequeue | Operation::QueueSize => CollectionKind::Queue,
            Operation::SetAdd(_) | Operation::SetRemove(_) | Operation::SetContains(_)
                | Operation::SetElements | Operation::SetMerge(_) => CollectionKind::OrSet,
            Operation::MapInsert(..) | Operation::MapFind(_) | Operation::MapRemove(_)
                | Operation::MapSize => CollectionKind::HashMap
        }
    }
}

/// The result of a dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Bool(bool),
    Item(Option<Bytes>),
    Items(Vec<Bytes>),
    Size(usize)
}

/// A store of named collections, constructed once and shared with every call site.
///
/// Dropping the registry drops each collection as soon as no outstanding handle refers to it.
/// ```
/// use concurrent_collections::Registry;
/// let registry = Registry::new();
/// assert!(registry.create_queue("jobs", Some(2)));
/// assert!(registry.enqueue("jobs", "a"));
/// assert_eq!(registry.dequeue("jobs").as_deref(), Some(&b"a"[..]));
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    collections: RwLock<StdHashMap<String, Collection>>,
    config: RegistryConfig
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Registry {
            collections: RwLock::new(StdHashMap::new()),
            config
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn register(&self, name: &str, collection: Collection) -> Result<(), RegistryError> {
        let kind = collection.kind();
        match self.collections.write().entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(name.to_owned())),
            Entry::Vacant(entry) => {
                entry.insert(collection);
                debug!(name, %kind, "collection created");
                Ok(())
            }
        }
    }

    /// Create a queue holding at most `max_size` items. Without a bound, the configured
    /// default applies.
    pub fn try_create_queue(&self, name: &str, max_size: Option<usize>) -> Result<(), RegistryError> {
        if max_size == Some(0) {
            return Err(RegistryError::InvalidCapacity);
        }
        let max_size = max_size.or(self.config.default_queue_capacity);
        let queue = ConcurrentQueue::build(max_size, self.config.max_retired);
        self.register(name, Collection::Queue(Arc::new(queue)))
    }

    pub fn try_create_or_set(&self, name: &str, replica_id: &str) -> Result<(), RegistryError> {
        if replica_id.is_empty() {
            return Err(RegistryError::InvalidReplicaId);
        }
        self.register(name, Collection::OrSet(Arc::new(OrSet::new(replica_id))))
    }

    pub fn try_create_hash_map(&self, name: &str) -> Result<(), RegistryError> {
        let map = HashMap::build(self.config.initial_map_capacity, self.config.max_retired);
        self.register(name, Collection::HashMap(Arc::new(map)))
    }

    /// Look up the collection registered under `name`.
    pub fn get(&self, name: &str) -> Result<Collection, RegistryError> {
        self.collections.read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
    }

    pub fn queue(&self, name: &str) -> Result<Arc<ConcurrentQueue<Bytes>>, RegistryError> {
        match self.get(name)? {
            Collection::Queue(queue) => Ok(queue),
            other => Err(mismatch(name, CollectionKind::Queue, &other))
        }
    }

    pub fn or_set(&self, name: &str) -> Result<Arc<OrSet<Bytes>>, RegistryError> {
        match self.get(name)? {
            Collection::OrSet(set) => Ok(set),
            other => Err(mismatch(name, CollectionKind::OrSet, &other))
        }
    }

    pub fn hash_map(&self, name: &str) -> Result<Arc<HashMap<Bytes, Bytes>>, RegistryError> {
        match self.get(name)? {
            Collection::HashMap(map) => Ok(map),
            other => Err(mismatch(name, CollectionKind::HashMap, &other))
        }
    }

    /// Run `operation` against the collection registered under `name`.
    pub fn dispatch(&self, name: &str, operation: Operation) -> Result<Outcome, RegistryError> {
        let outcome = match operation {
            Operation::Enqueue(item) => Outcome::Bool(self.queue(name)?.enqueue(item)),
            Operation::Dequeue => Outcome::Item(self.queue(name)?.dequeue()),
            Operation::QueueSize => Outcome::Size(self.queue(name)?.size()),
            Operation::SetAdd(value) => {
                self.or_set(name)?.add(value);
                Outcome::Bool(true)
            },
            Operation::SetRemove(value) => Outcome::Bool(self.or_set(name)?.remove(&value)),
            Operation::SetContains(value) => Outcome::Bool(self.or_set(name)?.contains(&value)),
            Operation::SetElements => {
                let mut elements: Vec<Bytes> = self.or_set(name)?.elements().into_iter().collect();
                elements.sort();
                Outcome::Items(elements)
            },
            Operation::SetMerge(other) => {
                let target = self.or_set(name)?;
                let source = self.or_set(&other)?;
                target.merge(&source);
                Outcome::Bool(true)
            },
            Operation::MapInsert(key, value) => Outcome::Bool(self.hash_map(name)?.insert(key, value)),
            Operation::MapFind(key) => Outcome::Item(self.hash_map(name)?.find(&key)),
            Operation::MapRemove(key) => Outcome::Bool(self.hash_map(name)?.remove(&key)),
            Operation::MapSize => Outcome::Size(self.hash_map(name)?.size())
        };
        Ok(outcome)
    }

    /// Drop the registry's handle to `name`. Returns false if there was no such collection.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.collections.write().remove(name);
        if let Some(collection) = &removed {
            debug!(name, kind = %collection.kind(), "collection removed");
        }
        removed.is_some()
    }

    /// Drop the registry's handles to every collection.
    pub fn clear(&self) {
        let mut collections = self.collections.write();
        debug!(count = collections.len(), "registry cleared");
        collections.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    /// Every registered name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.collections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The flat surface below reports every failure (a missing name, the wrong kind of
    // collection, a duplicate or invalid creation) as false or None.

    /// Create a queue, bounded by `max_size` if given.
    pub fn create_queue(&self, name: &str, max_size: Option<usize>) -> bool {
        self.try_create_queue(name, max_size).is_ok()
    }

    pub fn enqueue(&self, name: &str, item: impl Into<Bytes>) -> bool {
        flag(self.dispatch(name, Operation::Enqueue(item.into())))
    }

    pub fn dequeue(&self, name: &str) -> Option<Bytes> {
        item(self.dispatch(name, Operation::Dequeue))
    }

    pub fn create_or_set(&self, name: &str, replica_id: &str) -> bool {
        self.try_create_or_set(name, replica_id).is_ok()
    }

    pub fn add_to_or_set(&self, name: &str, value: impl Into<Bytes>) -> bool {
        self.dispatch(name, Operation::SetAdd(value.into())).is_ok()
    }

    /// Returns true if the set exists, whether or not this replica had an entry to retract.
    pub fn remove_from_or_set(&self, name: &str, value: impl Into<Bytes>) -> bool {
        self.dispatch(name, Operation::SetRemove(value.into())).is_ok()
    }

    pub fn or_set_contains(&self, name: &str, value: impl Into<Bytes>) -> bool {
        flag(self.dispatch(name, Operation::SetContains(value.into())))
    }

    /// The members of the set, sorted, or nothing if there is no such set.
    pub fn or_set_elements(&self, name: &str) -> Vec<Bytes> {
        match self.dispatch(name, Operation::SetElements) {
            Ok(Outcome::Items(items)) => items,
            _ => Vec::new()
        }
    }

    /// Merge the set named `other_name` into the set named `name`.
    pub fn merge_or_set(&self, name: &str, other_name: &str) -> bool {
        self.dispatch(name, Operation::SetMerge(other_name.to_owned())).is_ok()
    }

    pub fn create_hash_map(&self, name: &str) -> bool {
        self.try_create_hash_map(name).is_ok()
    }

    /// Returns true only when a new key was placed.
    pub fn hash_map_insert(&self, name: &str, key: impl Into<Bytes>, value: impl Into<Bytes>) -> bool {
        flag(self.dispatch(name, Operation::MapInsert(key.into(), value.into())))
    }

    pub fn hash_map_find(&self, name: &str, key: impl Into<Bytes>) -> Option<Bytes> {
        item(self.dispatch(name, Operation::MapFind(key.into())))
    }

    pub fn hash_map_remove(&self, name: &str, key: impl Into<Bytes>) -> bool {
        flag(self.dispatch(name, Operation::MapRemove(key.into())))
    }
}

fn mismatch(name: &str, expected: CollectionKind, found: &Collection) -> RegistryError {
    RegistryError::KindMismatch {
        name: name.to_owned(),
        expected,
        found: found.kind()
    }
}

fn flag(result: Result<Outcome, RegistryError>) -> bool {
    matches!(result, Ok(Outcome::Bool(true)))
}

fn item(result: Result<Outcome, RegistryError>) -> Option<Bytes> {
    match result {
        Ok(Outcome::Item(item)) => item,
        _ => None
    }
}
