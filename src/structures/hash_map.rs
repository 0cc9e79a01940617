use crate::memory::HPBRManager;
use super::utils::atomic_markable::{self, AtomicMarkablePtr};
use super::DEFAULT_MAX_RETIRED;
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, AtomicUsize, Ordering};
use tracing::trace;

pub(crate) const MIN_CAPACITY: usize = 16;
/// The largest table a map can be created with. Tables past this size only come from growth.
pub const MAX_INITIAL_CAPACITY: usize = 1 << 20;

/// A concurrent, open-addressed HashMap with linear probing.
///
/// The table is a single power-of-two sized array of slots. A slot is claimed for a key by a
/// CAS on its key pointer, and once claimed the key pointer is never cleared. Removal sets the
/// mark bit on the slot's value pointer instead, so the probe sequence of every other key that
/// collided with it stays intact, and a lookup can stop at the first never-claimed slot.
///
/// Lookups are lock-free: the table and the value being read are protected by hazard
/// pointers, and values are cloned out rather than handed back by reference.
///
/// Once more than 75% of the slots have been claimed, the table is rebuilt with only its live
/// entries and swapped in whole. Writers hold the shared side of a resize gate while they work
/// and the rebuild holds the exclusive side, so no write can land in a table that has already
/// been copied.
pub struct HashMap<K, V>
where K: Send + Sync,
      V: Send + Sync
{
    table: AtomicPtr<Table<K, V>>,
    len: AtomicIsize,
    resize_gate: RwLock<()>,
    hasher: RandomState,
    tables: HPBRManager<Table<K, V>>,
    values: HPBRManager<ValueCell<V>>
}

// The mark bit of the value pointer needs an alignment of at least 2, whatever V is
#[repr(align(8))]
struct ValueCell<V> {
    value: V
}

struct Slot<K, V: Send> {
    key: AtomicPtr<K>,
    value: AtomicMarkablePtr<ValueCell<V>>
}

struct Table<K, V: Send> {
    slots: Box<[Slot<K, V>]>,
    mask: usize,
    claimed: AtomicUsize
}

enum Claim<'a, K, V: Send> {
    Slot(&'a Slot<K, V>),
    Full(Box<K>)
}

impl<K, V> HashMap<K, V>
where K: Eq + Hash + Clone + Send + Sync,
      V: Clone + Send + Sync
{
    /// Create a new HashMap with the default capacity of 16 slots.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::HashMap;
    /// let map: HashMap<String, u8> = HashMap::new();
    /// ```
    pub fn new() -> Self {
        Self::build(MIN_CAPACITY, DEFAULT_MAX_RETIRED)
    }

    /// Create a new HashMap with at least `capacity` slots, rounded up to a power of two and
    /// capped at [`MAX_INITIAL_CAPACITY`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(capacity, DEFAULT_MAX_RETIRED)
    }

    pub(crate) fn build(capacity: usize, max_retired: usize) -> Self {
        let capacity = capacity.clamp(MIN_CAPACITY, MAX_INITIAL_CAPACITY).next_power_of_two();
        HashMap {
            table: AtomicPtr::new(Box::into_raw(Box::new(Table::new(capacity)))),
            len: AtomicIsize::new(0),
            resize_gate: RwLock::new(()),
            hasher: RandomState::new(),
            tables: HPBRManager::new(max_retired, 1),
            values: HPBRManager::new(max_retired, 1)
        }
    }

    /// Hash a single element with the default Rust hasher initialised to a random state.
    fn hash<Q: ?Sized + Hash>(&self, key: &Q) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// The number of live keys.
    pub fn size(&self) -> usize {
        // Can dip below zero for a moment when a remove overtakes the insert it removed
        self.len.load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The number of slots in the current table.
    pub fn capacity(&self) -> usize {
        let capacity = self.protect_table().slots.len();
        self.tables.unprotect(0);
        capacity
    }

    /// Insert a new key, or replace the value of an existing one. Returns true only when the key
    /// was not present before, so the size of the map grew.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::HashMap;
    /// let map: HashMap<String, u8> = HashMap::new();
    /// assert!(map.insert("hello".to_owned(), 8));
    /// assert!(!map.insert("hello".to_owned(), 9));
    /// assert_eq!(map.find("hello"), Some(9));
    /// ```
    pub fn insert(&self, key: K, value: V) -> bool {
        let hash = self.hash(&key);
        let mut key = Box::new(key);
        let value_ptr = Box::into_raw(Box::new(ValueCell { value }));
        let mut cannot_grow = false;

        loop {
            let gate = self.resize_gate.read();
            // The gate keeps the table from being swapped out, so no hazard pointer is needed
            let table_ptr = self.table.load(Ordering::Acquire);
            let table = unsafe { &*table_ptr };
            if table.is_overloaded() && !cannot_grow {
                drop(gate);
                cannot_grow = !self.resize(table_ptr);
                continue;
            }

            match table.claim(hash, key) {
                Claim::Slot(slot) => {
                    let added = slot.replace_value(value_ptr, &self.values);
                    if added {
                        self.len.fetch_add(1, Ordering::AcqRel);
                    }
                    return added;
                },
                Claim::Full(returned) => {
                    // Other writers filled the table after the load check
                    key = returned;
                    drop(gate);
                    if !self.resize(table_ptr) {
                        unsafe { drop(Box::from_raw(value_ptr)) };
                        return false;
                    }
                }
            }
        }
    }

    /// Retrieve a clone of the value stored for `key`, or None if the key was never inserted
    /// or has been removed.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::HashMap;
    /// let map: HashMap<String, u8> = HashMap::new();
    /// map.insert("hello".to_owned(), 8);
    /// assert_eq!(map.find("hello"), Some(8));
    /// assert_eq!(map.find("rust"), None);
    /// ```
    pub fn find<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where K: Borrow<Q>,
          Q: Eq + Hash
    {
        let hash = self.hash(key);
        let table = self.protect_table();
        let result = table.find_slot(hash, key).and_then(|slot| slot.load_value(&self.values));
        self.tables.unprotect(0);
        result
    }

    pub fn contains_key<Q: ?Sized>(&self, key: &Q) -> bool
    where K: Borrow<Q>,
          Q: Eq + Hash
    {
        let hash = self.hash(key);
        let table = self.protect_table();
        let present = table.find_slot(hash, key).map_or(false, |slot| slot.is_present());
        self.tables.unprotect(0);
        present
    }

    /// Logically delete `key`. Returns true if the key was present and not already removed.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::HashMap;
    /// let map: HashMap<String, u8> = HashMap::new();
    /// map.insert("hello".to_owned(), 8);
    /// assert!(map.remove("hello"));
    /// assert!(!map.remove("hello"));
    /// ```
    pub fn remove<Q: ?Sized>(&self, key: &Q) -> bool
    where K: Borrow<Q>,
          Q: Eq + Hash
    {
        let hash = self.hash(key);
        let _gate = self.resize_gate.read();
        let table = unsafe { &*self.table.load(Ordering::Acquire) };
        let removed = table.find_slot(hash, key).map_or(false, |slot| slot.mark_removed());
        if removed {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    fn protect_table(&self) -> &Table<K, V> {
        loop {
            let table_ptr = self.table.load(Ordering::Acquire);
            self.tables.protect(table_ptr, 0);
            if ptr::eq(table_ptr, self.table.load(Ordering::SeqCst)) {
                return unsafe { &*table_ptr };
            }
        }
    }

    /// Rebuild the table `observed` with only its live entries. Returns false if the table
    /// would need to grow past the largest possible capacity.
    fn resize(&self, observed: *mut Table<K, V>) -> bool {
        let _gate = self.resize_gate.write();
        let old_ptr = self.table.load(Ordering::Acquire);
        if !ptr::eq(old_ptr, observed) {
            // Lost the race, the table has already been rebuilt
            return true;
        }

        let old = unsafe { &*old_ptr };
        // Every writer is shut out, so the count is exact
        let live = self.size();
        let capacity = match capacity_for(live) {
            Some(capacity) => capacity,
            None => return false
        };

        let new_table: Table<K, V> = Table::new(capacity);
        for slot in old.slots.iter() {
            let key_ptr = slot.key.load(Ordering::Acquire);
            let value_ptr = slot.value.load();
            if key_ptr.is_null() || value_ptr.is_null() || atomic_markable::is_marked(value_ptr) {
                continue;
            }
            unsafe {
                let key = &*key_ptr;
                new_table.insert_unshared(self.hash(key), key.clone(), (*value_ptr).value.clone());
            }
        }
        trace!(from = old.slots.len(), to = capacity, live, "hash map table rebuilt");

        self.table.store(Box::into_raw(Box::new(new_table)), Ordering::Release);
        self.tables.retire(old_ptr, 0);
        true
    }
}

/// The smallest power of two holding `live` entries at half load.
fn capacity_for(live: usize) -> Option<usize> {
    live.checked_mul(2)?
        .checked_next_power_of_two()
        .map(|capacity| capacity.max(MIN_CAPACITY))
}

impl<K, V> Default for HashMap<K, V>
where K: Eq + Hash + Clone + Send + Sync,
      V: Clone + Send + Sync
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for HashMap<K, V>
where K: Send + Sync,
      V: Send + Sync
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HashMap")
            .field("len", &self.len)
            .field("table", &self.table)
            .finish()
    }
}

impl<K, V> Drop for HashMap<K, V>
where K: Send + Sync,
      V: Send + Sync
{
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(*self.table.get_mut())) };
    }
}

impl<K: Eq, V: Send> Table<K, V> {
    fn new(capacity: usize) -> Self {
        let slots: Vec<Slot<K, V>> = (0..capacity).map(|_| Slot::default()).collect();
        Table {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            claimed: AtomicUsize::new(0)
        }
    }

    fn is_overloaded(&self) -> bool {
        self.claimed.load(Ordering::Acquire) * 4 > self.slots.len() * 3
    }

    fn probe(&self, hash: u64) -> impl Iterator<Item = &Slot<K, V>> {
        let start = hash as usize & self.mask;
        (0..self.slots.len()).map(move |i| &self.slots[(start + i) & self.mask])
    }

    /// The slot holding `key`, scanning until the first never-claimed slot.
    fn find_slot<Q: ?Sized>(&self, hash: u64, key: &Q) -> Option<&Slot<K, V>>
    where K: Borrow<Q>,
          Q: Eq
    {
        for slot in self.probe(hash) {
            let key_ptr = slot.key.load(Ordering::Acquire);
            if key_ptr.is_null() {
                return None;
            }
            if unsafe { <K as Borrow<Q>>::borrow(&*key_ptr) } == key {
                return Some(slot);
            }
        }
        None
    }

    /// Find the slot already holding `key`, or claim the first empty one for it.
    fn claim(&self, hash: u64, key: Box<K>) -> Claim<'_, K, V> {
        let key_ptr = Box::into_raw(key);
        for slot in self.probe(hash) {
            let mut current = slot.key.load(Ordering::Acquire);
            if current.is_null() {
                match slot.key.compare_exchange(ptr::null_mut(), key_ptr, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        self.claimed.fetch_add(1, Ordering::AcqRel);
                        return Claim::Slot(slot);
                    },
                    Err(actual) => current = actual
                }
            }
            unsafe {
                if *current == *key_ptr {
                    drop(Box::from_raw(key_ptr));
                    return Claim::Slot(slot);
                }
            }
        }
        Claim::Full(unsafe { Box::from_raw(key_ptr) })
    }

    /// Insert into a table no other thread can see yet.
    fn insert_unshared(&self, hash: u64, key: K, value: V) {
        for slot in self.probe(hash) {
            if slot.key.load(Ordering::Relaxed).is_null() {
                slot.key.store(Box::into_raw(Box::new(key)), Ordering::Relaxed);
                slot.value.store(Box::into_raw(Box::new(ValueCell { value })));
                self.claimed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        unreachable!("a rebuilt table always has room for the live entries");
    }
}

impl<K, V: Send> Slot<K, V> {
    fn is_present(&self) -> bool {
        let current = self.value.load();
        !current.is_null() && !atomic_markable::is_marked(current)
    }

    /// Swap in a new value. Returns true if the key was absent, either never published or removed.
    fn replace_value(&self, new: *mut ValueCell<V>, manager: &HPBRManager<ValueCell<V>>) -> bool {
        loop {
            let current = self.value.load();
            if self.value.compare_exchange(current, new).is_ok() {
                let old = atomic_markable::unmark(current);
                if !old.is_null() {
                    manager.retire(old, 0);
                }
                return old.is_null() || atomic_markable::is_marked(current);
            }
        }
    }

    fn mark_removed(&self) -> bool {
        loop {
            let current = self.value.load();
            if current.is_null() || atomic_markable::is_marked(current) {
                return false;
            }
            if self.value.compare_and_mark(current).is_ok() {
                return true;
            }
        }
    }

    fn load_value(&self, manager: &HPBRManager<ValueCell<V>>) -> Option<V>
    where V: Clone
    {
        loop {
            let current = self.value.load();
            if current.is_null() || atomic_markable::is_marked(current) {
                return None;
            }
            manager.protect(current, 0);
            if self.value.load() != current {
                continue;
            }
            let value = unsafe { (*current).value.clone() };
            manager.unprotect(0);
            return Some(value);
        }
    }
}

impl<K, V: Send> Default for Slot<K, V> {
    fn default() -> Self {
        Slot {
            key: AtomicPtr::default(),
            value: AtomicMarkablePtr::default()
        }
    }
}

impl<K, V: Send> Drop for Slot<K, V> {
    fn drop(&mut self) {
        let key = *self.key.get_mut();
        if !key.is_null() {
            unsafe { drop(Box::from_raw(key)) };
        }
    }
}
