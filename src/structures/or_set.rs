use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::ptr;

/// An observed-remove set (OR-Set) CRDT, following the OR-Set of [A comprehensive study of
/// Convergent and Commutative Replicated Data Types](https://hal.inria.fr/inria-00555588).
///
/// Every `add` appends a history entry tagged with this replica's id and the next tick of
/// its logical clock. Entries are never deleted, only flagged as removed, and a value is a
/// member while any of its entries is unremoved. Instances converge through `merge`, which
/// is commutative, associative and idempotent.
///
/// Unlike the textbook OR-Set, `remove` only retracts entries that this replica authored
/// itself. Entries learned from other replicas through `merge` can only be removed by
/// their author.
///
/// All operations go through a single reader/writer lock, so the set is safe to share
/// between threads but is not lock-free.
pub struct OrSet<V> {
    replica_id: String,
    inner: RwLock<History<V>>
}

#[derive(Clone, Debug)]
struct History<V> {
    entries: HashMap<V, Vec<Entry>>,
    clock: u64
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    timestamp: u64,
    replica_id: String,
    removed: bool
}

impl Entry {
    fn same_tag(&self, other: &Entry) -> bool {
        self.timestamp == other.timestamp && self.replica_id == other.replica_id
    }
}

impl<V: Eq + Hash + Clone> OrSet<V> {
    /// Create an empty set for the given replica. Replica ids must be distinct between
    /// instances that will ever be merged.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::OrSet;
    /// let set: OrSet<String> = OrSet::new("replica-1");
    /// set.add("hello".to_owned());
    /// assert!(set.contains(&"hello".to_owned()));
    /// ```
    pub fn new<S: Into<String>>(replica_id: S) -> Self {
        OrSet {
            replica_id: replica_id.into(),
            inner: RwLock::new(History {
                entries: HashMap::new(),
                clock: 0
            })
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// The current value of this replica's logical clock.
    pub fn clock(&self) -> u64 {
        self.inner.read().clock
    }

    /// Append a new, unremoved history entry for `value`.
    pub fn add(&self, value: V) {
        let mut history = self.inner.write();
        history.clock += 1;
        let entry = Entry {
            timestamp: history.clock,
            replica_id: self.replica_id.clone(),
            removed: false
        };
        history.entries.entry(value).or_default().push(entry);
    }

    /// Mark the first unremoved entry for `value` authored by this replica as removed.
    /// Returns false, changing nothing, if there is no such entry.
    pub fn remove(&self, value: &V) -> bool {
        let mut history = self.inner.write();
        let own = history.entries.get_mut(value).and_then(|entries| {
            entries.iter_mut().find(|entry| !entry.removed && entry.replica_id == self.replica_id)
        });
        match own {
            Some(entry) => {
                entry.removed = true;
                true
            },
            None => false
        }
    }

    pub fn contains(&self, value: &V) -> bool {
        self.inner.read().entries.get(value).map_or(false, |entries| Self::is_live(entries))
    }

    /// Every value which is currently a member.
    pub fn elements(&self) -> HashSet<V> {
        self.inner.read().entries.iter()
            .filter(|(_, entries)| Self::is_live(entries))
            .map(|(value, _)| value.clone())
            .collect()
    }

    /// The number of values which are currently members.
    pub fn len(&self) -> usize {
        self.inner.read().entries.values().filter(|entries| Self::is_live(entries)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of history entries, tombstones included. This never decreases.
    pub fn history_len(&self) -> usize {
        self.inner.read().entries.values().map(Vec::len).sum()
    }

    /// Fold the full history of `other` into this set. Entries only `other` has are copied,
    /// entries both have stay removed if either has removed them, and the logical clock
    /// moves to the larger of the two.
    pub fn merge(&self, other: &OrSet<V>) {
        if ptr::eq(self, other) {
            return;
        }
        // Never hold both locks, so two sets merging into each other cannot deadlock
        let snapshot = other.inner.read().clone();

        let mut history = self.inner.write();
        for (value, their_entries) in snapshot.entries {
            let our_entries = history.entries.entry(value).or_default();
            for theirs in their_entries {
                match our_entries.iter().position(|ours| ours.same_tag(&theirs)) {
                    Some(index) => our_entries[index].removed |= theirs.removed,
                    None => our_entries.push(theirs)
                }
            }
        }
        history.clock = history.clock.max(snapshot.clock);
    }

    fn is_live(entries: &[Entry]) -> bool {
        entries.iter().any(|entry| !entry.removed)
    }
}

impl<V: fmt::Debug> fmt::Debug for OrSet<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OrSet")
            .field("replica_id", &self.replica_id)
            .field("history", &*self.inner.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::OrSet;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_local_add_remove() {
        let set: OrSet<String> = OrSet::new("a");
        set.add("x".to_owned());
        assert!(set.contains(&"x".to_owned()));
        assert!(set.remove(&"x".to_owned()));
        assert!(!set.contains(&"x".to_owned()));
        assert!(!set.remove(&"x".to_owned()));
        assert_eq!(set.history_len(), 1);
    }

    #[test]
    fn test_remove_retracts_one_entry() {
        let set: OrSet<u32> = OrSet::new("a");
        set.add(1);
        set.add(1);
        assert!(set.remove(&1));
        assert!(set.contains(&1));
        assert!(set.remove(&1));
        assert!(!set.contains(&1));
        assert_eq!(set.clock(), 2);
    }

    #[test]
    fn test_remove_ignores_foreign_entries() {
        let a: OrSet<u32> = OrSet::new("a");
        let b: OrSet<u32> = OrSet::new("b");
        a.add(7);
        b.merge(&a);
        assert!(b.contains(&7));
        assert!(!b.remove(&7));
        assert!(b.contains(&7));

        // Only the author can retract it, and the retraction travels through merge
        assert!(a.remove(&7));
        b.merge(&a);
        assert!(!b.contains(&7));
    }

    #[test]
    fn test_merge_keeps_removal() {
        let a: OrSet<u32> = OrSet::new("a");
        let b: OrSet<u32> = OrSet::new("b");
        a.add(3);
        b.merge(&a);
        a.remove(&3);
        // b still has the stale, unremoved copy; merging in either direction keeps the removal
        a.merge(&b);
        assert!(!a.contains(&3));
        b.merge(&a);
        assert!(!b.contains(&3));
    }

    #[test]
    fn test_merge_advances_clock() {
        let a: OrSet<u32> = OrSet::new("a");
        let b: OrSet<u32> = OrSet::new("b");
        for i in 0..5 {
            a.add(i);
        }
        b.add(10);
        b.merge(&a);
        assert_eq!(b.clock(), 5);
        b.add(11);
        assert_eq!(b.clock(), 6);
        a.merge(&b);
        assert_eq!(a.clock(), 6);
    }

    fn random_ops(set: &OrSet<u8>, ops: usize) {
        let mut rng = thread_rng();
        for _ in 0..ops {
            let value = rng.gen_range(0..16);
            if rng.gen_bool(0.6) {
                set.add(value);
            } else {
                set.remove(&value);
            }
        }
    }

    #[test]
    fn test_convergence_and_idempotence() {
        for _ in 0..50 {
            let a: OrSet<u8> = OrSet::new("a");
            let b: OrSet<u8> = OrSet::new("b");
            random_ops(&a, 40);
            random_ops(&b, 40);
            b.merge(&a);
            random_ops(&a, 20);
            random_ops(&b, 20);

            a.merge(&b);
            b.merge(&a);
            assert_eq!(a.elements(), b.elements());
            assert_eq!(a.history_len(), b.history_len());

            let elements = a.elements();
            let history_len = a.history_len();
            a.merge(&a);
            a.merge(&b);
            assert_eq!(a.elements(), elements);
            assert_eq!(a.history_len(), history_len);
        }
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let sets: Vec<OrSet<u8>> = ["a", "b", "c"].iter().map(|id| OrSet::new(*id)).collect();
        for set in &sets {
            random_ops(set, 50);
        }
        sets[1].merge(&sets[0]);
        random_ops(&sets[1], 10);

        let forward: OrSet<u8> = OrSet::new("x");
        for set in &sets {
            forward.merge(set);
        }
        let backward: OrSet<u8> = OrSet::new("y");
        for set in sets.iter().rev() {
            backward.merge(set);
        }
        assert_eq!(forward.elements(), backward.elements());
        assert_eq!(forward.history_len(), backward.history_len());
    }

    #[test]
    fn test_concurrent_adds() {
        let set: Arc<OrSet<u32>> = Arc::new(OrSet::new("a"));
        let mut waitvec: Vec<thread::JoinHandle<()>> = Vec::new();
        for t in 0..8 {
            let set_copy = set.clone();
            waitvec.push(thread::spawn(move || {
                for i in 0..1000 {
                    set_copy.add(t * 1000 + i);
                }
                for i in 0..500 {
                    assert!(set_copy.remove(&(t * 1000 + i)));
                }
            }));
        }
        for handle in waitvec {
            handle.join().unwrap();
        }
        assert_eq!(set.len(), 8 * 500);
        assert_eq!(set.clock(), 8000);
        let expected: HashSet<u32> = (0..8).flat_map(|t| (500..1000).map(move |i| t * 1000 + i)).collect();
        assert_eq!(set.elements(), expected);
    }

    #[test]
    fn test_cross_merge_does_not_deadlock() {
        let a: Arc<OrSet<u32>> = Arc::new(OrSet::new("a"));
        let b: Arc<OrSet<u32>> = Arc::new(OrSet::new("b"));
        let (a1, b1) = (a.clone(), b.clone());
        let first = thread::spawn(move || {
            for i in 0..500 {
                a1.add(i);
                a1.merge(&b1);
            }
        });
        let (a2, b2) = (a.clone(), b.clone());
        let second = thread::spawn(move || {
            for i in 500..1000 {
                b2.add(i);
                b2.merge(&a2);
            }
        });
        first.join().unwrap();
        second.join().unwrap();

        a.merge(&b);
        b.merge(&a);
        assert_eq!(a.elements(), b.elements());
        assert_eq!(a.len(), 1000);
    }
}
