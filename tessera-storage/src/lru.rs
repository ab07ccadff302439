//! Bounded least-recently-used cache with O(1) get, set and evict.
//!
//! Entries live in an arena (`Vec` of slots) and are threaded into a doubly
//! linked recency list through `prev`/`next` slot indices; a `HashMap` maps
//! each key to its slot. The head of the list is the most recently touched
//! entry and the tail the least recently touched. Freed slots are recycled
//! through a free list, so a hit never allocates.
//!
//! The cache is not synchronized. Shared users wrap it in a `Mutex`.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A bounded map that evicts the least recently used entry.
#[derive(Debug)]
pub struct LruCache<K, V> {
    max_size: usize,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a cache holding at most `max_size` entries.
    ///
    /// A capacity of zero is allowed: every insertion is evicted right away.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Create a cache that never evicts.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Look up `key` and mark it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        Some(&self.slot(idx).value)
    }

    /// Look up `key` without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        Some(&self.slot(idx).value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Insert or update `key` and mark it most recently used.
    ///
    /// Returns the entry evicted to stay within capacity, if any. Updating
    /// an existing key never evicts.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.slot_mut(idx).value = value;
            self.promote(idx);
            return None;
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);

        // At most one over the bound right after an insertion.
        if self.index.len() > self.max_size {
            let tail = self.tail?;
            return Some(self.remove_slot(tail));
        }
        None
    }

    /// Remove `key`, returning its value.
    pub fn pop<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        Some(self.remove_slot(idx).1)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.pop(key).is_some()
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let tail = self.tail?;
        Some(self.remove_slot(tail))
    }

    /// Remove and return the most recently used entry.
    pub fn pop_mru(&mut self) -> Option<(K, V)> {
        let head = self.head?;
        Some(self.remove_slot(head))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            cursor: self.head,
            remaining: self.len(),
        }
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Values from most to least recently used.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    fn slot(&self, idx: usize) -> &Slot<K, V> {
        self.slots[idx].as_ref().expect("linked lru slot is occupied")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot<K, V> {
        self.slots[idx].as_mut().expect("linked lru slot is occupied")
    }

    fn promote(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slot_mut(idx);
        slot.prev = None;
        slot.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => self.slot_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn remove_slot(&mut self, idx: usize) -> (K, V) {
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("linked lru slot is occupied");
        self.free.push(idx);
        self.index.remove(&slot.key);
        (slot.key, slot.value)
    }
}

impl<K, V> Default for LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Recency-ordered iterator over an [`LruCache`].
pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Hash + Eq + Clone,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let slot = self.cache.slot(idx);
        self.cursor = slot.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((&slot.key, &slot.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, keys: &[&str]) -> LruCache<String, String> {
        let mut cache = LruCache::new(capacity);
        for key in keys {
            cache.set(key.to_string(), key.to_string());
        }
        cache
    }

    fn order(cache: &LruCache<String, String>) -> Vec<&str> {
        cache.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = filled(5, &["1", "2", "3", "4", "5"]);

        let evicted = cache.set("6".to_string(), "6".to_string());
        assert_eq!(evicted, Some(("1".to_string(), "1".to_string())));
        assert!(cache.get("1").is_none());

        assert_eq!(cache.get("3").map(String::as_str), Some("3"));
        cache.set("7".to_string(), "7".to_string());
        assert!(cache.get("2").is_none());
        assert!(cache.contains("3"));
        assert_eq!(cache.len(), 5);
        assert_eq!(order(&cache), vec!["7", "3", "6", "5", "4"]);
    }

    #[test]
    fn test_zero_capacity_evicts_immediately() {
        let mut cache: LruCache<String, i32> = LruCache::new(0);
        let evicted = cache.set("a".to_string(), 1);
        assert_eq!(evicted, Some(("a".to_string(), 1)));
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_single_slot_replacement() {
        let mut cache = filled(1, &["a"]);
        cache.set("b".to_string(), "b".to_string());
        assert_eq!(order(&cache), vec!["b"]);
        assert_eq!(cache.len(), 1);
        cache.set("b".to_string(), "b2".to_string());
        assert_eq!(cache.peek("b").map(String::as_str), Some("b2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reset_same_key_keeps_size() {
        let mut cache = filled(3, &["a", "b", "c"]);
        assert_eq!(cache.set("a".to_string(), "A".to_string()), None);
        assert_eq!(cache.len(), 3);
        assert_eq!(order(&cache), vec!["a", "c", "b"]);
        assert_eq!(cache.peek("a").map(String::as_str), Some("A"));
    }

    #[test]
    fn test_peek_does_not_promote() {
        let mut cache = filled(2, &["a", "b"]);
        assert!(cache.peek("a").is_some());
        cache.set("c".to_string(), "c".to_string());
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_delete_relinks_neighbors() {
        let mut cache = filled(5, &["a", "b", "c", "d"]);
        // middle
        assert_eq!(cache.pop("b"), Some("b".to_string()));
        assert_eq!(order(&cache), vec!["d", "c", "a"]);
        // head
        assert!(cache.delete("d"));
        assert_eq!(order(&cache), vec!["c", "a"]);
        // tail
        assert!(cache.delete("a"));
        assert_eq!(order(&cache), vec!["c"]);
        assert!(!cache.delete("missing"));
        assert!(cache.delete("c"));
        assert!(cache.is_empty());
        assert_eq!(cache.pop_lru(), None);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut cache = filled(3, &["a", "b", "c"]);
        cache.delete("b");
        cache.set("d".to_string(), "d".to_string());
        assert_eq!(cache.slots.len(), 3);
        assert_eq!(order(&cache), vec!["d", "c", "a"]);
    }

    #[test]
    fn test_pop_lru_and_mru() {
        let mut cache = filled(3, &["a", "b", "c"]);
        assert_eq!(cache.pop_lru().map(|(k, _)| k), Some("a".to_string()));
        assert_eq!(cache.pop_mru().map(|(k, _)| k), Some("c".to_string()));
        assert_eq!(order(&cache), vec!["b"]);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut cache = filled(3, &["a", "b"]);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.iter().count(), 0);
        cache.set("z".to_string(), "z".to_string());
        assert_eq!(order(&cache), vec!["z"]);
    }

    #[test]
    fn test_values_follow_recency() {
        let mut cache: LruCache<&str, i32> = LruCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.get("a");
        assert_eq!(cache.values().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(cache.iter().size_hint(), (2, Some(2)));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Set(u8, u32),
        Get(u8),
        Delete(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12, any::<u32>()).prop_map(|(k, v)| Op::Set(k, v)),
            (0u8..12).prop_map(Op::Get),
            (0u8..12).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The cache agrees with a naive recency list: same contents, same
        /// order, size never above capacity, and evictions always take the
        /// least recently touched key.
        #[test]
        fn prop_matches_recency_model(
            capacity in 0usize..6,
            ops in prop::collection::vec(op(), 0..80),
        ) {
            let mut cache = LruCache::new(capacity);
            // Most recent first.
            let mut model: Vec<(u8, u32)> = Vec::new();

            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        let evicted = cache.set(k, v);
                        model.retain(|(mk, _)| *mk != k);
                        model.insert(0, (k, v));
                        let expected = if model.len() > capacity { model.pop() } else { None };
                        prop_assert_eq!(evicted, expected);
                    }
                    Op::Get(k) => {
                        let got = cache.get(&k).copied();
                        let pos = model.iter().position(|(mk, _)| *mk == k);
                        let expected = pos.map(|p| {
                            let entry = model.remove(p);
                            model.insert(0, entry);
                            entry.1
                        });
                        prop_assert_eq!(got, expected);
                    }
                    Op::Delete(k) => {
                        let removed = cache.pop(&k);
                        let pos = model.iter().position(|(mk, _)| *mk == k);
                        let expected = pos.map(|p| model.remove(p).1);
                        prop_assert_eq!(removed, expected);
                    }
                }
                prop_assert!(cache.len() <= capacity);
                let actual: Vec<(u8, u32)> = cache.iter().map(|(k, v)| (*k, *v)).collect();
                prop_assert_eq!(&actual, &model);
            }
        }
    }
}
