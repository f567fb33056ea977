//! Concurrent registry: copy-on-read maps for cross-thread publication.
//!
//! `SafeMap` is the uniform container used wherever an owned handle must be
//! published atomically to other threads (index handles, regions, log
//! storages). Readers take the read side of an `RwLock` and copy values out,
//! so they observe a consistent snapshot for the duration of one call and
//! never hold references into the map. Writers serialize on the write side.
//!
//! Write operations return the number of applied mutations: `1` when the map
//! changed, `0` for a conditional no-op. A poisoned lock (a writer panicked)
//! is a real error and is reported distinctly from a no-op.
//!
//! `SafeBTreeMap` is the ordered variant and additionally supports bounded
//! range reads in ascending key order.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Filter over values during iteration.
pub type ValueFilter<'a, V> = Option<&'a dyn Fn(&V) -> bool>;

/// Filter over keys during range iteration.
pub type KeyFilter<'a, K> = Option<&'a dyn Fn(&K) -> bool>;

fn poisoned() -> Error {
    Error::internal("registry lock poisoned")
}

/// Thread-safe hash map with atomic publication semantics.
pub struct SafeMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for SafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Empty map.
    pub fn new() -> Self {
        SafeMap {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Copy out the value for `key`, or `None` if absent.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.get(key).cloned())
    }

    /// True if `key` is present.
    pub fn exists(&self, key: &K) -> Result<bool> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.contains_key(key))
    }

    /// Number of entries.
    pub fn size(&self) -> Result<usize> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.len())
    }

    /// All keys, optionally restricted to entries whose value passes
    /// `filter`. Materialized under one read guard: no tearing.
    pub fn get_all_keys(&self, filter: ValueFilter<'_, V>) -> Result<Vec<K>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .iter()
            .filter(|(_, v)| filter.map_or(true, |f| f(v)))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// All values, optionally filtered. Infallible absence: an empty map
    /// yields an empty vector.
    pub fn get_all_values(&self, filter: ValueFilter<'_, V>) -> Result<Vec<V>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .values()
            .filter(|v| filter.map_or(true, |f| f(v)))
            .cloned()
            .collect())
    }

    /// All entries, optionally filtered by value.
    pub fn get_all_key_values(&self, filter: ValueFilter<'_, V>) -> Result<Vec<(K, V)>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .iter()
            .filter(|(_, v)| filter.map_or(true, |f| f(v)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Unconditional insert/replace. Always applies.
    pub fn put(&self, key: K, value: V) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        guard.insert(key, value);
        Ok(1)
    }

    /// Insert all pairs. `keys` and `values` must be the same length.
    pub fn multi_put(&self, keys: Vec<K>, values: Vec<V>) -> Result<u64> {
        if keys.len() != values.len() {
            return Err(Error::illegal_parameters(
                "multi_put keys/values length mismatch",
            ));
        }
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let count = keys.len() as u64;
        for (key, value) in keys.into_iter().zip(values) {
            guard.insert(key, value);
        }
        Ok(count)
    }

    /// Insert only when the key is absent.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        if guard.contains_key(&key) {
            return Ok(0);
        }
        guard.insert(key, value);
        Ok(1)
    }

    /// Replace only when the key is present.
    pub fn put_if_exists(&self, key: K, value: V) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        match guard.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Remove the entry if present.
    pub fn erase(&self, key: &K) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        Ok(if guard.remove(key).is_some() { 1 } else { 0 })
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let count = guard.len() as u64;
        guard.clear();
        Ok(count)
    }
}

impl<K, V> SafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    /// Replace only when the current value equals `expected`.
    pub fn put_if_equal(&self, key: K, expected: &V, value: V) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        match guard.get_mut(&key) {
            Some(slot) if slot == expected => {
                *slot = value;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    /// Replace only when the key is present with a different value.
    pub fn put_if_not_equal(&self, key: K, value: V) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        match guard.get_mut(&key) {
            Some(slot) if *slot != value => {
                *slot = value;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

/// Ordered variant of [`SafeMap`] with bounded range reads.
pub struct SafeBTreeMap<K, V> {
    inner: RwLock<BTreeMap<K, V>>,
}

impl<K, V> Default for SafeBTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SafeBTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Empty map.
    pub fn new() -> Self {
        SafeBTreeMap {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Copy out the value for `key`, or `None` if absent.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.get(key).cloned())
    }

    /// Number of entries.
    pub fn size(&self) -> Result<usize> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.len())
    }

    /// All keys in ascending order, optionally filtered by value.
    pub fn get_all_keys(&self, filter: ValueFilter<'_, V>) -> Result<Vec<K>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .iter()
            .filter(|(_, v)| filter.map_or(true, |f| f(v)))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// All values in ascending key order, optionally filtered.
    pub fn get_all_values(&self, filter: ValueFilter<'_, V>) -> Result<Vec<V>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .values()
            .filter(|v| filter.map_or(true, |f| f(v)))
            .cloned()
            .collect())
    }

    /// Keys in `[lower, upper)`, ascending, with optional key and value
    /// filters. The whole range is materialized under one read guard.
    pub fn get_range_keys(
        &self,
        lower: &K,
        upper: &K,
        key_filter: KeyFilter<'_, K>,
        value_filter: ValueFilter<'_, V>,
    ) -> Result<Vec<K>> {
        Ok(self
            .range_entries(lower, upper, key_filter, value_filter)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    /// Values for keys in `[lower, upper)`, ascending.
    pub fn get_range_values(
        &self,
        lower: &K,
        upper: &K,
        key_filter: KeyFilter<'_, K>,
        value_filter: ValueFilter<'_, V>,
    ) -> Result<Vec<V>> {
        Ok(self
            .range_entries(lower, upper, key_filter, value_filter)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    /// Entries in `[lower, upper)`, ascending.
    pub fn get_range_key_values(
        &self,
        lower: &K,
        upper: &K,
        key_filter: KeyFilter<'_, K>,
        value_filter: ValueFilter<'_, V>,
    ) -> Result<Vec<(K, V)>> {
        self.range_entries(lower, upper, key_filter, value_filter)
    }

    fn range_entries(
        &self,
        lower: &K,
        upper: &K,
        key_filter: KeyFilter<'_, K>,
        value_filter: ValueFilter<'_, V>,
    ) -> Result<Vec<(K, V)>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .range((Bound::Included(lower), Bound::Excluded(upper)))
            .filter(|(k, v)| {
                key_filter.map_or(true, |f| f(k)) && value_filter.map_or(true, |f| f(v))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Unconditional insert/replace.
    pub fn put(&self, key: K, value: V) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        guard.insert(key, value);
        Ok(1)
    }

    /// Insert only when the key is absent.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        if guard.contains_key(&key) {
            return Ok(0);
        }
        guard.insert(key, value);
        Ok(1)
    }

    /// Remove the entry if present.
    pub fn erase(&self, key: &K) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        Ok(if guard.remove(key).is_some() { 1 } else { 0 })
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<u64> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let count = guard.len() as u64;
        guard.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_get_erase() {
        let map: SafeMap<u64, String> = SafeMap::new();
        assert_eq!(map.put(1, "a".into()).unwrap(), 1);
        assert_eq!(map.get(&1).unwrap(), Some("a".into()));
        assert_eq!(map.erase(&1).unwrap(), 1);
        assert_eq!(map.erase(&1).unwrap(), 0);
        assert_eq!(map.get(&1).unwrap(), None);
    }

    #[test]
    fn test_conditional_puts() {
        let map: SafeMap<u64, u32> = SafeMap::new();
        assert_eq!(map.put_if_exists(1, 10).unwrap(), 0);
        assert_eq!(map.put_if_absent(1, 10).unwrap(), 1);
        assert_eq!(map.put_if_absent(1, 20).unwrap(), 0);
        assert_eq!(map.get(&1).unwrap(), Some(10));
        assert_eq!(map.put_if_exists(1, 20).unwrap(), 1);
        assert_eq!(map.get(&1).unwrap(), Some(20));
    }

    #[test]
    fn test_put_if_equal_compares_values() {
        let map: SafeMap<u64, u32> = SafeMap::new();
        map.put(1, 10).unwrap();
        assert_eq!(map.put_if_equal(1, &11, 99).unwrap(), 0);
        assert_eq!(map.get(&1).unwrap(), Some(10));
        assert_eq!(map.put_if_equal(1, &10, 99).unwrap(), 1);
        assert_eq!(map.get(&1).unwrap(), Some(99));
    }

    #[test]
    fn test_put_if_not_equal() {
        let map: SafeMap<u64, u32> = SafeMap::new();
        map.put(1, 10).unwrap();
        assert_eq!(map.put_if_not_equal(1, 10).unwrap(), 0);
        assert_eq!(map.put_if_not_equal(1, 11).unwrap(), 1);
        assert_eq!(map.put_if_not_equal(2, 1).unwrap(), 0);
    }

    #[test]
    fn test_multi_put_length_mismatch_is_error_not_noop() {
        let map: SafeMap<u64, u32> = SafeMap::new();
        let err = map.multi_put(vec![1, 2], vec![10]).unwrap_err();
        assert!(matches!(err, Error::IllegalParameters { .. }));
        assert_eq!(map.multi_put(vec![1, 2], vec![10, 20]).unwrap(), 2);
        assert_eq!(map.size().unwrap(), 2);
    }

    #[test]
    fn test_filtered_iteration() {
        let map: SafeMap<u64, u32> = SafeMap::new();
        for i in 0..10 {
            map.put(i, i as u32 * 10).unwrap();
        }
        let even = |v: &u32| v % 20 == 0;
        let mut keys = map.get_all_keys(Some(&even)).unwrap();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 2, 4, 6, 8]);
        assert_eq!(map.get_all_values(Some(&even)).unwrap().len(), 5);
        assert_eq!(map.get_all_key_values(None).unwrap().len(), 10);
    }

    #[test]
    fn test_clear() {
        let map: SafeMap<u64, u32> = SafeMap::new();
        map.put(1, 1).unwrap();
        map.put(2, 2).unwrap();
        assert_eq!(map.clear().unwrap(), 2);
        assert_eq!(map.size().unwrap(), 0);
    }

    #[test]
    fn test_btree_range_reads_ascending() {
        let map: SafeBTreeMap<u64, u32> = SafeBTreeMap::new();
        for i in [5u64, 1, 9, 3, 7] {
            map.put(i, i as u32).unwrap();
        }
        let keys = map.get_range_keys(&2, &8, None, None).unwrap();
        assert_eq!(keys, vec![3, 5, 7]);

        let odd_key = |k: &u64| k % 2 == 1;
        let big_value = |v: &u32| *v >= 5;
        let kv = map
            .get_range_key_values(&0, &10, Some(&odd_key), Some(&big_value))
            .unwrap();
        assert_eq!(kv, vec![(5, 5), (7, 7), (9, 9)]);

        let values = map.get_range_values(&0, &6, None, None).unwrap();
        assert_eq!(values, vec![1, 3, 5]);
    }

    #[test]
    fn test_btree_upper_bound_exclusive() {
        let map: SafeBTreeMap<u64, u32> = SafeBTreeMap::new();
        map.put(5, 5).unwrap();
        assert!(map.get_range_keys(&0, &5, None, None).unwrap().is_empty());
        assert_eq!(map.get_range_keys(&0, &6, None, None).unwrap(), vec![5]);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let map: Arc<SafeMap<u64, u64>> = Arc::new(SafeMap::new());
        for i in 0..100 {
            map.put(i, i).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    // A single call must observe a consistent snapshot.
                    let all = map.get_all_key_values(None).unwrap();
                    assert!(all.len() >= 100);
                    for (k, v) in all {
                        assert!(v == k || v == k + 1);
                    }
                }
            }));
        }
        {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for round in 0..10 {
                    for i in 0..100 {
                        map.put(i, i + (round % 2)).unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
