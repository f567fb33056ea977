//! In-memory key-value engine.
//!
//! A `BTreeMap` per column family behind one `RwLock`. Iterators materialize
//! the bounded range under the read guard, so a cursor observes a consistent
//! snapshot no matter what writers do afterwards.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use shardvec_core::{Range, Result};

use crate::kv::{IteratorOptions, KvIterator, KvReader, KvWriter};

type Family = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory engine used by tests and single-node tooling.
#[derive(Default)]
pub struct MemEngine {
    families: RwLock<HashMap<String, Family>>,
}

impl MemEngine {
    /// Empty engine.
    pub fn new() -> Self {
        MemEngine {
            families: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys in a column family.
    pub fn family_len(&self, cf: &str) -> usize {
        self.families.read().get(cf).map_or(0, |f| f.len())
    }
}

impl KvReader for MemEngine {
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let families = self.families.read();
        Ok(families.get(cf).and_then(|f| f.get(key).cloned()))
    }

    fn iter(&self, cf: &str, options: IteratorOptions) -> Result<Box<dyn KvIterator>> {
        let families = self.families.read();
        let entries = match families.get(cf) {
            Some(family) => family
                .iter()
                .filter(|(k, _)| {
                    options
                        .lower_bound
                        .as_ref()
                        .map_or(true, |lower| k.as_slice() >= lower.as_slice())
                        && options
                            .upper_bound
                            .as_ref()
                            .map_or(true, |upper| k.as_slice() < upper.as_slice())
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Vec::new(),
        };
        Ok(Box::new(MemIterator { entries, pos: None }))
    }
}

impl KvWriter for MemEngine {
    fn put(&self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut families = self.families.write();
        families.entry(cf.to_string()).or_default().insert(key, value);
        Ok(())
    }

    fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        let mut families = self.families.write();
        if let Some(family) = families.get_mut(cf) {
            family.remove(key);
        }
        Ok(())
    }

    fn delete_range(&self, cf: &str, range: &Range) -> Result<()> {
        let mut families = self.families.write();
        if let Some(family) = families.get_mut(cf) {
            let doomed: Vec<Vec<u8>> = family
                .range(range.start_key.clone()..range.end_key.clone())
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                family.remove(&key);
            }
        }
        Ok(())
    }
}

/// Cursor over a materialized, sorted entry list.
struct MemIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
}

impl KvIterator for MemIterator {
    fn seek(&mut self, key: &[u8]) {
        let idx = self.entries.partition_point(|(k, _)| k.as_slice() < key);
        self.pos = (idx < self.entries.len()).then_some(idx);
    }

    fn seek_for_prev(&mut self, key: &[u8]) {
        let idx = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
        self.pos = idx.checked_sub(1);
    }

    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn next(&mut self) {
        self.pos = match self.pos {
            Some(idx) if idx + 1 < self.entries.len() => Some(idx + 1),
            _ => None,
        };
    }

    fn prev(&mut self) {
        self.pos = self.pos.and_then(|idx| idx.checked_sub(1));
    }

    fn key(&self) -> &[u8] {
        let idx = self.pos.expect("iterator not valid");
        &self.entries[idx].0
    }

    fn value(&self) -> &[u8] {
        let idx = self.pos.expect("iterator not valid");
        &self.entries[idx].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::CF_STORE_DATA;

    fn engine_with(keys: &[&[u8]]) -> MemEngine {
        let engine = MemEngine::new();
        for key in keys {
            engine
                .put(CF_STORE_DATA, key.to_vec(), b"v".to_vec())
                .unwrap();
        }
        engine
    }

    #[test]
    fn test_get_put_delete() {
        let engine = MemEngine::new();
        engine
            .put(CF_STORE_DATA, b"a".to_vec(), b"1".to_vec())
            .unwrap();
        assert_eq!(
            engine.get(CF_STORE_DATA, b"a").unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(engine.get(CF_STORE_DATA, b"b").unwrap(), None);
        assert_eq!(engine.get("other_cf", b"a").unwrap(), None);
        engine.delete(CF_STORE_DATA, b"a").unwrap();
        assert_eq!(engine.get(CF_STORE_DATA, b"a").unwrap(), None);
    }

    #[test]
    fn test_iter_forward_with_bounds() {
        let engine = engine_with(&[b"a", b"b", b"c", b"d"]);
        let mut iter = engine
            .iter(
                CF_STORE_DATA,
                IteratorOptions {
                    lower_bound: None,
                    upper_bound: Some(b"d".to_vec()),
                },
            )
            .unwrap();
        iter.seek(b"a");
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_seek_positions_at_first_ge() {
        let engine = engine_with(&[b"b", b"d"]);
        let mut iter = engine.iter(CF_STORE_DATA, IteratorOptions::default()).unwrap();
        iter.seek(b"c");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"d");
        iter.seek(b"e");
        assert!(!iter.valid());
    }

    #[test]
    fn test_seek_for_prev_and_prev() {
        let engine = engine_with(&[b"b", b"d", b"f"]);
        let mut iter = engine.iter(CF_STORE_DATA, IteratorOptions::default()).unwrap();
        iter.seek_for_prev(b"e");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"d");
        iter.prev();
        assert_eq!(iter.key(), b"b");
        iter.prev();
        assert!(!iter.valid());

        iter.seek_for_prev(b"a");
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_is_a_snapshot() {
        let engine = engine_with(&[b"a", b"b"]);
        let mut iter = engine.iter(CF_STORE_DATA, IteratorOptions::default()).unwrap();
        engine
            .put(CF_STORE_DATA, b"c".to_vec(), b"v".to_vec())
            .unwrap();
        iter.seek(b"a");
        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_delete_range() {
        let engine = engine_with(&[b"a", b"b", b"c", b"d"]);
        engine
            .delete_range(CF_STORE_DATA, &Range::new(b"b".to_vec(), b"d".to_vec()))
            .unwrap();
        assert_eq!(engine.family_len(CF_STORE_DATA), 2);
        assert!(engine.get(CF_STORE_DATA, b"a").unwrap().is_some());
        assert!(engine.get(CF_STORE_DATA, b"b").unwrap().is_none());
        assert!(engine.get(CF_STORE_DATA, b"d").unwrap().is_some());
    }
}
