//! Key-value engine contract.
//!
//! The subsystem only relies on the engine's point-get and range-iterator
//! behavior; the engine itself (rocksdb in production, [`crate::MemEngine`]
//! in tests) is an external collaborator.

use shardvec_core::{Range, Result};

/// Column family holding vector data/scalar/table keyspaces.
pub const CF_STORE_DATA: &str = "store_data";

/// Column family holding persisted subsystem meta (apply/snapshot log ids).
pub const CF_STORE_META: &str = "store_meta";

/// Bounds for a range iterator. `None` means unbounded on that side.
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Inclusive lower bound
    pub lower_bound: Option<Vec<u8>>,
    /// Exclusive upper bound
    pub upper_bound: Option<Vec<u8>>,
}

/// A bidirectional cursor over one column family.
///
/// The cursor is positioned by `seek`/`seek_for_prev` and advanced with
/// `next`/`prev`. `key`/`value` may only be called while `valid()`.
pub trait KvIterator: Send {
    /// Position at the first entry `>= key` (within bounds).
    fn seek(&mut self, key: &[u8]);
    /// Position at the last entry `<= key` (within bounds).
    fn seek_for_prev(&mut self, key: &[u8]);
    /// True while the cursor points at an entry.
    fn valid(&self) -> bool;
    /// Advance to the next entry in ascending key order.
    fn next(&mut self);
    /// Step back to the previous entry.
    fn prev(&mut self);
    /// Current key. Panics if not `valid()`.
    fn key(&self) -> &[u8];
    /// Current value. Panics if not `valid()`.
    fn value(&self) -> &[u8];
}

/// Read side of the engine.
pub trait KvReader: Send + Sync {
    /// Point get.
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Range iterator. Implementations guarantee the iterator observes a
    /// consistent snapshot of the column family.
    fn iter(&self, cf: &str, options: IteratorOptions) -> Result<Box<dyn KvIterator>>;
}

/// Write side of the engine.
pub trait KvWriter: Send + Sync {
    /// Insert or replace.
    fn put(&self, cf: &str, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Remove a key if present.
    fn delete(&self, cf: &str, key: &[u8]) -> Result<()>;

    /// Remove every key in `[start_key, end_key)`.
    fn delete_range(&self, cf: &str, range: &Range) -> Result<()>;
}

/// Full engine handle: both sides.
pub trait RawEngine: KvReader + KvWriter {}

impl<T: KvReader + KvWriter> RawEngine for T {}
