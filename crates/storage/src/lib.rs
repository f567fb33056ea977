//! shardvec-storage: engine contracts and in-memory implementations.
//!
//! The key-value engine and the raft log are external collaborators of the
//! index lifecycle subsystem; this crate pins down the contracts it relies
//! on (point-get, bounded range iteration, log range-get) and provides
//! in-memory implementations for tests and tooling.

pub mod kv;
pub mod memory;
pub mod meta;
pub mod raft_log;

pub use kv::{IteratorOptions, KvIterator, KvReader, KvWriter, RawEngine, CF_STORE_DATA, CF_STORE_META};
pub use memory::MemEngine;
pub use meta::{MetaReader, MetaWriter};
pub use raft_log::{
    CommandRequest, LogEntry, LogStorage, LogStorageManager, MemLogStorage, RaftCommand,
};
