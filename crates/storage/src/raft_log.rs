//! Raft WAL contract and command codec.
//!
//! The consensus layer is an external collaborator; the subsystem only needs
//! an ordered, reliable log with range-get. Each log entry's payload decodes
//! into a `RaftCommand`: an ordered sequence of vector mutations that WAL
//! replay applies in place.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use shardvec_core::{Error, Result, SafeMap, VectorId, VectorWithId};

/// One committed WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic raft log index
    pub index: u64,
    /// Encoded `RaftCommand`
    pub data: Vec<u8>,
}

/// One request inside a raft command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandRequest {
    /// Upsert a batch of vectors
    VectorAdd {
        /// Records to upsert; each carries its vector values
        vectors: Vec<VectorWithId>,
    },
    /// Delete a batch of vector ids
    VectorDelete {
        /// Ids to delete
        ids: Vec<VectorId>,
    },
    /// Command types the index subsystem does not consume; replay skips them.
    Noop,
}

/// The decoded payload of one WAL entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaftCommand {
    /// Requests, applied in order
    pub requests: Vec<CommandRequest>,
}

impl RaftCommand {
    /// Command carrying a single vector-add request.
    pub fn vector_add(vectors: Vec<VectorWithId>) -> Self {
        RaftCommand {
            requests: vec![CommandRequest::VectorAdd { vectors }],
        }
    }

    /// Command carrying a single vector-delete request.
    pub fn vector_delete(ids: Vec<VectorId>) -> Self {
        RaftCommand {
            requests: vec![CommandRequest::VectorDelete { ids }],
        }
    }

    /// Serialize to bytes (MessagePack).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Deserialize from bytes (MessagePack).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Ordered, reliable log with range-get.
pub trait LogStorage: Send + Sync {
    /// Entries with `start_log_id <= index <= end_log_id`, ascending.
    fn entries(&self, start_log_id: u64, end_log_id: u64) -> Result<Vec<LogEntry>>;

    /// Append a committed entry. Indexes must be strictly increasing.
    fn append(&self, entry: LogEntry) -> Result<()>;

    /// Encode and append a command at `index`.
    fn append_command(&self, index: u64, command: &RaftCommand) -> Result<()> {
        self.append(LogEntry {
            index,
            data: command.to_bytes()?,
        })
    }

    /// Highest appended index, 0 when empty.
    fn last_log_id(&self) -> u64;

    /// Record that everything up to `log_id` is covered by a durable index
    /// snapshot and may be reclaimed by the log's own GC.
    fn set_truncate_log_index(&self, log_id: u64);

    /// Current truncation mark.
    fn truncate_log_index(&self) -> u64;
}

/// In-memory log storage for tests and single-node tooling.
///
/// Truncation only moves the mark; entries stay readable so a rebuild's
/// catch-up replay can still range-get past the mark, matching the deferred
/// reclamation of the production log.
#[derive(Default)]
pub struct MemLogStorage {
    entries: Mutex<BTreeMap<u64, Vec<u8>>>,
    truncate_log_index: AtomicU64,
}

impl MemLogStorage {
    /// Empty log.
    pub fn new() -> Self {
        MemLogStorage {
            entries: Mutex::new(BTreeMap::new()),
            truncate_log_index: AtomicU64::new(0),
        }
    }
}

impl LogStorage for MemLogStorage {
    fn entries(&self, start_log_id: u64, end_log_id: u64) -> Result<Vec<LogEntry>> {
        let entries = self.entries.lock();
        Ok(entries
            .range(start_log_id..=end_log_id)
            .map(|(index, data)| LogEntry {
                index: *index,
                data: data.clone(),
            })
            .collect())
    }

    fn append(&self, entry: LogEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some((last, _)) = entries.iter().next_back() {
            if entry.index <= *last {
                return Err(Error::illegal_parameters(format!(
                    "log index {} not after last {}",
                    entry.index, last
                )));
            }
        }
        entries.insert(entry.index, entry.data);
        Ok(())
    }

    fn last_log_id(&self) -> u64 {
        self.entries
            .lock()
            .iter()
            .next_back()
            .map(|(index, _)| *index)
            .unwrap_or(0)
    }

    fn set_truncate_log_index(&self, log_id: u64) {
        self.truncate_log_index.store(log_id, Ordering::Release);
    }

    fn truncate_log_index(&self) -> u64 {
        self.truncate_log_index.load(Ordering::Acquire)
    }
}

/// Per-region log storages, published through the registry.
#[derive(Default)]
pub struct LogStorageManager {
    storages: SafeMap<u64, Arc<dyn LogStorage>>,
}

impl LogStorageManager {
    /// Empty manager.
    pub fn new() -> Self {
        LogStorageManager {
            storages: SafeMap::new(),
        }
    }

    /// Register the log for a region.
    pub fn add_log_storage(&self, region_id: u64, storage: Arc<dyn LogStorage>) {
        self.storages
            .put(region_id, storage)
            .expect("log storage registry poisoned");
    }

    /// Log for a region, if registered.
    pub fn log_storage(&self, region_id: u64) -> Option<Arc<dyn LogStorage>> {
        self.storages.get(&region_id).unwrap_or(None)
    }

    /// Drop a region's log registration.
    pub fn remove_log_storage(&self, region_id: u64) {
        let _ = self.storages.erase(&region_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardvec_core::Vector;

    fn add_command(ids: &[u64]) -> RaftCommand {
        RaftCommand::vector_add(
            ids.iter()
                .map(|id| VectorWithId::with_vector(*id, Vector::Float(vec![*id as f32])))
                .collect(),
        )
    }

    #[test]
    fn test_command_roundtrip() {
        let command = RaftCommand {
            requests: vec![
                CommandRequest::VectorAdd {
                    vectors: vec![VectorWithId::with_vector(7, Vector::Float(vec![1.0, 2.0]))],
                },
                CommandRequest::VectorDelete { ids: vec![3, 4] },
                CommandRequest::Noop,
            ],
        };
        let bytes = command.to_bytes().unwrap();
        let parsed = RaftCommand::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.requests.len(), 3);
        match &parsed.requests[1] {
            CommandRequest::VectorDelete { ids } => assert_eq!(ids, &vec![3, 4]),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_command_decode_garbage_fails() {
        assert!(RaftCommand::from_bytes(&[0xFF, 0xFE, 0xFD]).is_err());
    }

    #[test]
    fn test_mem_log_range_get_inclusive() {
        let log = MemLogStorage::new();
        for index in 1..=10 {
            log.append_command(index, &add_command(&[index])).unwrap();
        }
        let entries = log.entries(3, 6).unwrap();
        let indexes: Vec<u64> = entries.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![3, 4, 5, 6]);

        // Open-ended replay reads to the log tail.
        assert_eq!(log.entries(8, u64::MAX).unwrap().len(), 3);
        assert_eq!(log.last_log_id(), 10);
    }

    #[test]
    fn test_mem_log_rejects_out_of_order_append() {
        let log = MemLogStorage::new();
        log.append_command(5, &add_command(&[1])).unwrap();
        assert!(log.append_command(5, &add_command(&[2])).is_err());
        assert!(log.append_command(4, &add_command(&[2])).is_err());
        log.append_command(6, &add_command(&[2])).unwrap();
    }

    #[test]
    fn test_truncate_mark_keeps_entries_readable() {
        let log = MemLogStorage::new();
        for index in 1..=5 {
            log.append_command(index, &add_command(&[index])).unwrap();
        }
        log.set_truncate_log_index(3);
        assert_eq!(log.truncate_log_index(), 3);
        assert_eq!(log.entries(1, u64::MAX).unwrap().len(), 5);
    }

    #[test]
    fn test_log_storage_manager() {
        let manager = LogStorageManager::new();
        assert!(manager.log_storage(1).is_none());
        manager.add_log_storage(1, Arc::new(MemLogStorage::new()));
        assert!(manager.log_storage(1).is_some());
        manager.remove_log_storage(1);
        assert!(manager.log_storage(1).is_none());
    }
}
