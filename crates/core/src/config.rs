//! Subsystem configuration.
//!
//! A plain struct with serde support so a host process can splice it out of
//! its own config file. `Default` carries the tunables' documented defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Tunables for the vector index lifecycle subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Root directory for on-disk snapshots:
    /// `<index_root>/<index_id>/snapshot_<log id>/`.
    pub index_root: PathBuf,

    /// Advertised `host:port` of this node, used in snapshot transfer uris.
    pub server_addr: String,

    /// Worker threads for the boot-time parallel load.
    pub load_or_build_concurrency: usize,

    /// Records per kernel upsert batch during a full key-value build.
    pub build_batch_size: usize,

    /// Adds buffered per kernel upsert during WAL replay.
    pub replay_batch_size: usize,

    /// Chunk size for snapshot file transfer.
    pub file_transfer_chunk_size: usize,

    /// Scrubber: save once the apply log runs this far past the last
    /// snapshot.
    pub save_log_behind: u64,

    /// Scrubber: rebuild once the apply log runs this far past the last
    /// snapshot.
    pub rebuild_log_behind: u64,

    /// Keep the in-memory index on followers after an async rebuild. When
    /// false, a non-leader deletes its handle once the rebuild finishes.
    pub enable_follower_hold_index: bool,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        VectorIndexConfig {
            index_root: PathBuf::from("./index"),
            server_addr: "127.0.0.1:20001".to_string(),
            load_or_build_concurrency: 4,
            build_batch_size: 1024,
            replay_batch_size: 10_000,
            file_transfer_chunk_size: 1 << 20,
            save_log_behind: 10_000,
            rebuild_log_behind: 1_000_000,
            enable_follower_hold_index: true,
        }
    }
}

impl VectorIndexConfig {
    /// Snapshot parent directory for one index.
    pub fn snapshot_parent_path(&self, vector_index_id: u64) -> PathBuf {
        self.index_root.join(vector_index_id.to_string())
    }
}
