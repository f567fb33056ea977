//! shardvec-engine: the vector-index lifecycle and snapshot subsystem.
//!
//! Keeps each region's in-memory vector index durable, available and
//! consistent with the raft WAL across restarts, rebuilds and peer
//! hand-offs, while mutations keep flowing through consensus.
//!
//! - [`manager::VectorIndexManager`] drives the per-index lifecycle: boot
//!   load-or-build, background rebuilds with two-round WAL catch-up,
//!   snapshot saves and the periodic scrubber.
//! - [`snapshot`] and [`snapshot_manager`] keep exactly one durable snapshot
//!   per index on disk and move snapshots between peers.
//! - [`reader::VectorReader`] serves filtered point/batch/scan/search reads
//!   over the live index and the record keyspaces.

pub mod handle;
pub mod manager;
pub mod raft;
pub mod reader;
pub mod snapshot;
pub mod snapshot_manager;
pub mod transport;

pub use handle::{IndexStatus, VectorIndex};
pub use manager::VectorIndexManager;
pub use raft::{MemRaftRouter, RaftRouter};
pub use reader::{
    VectorFilter, VectorFilterType, VectorIndexMetrics, VectorReader, VectorScanContext,
    VectorSearchParameter,
};
pub use snapshot::{SnapshotMeta, SnapshotStore};
pub use snapshot_manager::VectorIndexSnapshotManager;
pub use transport::{
    build_remote_uri, parse_remote_uri, CleanFileReaderRequest, FileReaderManager, GetFileRequest,
    GetFileResponse, GetVectorIndexSnapshotRequest, GetVectorIndexSnapshotResponse,
    InProcessNodeClient, InstallVectorIndexSnapshotRequest, NodeClient, SnapshotFileReader,
    VectorIndexSnapshotMeta,
};
