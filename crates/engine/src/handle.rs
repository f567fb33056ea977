//! The vector index handle.
//!
//! One handle owns one kernel and carries the lifecycle bookkeeping the
//! manager steers: status, applied/snapshotted log ids, a rebuild version,
//! the write lock that freezes the kernel during snapshot serialization, and
//! the flag rejecting concurrent saves. Handles are reference-owned: a
//! reader that obtained one before a rebuild's publish keeps using it safely
//! until it releases the `Arc`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use shardvec_core::{IndexKind, Result, SearchResult, VectorId, VectorWithId};
use shardvec_index::{FilterSet, VectorIndexKernel};

/// Lifecycle status of an index handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexStatus {
    /// Fresh handle, no lifecycle operation started
    None = 0,
    /// Serving reads and mutations
    Normal = 1,
    /// Loading from a durable snapshot
    Loading = 2,
    /// Building from a full key-value scan
    Building = 3,
    /// A rebuild replaces this handle
    Rebuilding = 4,
    /// Catching up from the WAL
    Replaying = 5,
    /// A snapshot save is serializing the kernel
    Snapshotting = 6,
    /// Terminal: removed from the registry
    Delete = 7,
    /// A lifecycle operation failed
    Error = 8,
}

impl IndexStatus {
    fn from_u8(value: u8) -> IndexStatus {
        match value {
            1 => IndexStatus::Normal,
            2 => IndexStatus::Loading,
            3 => IndexStatus::Building,
            4 => IndexStatus::Rebuilding,
            5 => IndexStatus::Replaying,
            6 => IndexStatus::Snapshotting,
            7 => IndexStatus::Delete,
            8 => IndexStatus::Error,
            _ => IndexStatus::None,
        }
    }

    /// States from which a rebuild/save/build may be initiated.
    pub fn is_quiescent(&self) -> bool {
        matches!(
            self,
            IndexStatus::Normal | IndexStatus::Error | IndexStatus::None
        )
    }
}

/// An owned in-memory vector index plus its lifecycle bookkeeping.
pub struct VectorIndex {
    id: u64,
    kernel: Box<dyn VectorIndexKernel>,
    status: AtomicU8,
    apply_log_index: AtomicU64,
    snapshot_log_index: AtomicU64,
    version: AtomicU64,
    /// Mutators hold the read side; snapshot serialization holds the write
    /// side so it observes a frozen kernel at `apply_log_index`.
    write_lock: RwLock<()>,
    snapshot_in_progress: AtomicBool,
}

impl VectorIndex {
    /// Wrap a kernel into a handle in `None` status.
    pub fn new(id: u64, kernel: Box<dyn VectorIndexKernel>) -> Arc<Self> {
        Arc::new(VectorIndex {
            id,
            kernel,
            status: AtomicU8::new(IndexStatus::None as u8),
            apply_log_index: AtomicU64::new(0),
            snapshot_log_index: AtomicU64::new(0),
            version: AtomicU64::new(0),
            write_lock: RwLock::new(()),
            snapshot_in_progress: AtomicBool::new(false),
        })
    }

    /// Index id (= region id).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Kernel family.
    pub fn kind(&self) -> IndexKind {
        self.kernel.kind()
    }

    /// The kernel behind this handle.
    pub fn kernel(&self) -> &dyn VectorIndexKernel {
        self.kernel.as_ref()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> IndexStatus {
        IndexStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Transition the lifecycle status.
    pub fn set_status(&self, status: IndexStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Highest WAL index whose effect is reflected in the kernel.
    pub fn apply_log_index(&self) -> u64 {
        self.apply_log_index.load(Ordering::Acquire)
    }

    /// Advance the apply log index. Never moves backwards.
    pub fn set_apply_log_index(&self, log_index: u64) {
        self.apply_log_index.fetch_max(log_index, Ordering::AcqRel);
    }

    /// Log id of the most recent durable snapshot.
    pub fn snapshot_log_index(&self) -> u64 {
        self.snapshot_log_index.load(Ordering::Acquire)
    }

    /// Record a new durable snapshot's log id.
    pub fn set_snapshot_log_index(&self, log_index: u64) {
        self.snapshot_log_index.store(log_index, Ordering::Release);
    }

    /// Rebuild generation, the reader hand-off tie-breaker.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Set the rebuild generation.
    pub fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }

    /// Upsert through the kernel. Blocks while a snapshot serialization
    /// holds the write lock.
    pub fn upsert(&self, vectors: &[VectorWithId]) -> Result<()> {
        let _mutate = self.write_lock.read();
        self.kernel.upsert(vectors)
    }

    /// Delete through the kernel. Blocks like `upsert`.
    pub fn delete(&self, ids: &[VectorId]) -> Result<()> {
        let _mutate = self.write_lock.read();
        self.kernel.delete(ids)
    }

    /// Search the kernel. Reads never take the write lock.
    pub fn search(
        &self,
        queries: &[VectorWithId],
        top_n: usize,
        filters: &FilterSet,
        with_vector_data: bool,
    ) -> Result<Vec<SearchResult>> {
        self.kernel.search(queries, top_n, filters, with_vector_data)
    }

    /// Freeze the kernel for snapshot serialization.
    pub fn lock_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_lock.write()
    }

    /// Claim the one-at-a-time snapshot slot. Returns false when a save is
    /// already running on this handle.
    pub fn try_start_snapshot(&self) -> bool {
        self.snapshot_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the snapshot slot.
    pub fn finish_snapshot(&self) {
        self.snapshot_in_progress.store(false, Ordering::Release);
    }

    /// True while a save runs on this handle.
    pub fn snapshot_in_progress(&self) -> bool {
        self.snapshot_in_progress.load(Ordering::Acquire)
    }

    /// Serialize the kernel to `path`. Callers hold the write lock.
    pub fn save_kernel(&self, path: &Path) -> Result<()> {
        self.kernel.save(path)
    }

    /// Replace the kernel contents from a file written by `save_kernel`.
    pub fn load_kernel(&self, path: &Path) -> Result<()> {
        let _mutate = self.write_lock.read();
        self.kernel.load(path)
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("status", &self.status())
            .field("apply_log_index", &self.apply_log_index())
            .field("snapshot_log_index", &self.snapshot_log_index())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardvec_core::{DistanceMetric, IndexParameter, Vector};
    use shardvec_index::{new_kernel, ScrubPolicy};

    fn handle() -> Arc<VectorIndex> {
        let kernel = new_kernel(
            &IndexParameter::flat(2, DistanceMetric::L2),
            ScrubPolicy {
                save_log_behind: 10,
                rebuild_log_behind: 100,
            },
        )
        .unwrap();
        VectorIndex::new(7, kernel)
    }

    #[test]
    fn test_status_roundtrip() {
        let h = handle();
        assert_eq!(h.status(), IndexStatus::None);
        assert!(h.status().is_quiescent());
        h.set_status(IndexStatus::Rebuilding);
        assert_eq!(h.status(), IndexStatus::Rebuilding);
        assert!(!h.status().is_quiescent());
        h.set_status(IndexStatus::Normal);
        assert!(h.status().is_quiescent());
    }

    #[test]
    fn test_apply_log_index_is_monotonic() {
        let h = handle();
        h.set_apply_log_index(10);
        h.set_apply_log_index(5);
        assert_eq!(h.apply_log_index(), 10);
        h.set_apply_log_index(11);
        assert_eq!(h.apply_log_index(), 11);
    }

    #[test]
    fn test_snapshot_slot_is_exclusive() {
        let h = handle();
        assert!(h.try_start_snapshot());
        assert!(!h.try_start_snapshot());
        assert!(h.snapshot_in_progress());
        h.finish_snapshot();
        assert!(h.try_start_snapshot());
    }

    #[test]
    fn test_mutations_flow_through_kernel() {
        let h = handle();
        h.upsert(&[VectorWithId::with_vector(1, Vector::Float(vec![1.0, 0.0]))])
            .unwrap();
        assert_eq!(h.kernel().count(), 1);
        h.delete(&[1]).unwrap();
        assert_eq!(h.kernel().count(), 0);
    }

    #[test]
    fn test_version_tie_breaker() {
        let h = handle();
        assert_eq!(h.version(), 0);
        h.set_version(3);
        assert_eq!(h.version(), 3);
    }
}
