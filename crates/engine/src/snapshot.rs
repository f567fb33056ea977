//! Snapshot metadata and the per-index snapshot store.
//!
//! A durable snapshot is a directory `<index_root>/<index_id>/snapshot_<020
//! log id>/` holding the serialized kernel and a `meta` file with the log id
//! in decimal. Directories named `tmp_*` are in-flight writes and never
//! advertised. The store tracks registered snapshots per index; on-disk
//! removal happens when the last reference to a `SnapshotMeta` drops.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{info, warn};

use shardvec_core::codec::{
    index_data_file_name, is_tmp_snapshot_dir_name, parse_snapshot_dir_name, snapshot_dir_name,
    tmp_snapshot_dir_name, SNAPSHOT_META_FILE_NAME,
};
use shardvec_core::{Error, Region, Result};

/// One registered on-disk snapshot.
///
/// Owns its directory: dropping the last `Arc` removes it recursively,
/// unless `disarm` was called (used when registration is rejected and the
/// directory belongs to an already-registered snapshot).
pub struct SnapshotMeta {
    vector_index_id: u64,
    snapshot_log_id: u64,
    path: PathBuf,
    remove_on_drop: AtomicBool,
}

impl SnapshotMeta {
    /// Wrap a renamed snapshot directory, parsing the log id from its name.
    pub fn new(vector_index_id: u64, path: PathBuf) -> Result<Arc<Self>> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::internal(format!("bad snapshot path {}", path.display())))?;
        let snapshot_log_id = parse_snapshot_dir_name(name).ok_or_else(|| {
            Error::internal(format!("parse snapshot log id failed from {}", name))
        })?;
        Ok(Arc::new(SnapshotMeta {
            vector_index_id,
            snapshot_log_id,
            path,
            remove_on_drop: AtomicBool::new(true),
        }))
    }

    /// Index this snapshot belongs to.
    pub fn vector_index_id(&self) -> u64 {
        self.vector_index_id
    }

    /// WAL index as of which the snapshot was taken.
    pub fn snapshot_log_id(&self) -> u64 {
        self.snapshot_log_id
    }

    /// The snapshot directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the `meta` file.
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_META_FILE_NAME)
    }

    /// Path of the serialized kernel file.
    pub fn index_data_path(&self) -> PathBuf {
        self.path
            .join(index_data_file_name(self.vector_index_id, self.snapshot_log_id))
    }

    /// File names inside the snapshot directory.
    pub fn list_file_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Keep the directory on drop.
    pub fn disarm(&self) {
        self.remove_on_drop.store(false, Ordering::Release);
    }
}

impl Drop for SnapshotMeta {
    fn drop(&mut self) {
        if !self.remove_on_drop.load(Ordering::Acquire) {
            return;
        }
        info!(
            vector_index_id = self.vector_index_id,
            path = %self.path.display(),
            "delete vector index snapshot directory"
        );
        if let Err(error) = fs::remove_dir_all(&self.path) {
            warn!(
                path = %self.path.display(),
                %error,
                "remove snapshot directory failed"
            );
        }
    }
}

/// Snapshot directories under `parent`, newest name first, `tmp_*` skipped.
fn snapshot_paths(parent: &Path) -> Result<Vec<PathBuf>> {
    if !parent.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if !is_tmp_snapshot_dir_name(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort_by(|a, b| b.cmp(a));
    Ok(names.into_iter().map(|name| parent.join(name)).collect())
}

/// Per-index set of registered snapshots, keyed by snapshot log id.
pub struct SnapshotStore {
    index_root: PathBuf,
    snapshots: Mutex<HashMap<u64, BTreeMap<u64, Arc<SnapshotMeta>>>>,
}

impl SnapshotStore {
    /// Empty store rooted at `index_root`.
    pub fn new(index_root: PathBuf) -> Self {
        SnapshotStore {
            index_root,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Scan each region's snapshot directory and register what is on disk.
    /// Idempotent: snapshots already registered (installed from a peer
    /// before boot finished) are left alone.
    pub fn init(&self, regions: &[Arc<Region>]) -> Result<()> {
        for region in regions {
            let vector_index_id = region.id();
            for path in snapshot_paths(&self.snapshot_parent_path(vector_index_id))? {
                let snapshot = SnapshotMeta::new(vector_index_id, path)?;
                match self.add(snapshot) {
                    Ok(()) | Err(Error::SnapshotExists { .. }) => {}
                    Err(error) => return Err(error),
                }
            }
        }
        Ok(())
    }

    /// Snapshot parent directory for one index.
    pub fn snapshot_parent_path(&self, vector_index_id: u64) -> PathBuf {
        self.index_root.join(vector_index_id.to_string())
    }

    /// Fresh in-flight directory path for one index.
    pub fn snapshot_tmp_path(&self, vector_index_id: u64) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.snapshot_parent_path(vector_index_id)
            .join(tmp_snapshot_dir_name(nanos))
    }

    /// Final directory path for a snapshot at `snapshot_log_id`.
    pub fn snapshot_new_path(&self, vector_index_id: u64, snapshot_log_id: u64) -> PathBuf {
        self.snapshot_parent_path(vector_index_id)
            .join(snapshot_dir_name(snapshot_log_id))
    }

    /// Register a snapshot. Refuses duplicate log ids for the same index;
    /// the rejected meta is disarmed so the shared directory survives.
    pub fn add(&self, snapshot: Arc<SnapshotMeta>) -> Result<()> {
        let mut snapshots = self.snapshots.lock();
        let inner = snapshots.entry(snapshot.vector_index_id()).or_default();
        if inner.contains_key(&snapshot.snapshot_log_id()) {
            snapshot.disarm();
            return Err(Error::SnapshotExists {
                vector_index_id: snapshot.vector_index_id(),
                snapshot_log_id: snapshot.snapshot_log_id(),
            });
        }
        inner.insert(snapshot.snapshot_log_id(), snapshot);
        Ok(())
    }

    /// Deregister one snapshot. The directory goes away with the last
    /// outstanding reference.
    pub fn delete(&self, snapshot: &Arc<SnapshotMeta>) {
        let mut snapshots = self.snapshots.lock();
        if let Some(inner) = snapshots.get_mut(&snapshot.vector_index_id()) {
            inner.remove(&snapshot.snapshot_log_id());
        }
    }

    /// Deregister every snapshot of an index (region teardown).
    pub fn delete_all(&self, vector_index_id: u64) {
        let mut snapshots = self.snapshots.lock();
        snapshots.remove(&vector_index_id);
    }

    /// The snapshot with the greatest log id, if any.
    pub fn last(&self, vector_index_id: u64) -> Option<Arc<SnapshotMeta>> {
        let snapshots = self.snapshots.lock();
        snapshots
            .get(&vector_index_id)
            .and_then(|inner| inner.values().next_back().cloned())
    }

    /// All registered snapshots of an index, ascending by log id.
    pub fn all(&self, vector_index_id: u64) -> Vec<Arc<SnapshotMeta>> {
        let snapshots = self.snapshots.lock();
        snapshots
            .get(&vector_index_id)
            .map(|inner| inner.values().cloned().collect())
            .unwrap_or_default()
    }

    /// True iff the newest registered snapshot covers `snapshot_log_id`.
    pub fn has(&self, vector_index_id: u64, snapshot_log_id: u64) -> bool {
        self.last(vector_index_id)
            .is_some_and(|last| snapshot_log_id <= last.snapshot_log_id())
    }
}
