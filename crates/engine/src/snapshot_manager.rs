//! Snapshot lifecycle: save, load, ship, install.
//!
//! Saving serializes the kernel into a `tmp_<nanos>` directory while the
//! handle's write lock freezes mutations, writes the `meta` file, atomically
//! renames the directory to its `snapshot_<020 log id>` name, registers it
//! and deletes every older snapshot. Installing runs the receiver algorithm:
//! dedup check, chunked download into a tmp directory, re-check, rename,
//! register, retention.
//!
//! The saved image is exactly the kernel state at `apply_log_index`: the
//! write lock spans prepare + serialize, which is the fork-free rendition of
//! the copy-on-write child-process trick.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use shardvec_core::{Error, Region, Result, SafeMap, VectorIndexConfig};
use shardvec_index::{new_kernel, ScrubPolicy};
use shardvec_storage::LogStorageManager;

use crate::handle::VectorIndex;
use crate::raft::RaftRouter;
use crate::snapshot::{SnapshotMeta, SnapshotStore};
use crate::transport::{
    build_remote_uri, parse_remote_uri, CleanFileReaderRequest, FileReaderManager, GetFileRequest,
    GetFileResponse, GetVectorIndexSnapshotRequest, GetVectorIndexSnapshotResponse,
    InstallVectorIndexSnapshotRequest, NodeClient, SnapshotFileReader, VectorIndexSnapshotMeta,
};

/// Kernel scrub thresholds from the subsystem config.
pub(crate) fn scrub_policy(config: &VectorIndexConfig) -> ScrubPolicy {
    ScrubPolicy {
        save_log_behind: config.save_log_behind,
        rebuild_log_behind: config.rebuild_log_behind,
    }
}

/// Releases the per-handle snapshot slot on every exit path.
struct SnapshotSlotGuard<'a>(&'a VectorIndex);

impl Drop for SnapshotSlotGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_snapshot();
    }
}

/// Snapshot store plus the peer-facing snapshot flows.
pub struct VectorIndexSnapshotManager {
    config: Arc<VectorIndexConfig>,
    store: SnapshotStore,
    readers: FileReaderManager,
    client: Arc<dyn NodeClient>,
    raft_router: Arc<dyn RaftRouter>,
    log_storage_manager: Arc<LogStorageManager>,
    vector_indexes: Arc<SafeMap<u64, Arc<VectorIndex>>>,
}

impl VectorIndexSnapshotManager {
    /// Wire up a snapshot manager. `vector_indexes` is the same registry the
    /// index manager publishes handles into.
    pub fn new(
        config: Arc<VectorIndexConfig>,
        client: Arc<dyn NodeClient>,
        raft_router: Arc<dyn RaftRouter>,
        log_storage_manager: Arc<LogStorageManager>,
        vector_indexes: Arc<SafeMap<u64, Arc<VectorIndex>>>,
    ) -> Arc<Self> {
        let store = SnapshotStore::new(config.index_root.clone());
        Arc::new(VectorIndexSnapshotManager {
            config,
            store,
            readers: FileReaderManager::new(),
            client,
            raft_router,
            log_storage_manager,
            vector_indexes,
        })
    }

    /// Register on-disk snapshots for the given regions.
    pub fn init(&self, regions: &[Arc<Region>]) -> Result<()> {
        self.store.init(regions)
    }

    /// The snapshot store.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// True iff the index has any registered durable snapshot.
    pub fn is_exist_snapshot(&self, vector_index_id: u64) -> bool {
        self.store.last(vector_index_id).is_some()
    }

    /// Number of file readers currently registered for transfers.
    pub fn live_file_readers(&self) -> usize {
        self.readers.len()
    }

    // ========================================================================
    // Save / load
    // ========================================================================

    /// Serialize the handle's kernel into a new durable snapshot.
    ///
    /// Returns the snapshot log id. When the store already holds a snapshot
    /// at `>= apply_log_index`, returns that apply log id without touching
    /// disk. Kernels without a durable form yield a meta-only snapshot.
    pub fn save_vector_index_snapshot(&self, vector_index: &Arc<VectorIndex>) -> Result<u64> {
        let vector_index_id = vector_index.id();
        if !vector_index.try_start_snapshot() {
            return Err(Error::internal(format!(
                "save vector index {} is busy",
                vector_index_id
            )));
        }
        let _slot = SnapshotSlotGuard(vector_index);
        let start_time = Instant::now();

        // Freeze mutators; the serialized image is the state at this
        // apply_log_index.
        let write_guard = vector_index.lock_write();
        let apply_log_index = vector_index.apply_log_index();

        if self.store.has(vector_index_id, apply_log_index) {
            drop(write_guard);
            info!(
                vector_index_id,
                apply_log_index, "snapshot already exists, skip save"
            );
            return Ok(apply_log_index);
        }

        let tmp_path = self.store.snapshot_tmp_path(vector_index_id);
        if tmp_path.exists() {
            fs::remove_dir_all(&tmp_path)?;
        }
        fs::create_dir_all(&tmp_path)?;

        let index_file_path = tmp_path.join(shardvec_core::codec::index_data_file_name(
            vector_index_id,
            apply_log_index,
        ));
        match vector_index.save_kernel(&index_file_path) {
            Ok(()) => {}
            // No durable form: the snapshot is meta-only.
            Err(Error::Unsupported { .. }) => {}
            Err(error) => {
                drop(write_guard);
                let _ = fs::remove_dir_all(&tmp_path);
                return Err(error);
            }
        }
        drop(write_guard);

        fs::write(
            tmp_path.join(shardvec_core::codec::SNAPSHOT_META_FILE_NAME),
            apply_log_index.to_string(),
        )?;

        let new_path = self
            .store
            .snapshot_new_path(vector_index_id, apply_log_index);
        if let Err(error) = fs::rename(&tmp_path, &new_path) {
            let _ = fs::remove_dir_all(&tmp_path);
            return Err(error.into());
        }

        let stale = self.store.all(vector_index_id);
        let snapshot = SnapshotMeta::new(vector_index_id, new_path)?;
        self.store.add(snapshot)?;
        for old in stale {
            self.store.delete(&old);
        }

        if let Some(log_storage) = self.log_storage_manager.log_storage(vector_index_id) {
            log_storage.set_truncate_log_index(apply_log_index);
        }

        info!(
            vector_index_id,
            snapshot_log_id = apply_log_index,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "save vector index snapshot success"
        );
        Ok(apply_log_index)
    }

    /// Build a fresh handle from the newest durable snapshot.
    ///
    /// Any failure (no snapshot, missing kernel file, kernel load error)
    /// surfaces as an error; the caller falls through to a key-value build.
    pub fn load_vector_index_snapshot(&self, region: &Arc<Region>) -> Result<Arc<VectorIndex>> {
        let vector_index_id = region.id();
        let last_snapshot = self
            .store
            .last(vector_index_id)
            .ok_or(Error::SnapshotNotFound { vector_index_id })?;

        let index_data_path = last_snapshot.index_data_path();
        if !index_data_path.exists() {
            return Err(Error::not_found(format!(
                "snapshot kernel file {} not exist",
                index_data_path.display()
            )));
        }

        let kernel = new_kernel(region.index_parameter(), scrub_policy(&self.config))?;
        let vector_index = VectorIndex::new(vector_index_id, kernel);
        vector_index.load_kernel(&index_data_path)?;

        vector_index.set_snapshot_log_index(last_snapshot.snapshot_log_id());
        vector_index.set_apply_log_index(last_snapshot.snapshot_log_id());

        info!(
            vector_index_id,
            snapshot_log_id = last_snapshot.snapshot_log_id(),
            "load vector index from snapshot success"
        );
        Ok(vector_index)
    }

    // ========================================================================
    // Push / pull flows
    // ========================================================================

    /// Offer the newest snapshot to every follower. `SnapshotExists` and
    /// `SnapshotNotNeeded` from a peer are expected and non-fatal.
    pub fn install_snapshot_to_followers(&self, vector_index_id: u64) -> Result<()> {
        let start_time = Instant::now();
        let peers = self.raft_router.peers(vector_index_id)?;
        for peer in peers {
            if peer == self.config.server_addr {
                continue;
            }
            match self.launch_install_snapshot(&peer, vector_index_id) {
                Ok(()) => {}
                Err(error) if error.is_snapshot_conflict() => {
                    info!(vector_index_id, peer = %peer, %error, "peer declined snapshot");
                }
                Err(error) => {
                    error!(vector_index_id, peer = %peer, %error, "install snapshot to peer failed");
                }
            }
        }
        info!(
            vector_index_id,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "install snapshot to all followers finish"
        );
        Ok(())
    }

    /// Push the newest snapshot of an index to one peer.
    pub fn launch_install_snapshot(&self, peer: &str, vector_index_id: u64) -> Result<()> {
        let last_snapshot = self
            .store
            .last(vector_index_id)
            .ok_or(Error::SnapshotNotFound { vector_index_id })?;

        let reader_id = self
            .readers
            .add_reader(SnapshotFileReader::new(Arc::clone(&last_snapshot)));
        let request = InstallVectorIndexSnapshotRequest {
            uri: build_remote_uri(&self.config.server_addr, reader_id),
            meta: VectorIndexSnapshotMeta {
                vector_index_id,
                snapshot_log_index: last_snapshot.snapshot_log_id(),
                filenames: last_snapshot.list_file_names()?,
            },
        };

        let result = self.client.install_vector_index_snapshot(peer, request);
        self.readers.delete_reader(reader_id);
        result
    }

    /// Poll every peer for its snapshot log id and pull from the one
    /// reporting the maximum. No peer holding a snapshot is not an error.
    pub fn pull_last_snapshot_from_peers(&self, vector_index_id: u64) -> Result<()> {
        let start_time = Instant::now();
        let peers = self.raft_router.peers(vector_index_id)?;

        let mut offers: Vec<(String, GetVectorIndexSnapshotResponse)> = Vec::new();
        for peer in peers {
            if peer == self.config.server_addr {
                continue;
            }
            let request = GetVectorIndexSnapshotRequest { vector_index_id };
            match self.client.get_vector_index_snapshot(&peer, request) {
                Ok(response) => offers.push((peer, response)),
                Err(error) => {
                    info!(vector_index_id, peer = %peer, %error, "peer has no snapshot to offer");
                }
            }
        }

        let best = offers
            .iter()
            .enumerate()
            .filter(|(_, (_, response))| response.meta.snapshot_log_index > 0)
            .max_by_key(|(_, (_, response))| response.meta.snapshot_log_index)
            .map(|(i, _)| i);

        let Some(best) = best else {
            info!(vector_index_id, "other peers hold no vector index snapshot");
            self.clean_peer_readers(&offers);
            return Ok(());
        };

        let (peer, response) = &offers[best];
        let result = self.download_snapshot_file(&response.uri, &response.meta);
        self.clean_peer_readers(&offers);
        result?;

        info!(
            vector_index_id,
            peer = %peer,
            snapshot_log_id = response.meta.snapshot_log_index,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "pull vector index snapshot finish"
        );
        Ok(())
    }

    /// Release the readers peers registered while answering a pull scan.
    fn clean_peer_readers(&self, offers: &[(String, GetVectorIndexSnapshotResponse)]) {
        for (peer, response) in offers {
            if let Ok((_, reader_id)) = parse_remote_uri(&response.uri) {
                let request = CleanFileReaderRequest { reader_id };
                if let Err(error) = self.client.clean_file_reader(peer, request) {
                    warn!(peer = %peer, reader_id, %error, "clean remote file reader failed");
                }
            }
        }
    }

    // ========================================================================
    // Peer-facing handlers
    // ========================================================================

    /// A peer offers us a snapshot. Reject when a live index already serves
    /// this region; otherwise run the download path.
    pub fn handle_install_snapshot(
        &self,
        uri: &str,
        meta: &VectorIndexSnapshotMeta,
    ) -> Result<()> {
        let vector_index_id = meta.vector_index_id;
        if self
            .vector_indexes
            .get(&vector_index_id)
            .unwrap_or(None)
            .is_some()
        {
            return Err(Error::SnapshotNotNeeded { vector_index_id });
        }
        self.download_snapshot_file(uri, meta)
    }

    /// A peer asks for our latest snapshot: register a reader and offer it.
    pub fn handle_pull_snapshot(
        &self,
        vector_index_id: u64,
    ) -> Result<GetVectorIndexSnapshotResponse> {
        let last_snapshot = self
            .store
            .last(vector_index_id)
            .ok_or(Error::SnapshotNotFound { vector_index_id })?;

        let reader_id = self
            .readers
            .add_reader(SnapshotFileReader::new(Arc::clone(&last_snapshot)));
        Ok(GetVectorIndexSnapshotResponse {
            uri: build_remote_uri(&self.config.server_addr, reader_id),
            meta: VectorIndexSnapshotMeta {
                vector_index_id,
                snapshot_log_index: last_snapshot.snapshot_log_id(),
                filenames: last_snapshot.list_file_names()?,
            },
        })
    }

    /// Serve one chunk of a registered reader's file.
    pub fn handle_get_file(&self, request: &GetFileRequest) -> Result<GetFileResponse> {
        let reader = self.readers.reader(request.reader_id).ok_or_else(|| {
            Error::not_found(format!("file reader {} not found", request.reader_id))
        })?;
        reader.read_chunk(&request.filename, request.offset, request.size)
    }

    /// Drop a registered reader.
    pub fn handle_clean_file_reader(&self, request: &CleanFileReaderRequest) {
        self.readers.delete_reader(request.reader_id);
    }

    // ========================================================================
    // Receiver algorithm
    // ========================================================================

    /// Download a peer's snapshot into a tmp directory, then publish it.
    pub fn download_snapshot_file(
        &self,
        uri: &str,
        meta: &VectorIndexSnapshotMeta,
    ) -> Result<()> {
        let (peer_addr, reader_id) = parse_remote_uri(uri)?;
        let vector_index_id = meta.vector_index_id;

        if self.store.has(vector_index_id, meta.snapshot_log_index) {
            return Err(Error::SnapshotExists {
                vector_index_id,
                snapshot_log_id: meta.snapshot_log_index,
            });
        }

        let tmp_path = self.store.snapshot_tmp_path(vector_index_id);
        if tmp_path.exists() {
            fs::remove_dir_all(&tmp_path)?;
        }
        fs::create_dir_all(&tmp_path)?;

        let result = self.download_into(&tmp_path, &peer_addr, reader_id, meta);
        if let Err(error) = result {
            let _ = fs::remove_dir_all(&tmp_path);
            return Err(error);
        }

        // A concurrent install may have published meanwhile.
        if self.store.has(vector_index_id, meta.snapshot_log_index) {
            let _ = fs::remove_dir_all(&tmp_path);
            return Err(Error::SnapshotExists {
                vector_index_id,
                snapshot_log_id: meta.snapshot_log_index,
            });
        }

        let new_path = self
            .store
            .snapshot_new_path(vector_index_id, meta.snapshot_log_index);
        if let Err(error) = fs::rename(&tmp_path, &new_path) {
            let _ = fs::remove_dir_all(&tmp_path);
            return Err(error.into());
        }

        let stale = self.store.all(vector_index_id);
        let snapshot = SnapshotMeta::new(vector_index_id, new_path)?;
        self.store.add(snapshot)?;
        for old in stale {
            self.store.delete(&old);
        }

        info!(
            vector_index_id,
            snapshot_log_id = meta.snapshot_log_index,
            "install vector index snapshot success"
        );
        Ok(())
    }

    fn download_into(
        &self,
        tmp_path: &Path,
        peer_addr: &str,
        reader_id: u64,
        meta: &VectorIndexSnapshotMeta,
    ) -> Result<()> {
        for filename in &meta.filenames {
            if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
                return Err(Error::illegal_parameters(format!(
                    "bad snapshot file name {}",
                    filename
                )));
            }
            let file_path = tmp_path.join(filename);
            let mut content: Vec<u8> = Vec::new();
            let mut offset = 0u64;
            loop {
                let request = GetFileRequest {
                    reader_id,
                    filename: filename.clone(),
                    offset,
                    size: self.config.file_transfer_chunk_size as u64,
                };
                let response = self.client.get_file(peer_addr, request)?;
                content.extend_from_slice(&response.data);
                if response.eof {
                    break;
                }
                offset += response.read_size;
            }
            fs::write(&file_path, content)?;
        }
        Ok(())
    }
}
