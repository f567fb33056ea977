//! Per-index lifecycle management.
//!
//! The manager owns the registry of published index handles and drives every
//! lifecycle transition: load-or-build at boot, background rebuilds with a
//! two-round WAL catch-up, snapshot saves, the periodic scrubber, and the
//! raft apply path that routes mutations to the current handle.
//!
//! ## Rebuild ordering
//!
//! A rebuild constructs a candidate from the key-value data, optionally
//! saves it, then replays the WAL twice. During the first round writers
//! still mutate the old handle; the region's switching flag then redirects
//! them, and the second round catches whatever the old handle absorbed in
//! the gap. Only then is the candidate published, atomically, over the old
//! handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use shardvec_core::codec::{
    apply_log_id_meta_key, decode_apply_log_id, decode_vector_id, encode_apply_log_id,
    fill_vector_data_prefix, snapshot_log_id_meta_key,
};
use shardvec_core::{
    Error, Region, Result, SafeMap, StoreRegionMeta, Vector, VectorId, VectorIndexConfig,
    VectorWithId,
};
use shardvec_index::new_kernel;
use shardvec_storage::{
    IteratorOptions, LogStorageManager, MetaReader, MetaWriter, RawEngine, RaftCommand,
    CommandRequest, CF_STORE_DATA,
};

use crate::handle::{IndexStatus, VectorIndex};
use crate::raft::RaftRouter;
use crate::snapshot_manager::{scrub_policy, VectorIndexSnapshotManager};
use crate::transport::NodeClient;

/// How long a redirected writer waits before retrying the publish lookup.
const SWITCHING_RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// How long an async rebuild waits between quiescence polls.
const REBUILD_WAIT_INTERVAL: Duration = Duration::from_secs(2);

/// Clears the region's switching flag on every exit path.
struct SwitchingGuard<'a>(&'a Region);

impl Drop for SwitchingGuard<'_> {
    fn drop(&mut self) {
        self.0.set_switching_vector_index(false);
    }
}

/// Lifecycle manager for all vector indexes on this node.
pub struct VectorIndexManager {
    config: Arc<VectorIndexConfig>,
    raw_engine: Arc<dyn RawEngine>,
    meta_reader: MetaReader,
    meta_writer: MetaWriter,
    log_storage_manager: Arc<LogStorageManager>,
    region_meta: Arc<StoreRegionMeta>,
    raft_router: Arc<dyn RaftRouter>,
    snapshot_manager: Arc<VectorIndexSnapshotManager>,
    vector_indexes: Arc<SafeMap<u64, Arc<VectorIndex>>>,
}

impl VectorIndexManager {
    /// Wire up a manager and its snapshot manager.
    pub fn new(
        config: Arc<VectorIndexConfig>,
        raw_engine: Arc<dyn RawEngine>,
        log_storage_manager: Arc<LogStorageManager>,
        region_meta: Arc<StoreRegionMeta>,
        raft_router: Arc<dyn RaftRouter>,
        node_client: Arc<dyn NodeClient>,
    ) -> Arc<Self> {
        let vector_indexes: Arc<SafeMap<u64, Arc<VectorIndex>>> = Arc::new(SafeMap::new());
        let snapshot_manager = VectorIndexSnapshotManager::new(
            Arc::clone(&config),
            node_client,
            Arc::clone(&raft_router),
            Arc::clone(&log_storage_manager),
            Arc::clone(&vector_indexes),
        );
        Arc::new(VectorIndexManager {
            meta_reader: MetaReader::new(Arc::clone(&raw_engine)),
            meta_writer: MetaWriter::new(Arc::clone(&raw_engine)),
            config,
            raw_engine,
            log_storage_manager,
            region_meta,
            raft_router,
            snapshot_manager,
            vector_indexes,
        })
    }

    /// The snapshot manager serving this node.
    pub fn snapshot_manager(&self) -> &Arc<VectorIndexSnapshotManager> {
        &self.snapshot_manager
    }

    /// The subsystem configuration.
    pub fn config(&self) -> &Arc<VectorIndexConfig> {
        &self.config
    }

    // ========================================================================
    // Boot
    // ========================================================================

    /// Initialize the snapshot store from disk, then load or build every
    /// region's index in parallel.
    pub fn init(self: &Arc<Self>, regions: &[Arc<Region>]) -> Result<()> {
        self.snapshot_manager.init(regions)?;
        self.parallel_load_or_build_vector_index(
            regions.to_vec(),
            self.config.load_or_build_concurrency,
        )
    }

    /// Best-effort parallel load across worker threads with an atomic offset
    /// counter for work distribution. Any region failing fails the call.
    pub fn parallel_load_or_build_vector_index(
        self: &Arc<Self>,
        regions: Vec<Arc<Region>>,
        concurrency: usize,
    ) -> Result<()> {
        if regions.is_empty() {
            return Ok(());
        }
        let offset = AtomicUsize::new(0);
        let failures = AtomicUsize::new(0);
        let workers = concurrency.max(1).min(regions.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = offset.fetch_add(1, Ordering::AcqRel);
                    if index >= regions.len() {
                        break;
                    }
                    let region = &regions[index];
                    info!(region_id = region.id(), "init load region vector index");
                    if let Err(err) = self.load_or_build_vector_index(region) {
                        error!(region_id = region.id(), error = %err, "load region vector index failed");
                        failures.fetch_add(1, Ordering::AcqRel);
                    }
                });
            }
        });

        if failures.load(Ordering::Acquire) > 0 {
            return Err(Error::internal("load or build vector index failed"));
        }
        Ok(())
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Publish a handle. `force` replaces unconditionally (rebuild publish);
    /// otherwise only an already-registered id is replaced.
    pub fn add_vector_index(&self, vector_index: &Arc<VectorIndex>, force: bool) -> Result<bool> {
        let applied = if force {
            self.vector_indexes
                .put(vector_index.id(), Arc::clone(vector_index))?
        } else {
            self.vector_indexes
                .put_if_exists(vector_index.id(), Arc::clone(vector_index))?
        };
        Ok(applied > 0)
    }

    /// Create and publish an empty index for a freshly created region.
    pub fn create_vector_index(&self, region: &Arc<Region>) -> Result<Arc<VectorIndex>> {
        let vector_index_id = region.id();
        let kernel = new_kernel(region.index_parameter(), scrub_policy(&self.config))?;
        let vector_index = VectorIndex::new(vector_index_id, kernel);
        vector_index.set_status(IndexStatus::Normal);
        self.add_vector_index(&vector_index, true)?;
        info!(vector_index_id, "add region vector index success");
        Ok(vector_index)
    }

    /// The published handle for an index id.
    pub fn get_vector_index(&self, vector_index_id: u64) -> Option<Arc<VectorIndex>> {
        self.vector_indexes.get(&vector_index_id).unwrap_or(None)
    }

    /// The handle a region reads through: its shared index when one is set
    /// (region splits), otherwise its own.
    pub fn get_vector_index_for_region(&self, region: &Arc<Region>) -> Option<Arc<VectorIndex>> {
        if let Some(share_id) = region.share_vector_index_id() {
            if let Some(shared) = self.get_vector_index(share_id) {
                info!(region_id = region.id(), share_id, "use share vector index");
                return Some(shared);
            }
        }
        self.get_vector_index(region.id())
    }

    /// All published handles.
    pub fn get_all_vector_indexes(&self) -> Vec<Arc<VectorIndex>> {
        self.vector_indexes.get_all_values(None).unwrap_or_default()
    }

    /// Remove an index: unpublish the handle, mark it terminal and delete
    /// both persisted meta keys. Durable snapshots stay on disk until a
    /// newer publish or `delete_snapshots`.
    pub fn delete_vector_index(&self, vector_index_id: u64) {
        info!(vector_index_id, "delete region vector index");
        if let Some(vector_index) = self.get_vector_index(vector_index_id) {
            let _ = self.vector_indexes.erase(&vector_index_id);
            vector_index.set_status(IndexStatus::Delete);

            if let Err(err) = self
                .meta_writer
                .delete(&apply_log_id_meta_key(vector_index_id))
            {
                warn!(vector_index_id, error = %err, "delete apply log id meta failed");
            }
            if let Err(err) = self
                .meta_writer
                .delete(&snapshot_log_id_meta_key(vector_index_id))
            {
                warn!(vector_index_id, error = %err, "delete snapshot log id meta failed");
            }
        }
    }

    /// Garbage-collect every durable snapshot of an index (region teardown).
    pub fn delete_snapshots(&self, vector_index_id: u64) {
        self.snapshot_manager.store().delete_all(vector_index_id);
    }

    // ========================================================================
    // Load or build
    // ========================================================================

    /// Load from the newest snapshot and replay the WAL tail; fall back to a
    /// full key-value build. The previously published handle (if any) stays
    /// intact on failure.
    pub fn load_or_build_vector_index(&self, region: &Arc<Region>) -> Result<()> {
        let vector_index_id = region.id();
        let online_vector_index = self.get_vector_index(vector_index_id);
        let set_online_status = |status: IndexStatus| {
            if let Some(online) = &online_vector_index {
                online.set_status(status);
            }
        };

        set_online_status(IndexStatus::Loading);

        match self.snapshot_manager.load_vector_index_snapshot(region) {
            Ok(new_vector_index) => {
                info!(
                    vector_index_id,
                    "load vector index from snapshot success, will replay wal"
                );
                match self.replay_wal_to_vector_index(
                    &new_vector_index,
                    new_vector_index.apply_log_index() + 1,
                    u64::MAX,
                ) {
                    Ok(()) => {
                        info!(
                            vector_index_id,
                            apply_log_index = new_vector_index.apply_log_index(),
                            "replay wal success"
                        );
                        new_vector_index.set_status(IndexStatus::Normal);
                        self.add_vector_index(&new_vector_index, true)?;
                        set_online_status(IndexStatus::Normal);
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(vector_index_id, error = %err, "replay wal failed, will build vector index");
                    }
                }
            }
            Err(err) => {
                info!(vector_index_id, error = %err, "load vector index from snapshot failed, will build vector index");
            }
        }

        let new_vector_index = match self.build_vector_index(region) {
            Ok(vector_index) => vector_index,
            Err(err) => {
                warn!(vector_index_id, error = %err, "build vector index failed");
                set_online_status(IndexStatus::Normal);
                return Err(Error::internal(format!(
                    "build vector index failed, vector index id {}",
                    vector_index_id
                )));
            }
        };

        new_vector_index.set_status(IndexStatus::Normal);
        self.add_vector_index(&new_vector_index, true)?;
        set_online_status(IndexStatus::Normal);
        info!(vector_index_id, "build vector index success");
        Ok(())
    }

    /// Construct a fresh index from the region's `data` keyspace.
    ///
    /// The handle's log ids come from the persisted meta store; the scan
    /// runs under the region range mapped into the data keyspace, skipping
    /// records that fail to parse or carry no values.
    pub fn build_vector_index(&self, region: &Arc<Region>) -> Result<Arc<VectorIndex>> {
        let vector_index_id = region.id();
        let kernel = new_kernel(region.index_parameter(), scrub_policy(&self.config))?;
        let vector_index = VectorIndex::new(vector_index_id, kernel);
        vector_index.set_status(IndexStatus::Building);

        let apply_log_id = self.load_apply_log_id(vector_index_id)?;
        vector_index.set_apply_log_index(apply_log_id);
        let snapshot_log_id = self.load_snapshot_log_id(vector_index_id)?;
        vector_index.set_snapshot_log_index(snapshot_log_id);

        let start_key = fill_vector_data_prefix(&region.range().start_key);
        let end_key = fill_vector_data_prefix(&region.range().end_key);
        info!(
            vector_index_id,
            snapshot_log_id, apply_log_id, "build vector index from key-value scan"
        );

        let start_time = Instant::now();
        let mut iter = self.raw_engine.iter(
            CF_STORE_DATA,
            IteratorOptions {
                lower_bound: None,
                upper_bound: Some(end_key),
            },
        )?;

        let mut batch: Vec<VectorWithId> = Vec::with_capacity(self.config.build_batch_size);
        let mut count = 0u64;
        iter.seek(&start_key);
        while iter.valid() {
            let id = decode_vector_id(iter.key());
            match rmp_serde::from_slice::<Vector>(iter.value()) {
                Ok(vector) if !vector.is_empty() => {
                    count += 1;
                    batch.push(VectorWithId::with_vector(id, vector));
                    if batch.len() >= self.config.build_batch_size {
                        vector_index.upsert(&batch)?;
                        batch.clear();
                    }
                }
                Ok(_) => {
                    warn!(vector_index_id, id, "vector record has no values, skip");
                }
                Err(err) => {
                    warn!(vector_index_id, id, error = %err, "parse vector record failed, skip");
                }
            }
            iter.next();
        }
        if !batch.is_empty() {
            vector_index.upsert(&batch)?;
        }

        info!(
            vector_index_id,
            count,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "build vector index finish"
        );
        Ok(vector_index)
    }

    // ========================================================================
    // WAL replay
    // ========================================================================

    /// Apply WAL entries in `[start_log_id, end_log_id]` to the handle.
    ///
    /// Adds are buffered up to the replay batch size; pending adds flush
    /// before any delete to preserve command ordering. Entries that fail to
    /// decode and unknown command types are skipped. On return the handle's
    /// apply log index covers the last entry seen.
    pub fn replay_wal_to_vector_index(
        &self,
        vector_index: &Arc<VectorIndex>,
        start_log_id: u64,
        end_log_id: u64,
    ) -> Result<()> {
        let vector_index_id = vector_index.id();
        info!(vector_index_id, start_log_id, end_log_id, "replay wal");
        let start_time = Instant::now();

        // A region without a raft node cannot replay.
        self.raft_router.peers(vector_index_id)?;
        let log_storage = self
            .log_storage_manager
            .log_storage(vector_index_id)
            .ok_or_else(|| {
                Error::internal(format!("not found log storage {}", vector_index_id))
            })?;

        let entries = log_storage.entries(start_log_id, end_log_id)?;
        let mut pending: Vec<VectorWithId> = Vec::with_capacity(self.config.replay_batch_size);
        let mut last_log_id = vector_index.apply_log_index();

        for entry in entries {
            let command = match RaftCommand::from_bytes(&entry.data) {
                Ok(command) => command,
                Err(err) => {
                    warn!(vector_index_id, log_id = entry.index, error = %err, "decode wal entry failed, skip");
                    last_log_id = entry.index;
                    continue;
                }
            };
            for request in command.requests {
                match request {
                    CommandRequest::VectorAdd { vectors } => {
                        pending.extend(vectors);
                        if pending.len() >= self.config.replay_batch_size {
                            vector_index.upsert(&pending)?;
                            pending.clear();
                        }
                    }
                    CommandRequest::VectorDelete { ids } => {
                        if !pending.is_empty() {
                            vector_index.upsert(&pending)?;
                            pending.clear();
                        }
                        vector_index.delete(&ids)?;
                    }
                    _ => {}
                }
            }
            last_log_id = entry.index;
        }
        if !pending.is_empty() {
            vector_index.upsert(&pending)?;
        }

        vector_index.set_apply_log_index(last_log_id);
        info!(
            vector_index_id,
            start_log_id,
            end_log_id,
            last_log_id,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "replay wal finish"
        );
        Ok(())
    }

    // ========================================================================
    // Rebuild
    // ========================================================================

    /// Rebuild a region's index and atomically swap it in.
    ///
    /// Writers keep mutating the old handle through the first replay round;
    /// the switching flag then makes them retry until the candidate is
    /// published, and the second round drains the gap.
    pub fn rebuild_vector_index(&self, region: &Arc<Region>, need_save: bool) -> Result<()> {
        let vector_index_id = region.id();
        info!(vector_index_id, need_save, "start rebuild vector index");

        let online_vector_index = self.get_vector_index(vector_index_id);
        if let Some(online) = &online_vector_index {
            let status = online.status();
            if !status.is_quiescent() {
                warn!(vector_index_id, ?status, "vector index not quiescent, refuse rebuild");
                return Err(Error::internal(format!(
                    "vector index {} status {:?} cannot rebuild",
                    vector_index_id, status
                )));
            }
            online.set_status(IndexStatus::Rebuilding);
        }
        let fail_online = || {
            if let Some(online) = &online_vector_index {
                online.set_status(IndexStatus::Error);
            }
        };

        let start_time = Instant::now();
        let vector_index = match self.build_vector_index(region) {
            Ok(vector_index) => vector_index,
            Err(err) => {
                fail_online();
                warn!(vector_index_id, error = %err, "rebuild: build vector index failed");
                return Err(err);
            }
        };
        if let Some(online) = &online_vector_index {
            vector_index.set_version(online.version() + 1);
        }
        info!(
            vector_index_id,
            apply_log_index = vector_index.apply_log_index(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "rebuild: build success"
        );

        // Save before the catch-up rounds so the writer-blocked window stays
        // as small as possible.
        if need_save {
            if let Err(err) = self.save_vector_index(&vector_index) {
                fail_online();
                warn!(vector_index_id, error = %err, "rebuild: save vector index failed");
                return Err(err);
            }
        }

        vector_index.set_status(IndexStatus::Replaying);
        if let Err(err) = self.replay_wal_to_vector_index(
            &vector_index,
            vector_index.apply_log_index() + 1,
            u64::MAX,
        ) {
            fail_online();
            error!(vector_index_id, error = %err, "rebuild: replay wal failed first-round");
            return Err(err);
        }
        info!(
            vector_index_id,
            apply_log_index = vector_index.apply_log_index(),
            "rebuild: replay wal success first-round"
        );

        // Writers now retry until the new handle is published.
        region.set_switching_vector_index(true);
        {
            let _switching = SwitchingGuard(region);

            if let Err(err) = self.replay_wal_to_vector_index(
                &vector_index,
                vector_index.apply_log_index() + 1,
                u64::MAX,
            ) {
                fail_online();
                error!(vector_index_id, error = %err, "rebuild: replay wal failed catch-up round");
                return Err(err);
            }
            info!(
                vector_index_id,
                apply_log_index = vector_index.apply_log_index(),
                "rebuild: replay wal success catch-up round"
            );

            vector_index.set_status(IndexStatus::Normal);
            self.add_vector_index(&vector_index, true)?;
        }

        region.set_share_vector_index_id(None);
        info!(vector_index_id, "rebuild vector index success");
        Ok(())
    }

    /// Rebuild on a background thread, waiting for the handle to quiesce
    /// first. On followers, the handle is deleted afterwards unless the
    /// configuration holds follower indexes in memory.
    pub fn async_rebuild_vector_index(
        self: &Arc<Self>,
        region: &Arc<Region>,
        need_save: bool,
    ) -> Result<()> {
        info!(region_id = region.id(), "async rebuild vector index");
        let manager = Arc::clone(self);
        let region = Arc::clone(region);

        thread::Builder::new()
            .name(format!("shardvec-rebuild-{}", region.id()))
            .spawn(move || {
                loop {
                    match manager.get_vector_index(region.id()) {
                        None => break,
                        Some(vector_index)
                            if matches!(
                                vector_index.status(),
                                IndexStatus::Rebuilding
                                    | IndexStatus::Snapshotting
                                    | IndexStatus::Building
                                    | IndexStatus::Replaying
                            ) =>
                        {
                            info!(region_id = region.id(), "waiting rebuild vector index");
                            thread::sleep(REBUILD_WAIT_INTERVAL);
                        }
                        Some(_) => break,
                    }
                }

                if let Err(err) = manager.rebuild_vector_index(&region, need_save) {
                    error!(region_id = region.id(), error = %err, "rebuild vector index failed");
                }

                if !manager.config.enable_follower_hold_index {
                    match manager.raft_router.is_leader(region.id()) {
                        Ok(true) => {}
                        Ok(false) => manager.delete_vector_index(region.id()),
                        Err(err) => {
                            error!(region_id = region.id(), error = %err, "no raft node for region");
                        }
                    }
                }
            })
            .map_err(|err| Error::internal(format!("spawn rebuild thread failed: {}", err)))?;
        Ok(())
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Save a durable snapshot of the handle and ship it to followers.
    /// On failure the handle reverts to `Normal` and keeps serving.
    pub fn save_vector_index(&self, vector_index: &Arc<VectorIndex>) -> Result<()> {
        let vector_index_id = vector_index.id();
        info!(vector_index_id, "save vector index");
        vector_index.set_status(IndexStatus::Snapshotting);

        let snapshot_log_index = match self
            .snapshot_manager
            .save_vector_index_snapshot(vector_index)
        {
            Ok(snapshot_log_index) => snapshot_log_index,
            Err(err) => {
                error!(vector_index_id, error = %err, "save vector index snapshot failed");
                vector_index.set_status(IndexStatus::Normal);
                return Err(err);
            }
        };
        self.update_snapshot_log_id(vector_index, snapshot_log_index)?;
        vector_index.set_status(IndexStatus::Normal);

        if let Err(err) = self
            .snapshot_manager
            .install_snapshot_to_followers(vector_index_id)
        {
            error!(vector_index_id, error = %err, "install snapshot to followers failed");
        }
        Ok(())
    }

    // ========================================================================
    // Persisted log ids
    // ========================================================================

    /// Persist an index's apply log id.
    pub fn save_apply_log_id(&self, vector_index_id: u64, apply_log_id: u64) -> Result<()> {
        self.meta_writer.put(
            &apply_log_id_meta_key(vector_index_id),
            encode_apply_log_id(apply_log_id),
        )
    }

    /// Read an index's persisted apply log id; 0 when never written.
    pub fn load_apply_log_id(&self, vector_index_id: u64) -> Result<u64> {
        match self.meta_reader.get(&apply_log_id_meta_key(vector_index_id))? {
            Some(value) => decode_apply_log_id(&value),
            None => Ok(0),
        }
    }

    /// Persist an index's snapshot log id.
    pub fn save_snapshot_log_id(&self, vector_index_id: u64, snapshot_log_id: u64) -> Result<()> {
        self.meta_writer.put(
            &snapshot_log_id_meta_key(vector_index_id),
            encode_apply_log_id(snapshot_log_id),
        )
    }

    /// Read an index's persisted snapshot log id; 0 when never written.
    pub fn load_snapshot_log_id(&self, vector_index_id: u64) -> Result<u64> {
        match self
            .meta_reader
            .get(&snapshot_log_id_meta_key(vector_index_id))?
        {
            Some(value) => decode_apply_log_id(&value),
            None => Ok(0),
        }
    }

    /// Advance a handle's apply log id, in memory and persisted.
    pub fn update_apply_log_id(
        &self,
        vector_index: &Arc<VectorIndex>,
        log_index: u64,
    ) -> Result<()> {
        vector_index.set_apply_log_index(log_index);
        self.save_apply_log_id(vector_index.id(), log_index)
    }

    /// Record a handle's snapshot log id, in memory and persisted.
    pub fn update_snapshot_log_id(
        &self,
        vector_index: &Arc<VectorIndex>,
        log_index: u64,
    ) -> Result<()> {
        vector_index.set_snapshot_log_index(log_index);
        self.save_snapshot_log_id(vector_index.id(), log_index)
    }

    // ========================================================================
    // Raft apply path
    // ========================================================================

    /// Route a committed vector-add to the current handle, retrying while a
    /// rebuild is switching handles.
    pub fn apply_vector_add(
        &self,
        region: &Arc<Region>,
        vectors: &[VectorWithId],
        log_index: u64,
    ) -> Result<()> {
        loop {
            if region.is_switching_vector_index() {
                thread::sleep(SWITCHING_RETRY_INTERVAL);
                continue;
            }
            let vector_index = self.get_vector_index_for_region(region).ok_or(
                Error::VectorIndexNotFound {
                    vector_index_id: region.id(),
                },
            )?;
            vector_index.upsert(vectors)?;
            return self.update_apply_log_id(&vector_index, log_index);
        }
    }

    /// Route a committed vector-delete to the current handle, retrying while
    /// a rebuild is switching handles.
    pub fn apply_vector_delete(
        &self,
        region: &Arc<Region>,
        ids: &[VectorId],
        log_index: u64,
    ) -> Result<()> {
        loop {
            if region.is_switching_vector_index() {
                thread::sleep(SWITCHING_RETRY_INTERVAL);
                continue;
            }
            let vector_index = self.get_vector_index_for_region(region).ok_or(
                Error::VectorIndexNotFound {
                    vector_index_id: region.id(),
                },
            )?;
            vector_index.delete(ids)?;
            return self.update_apply_log_id(&vector_index, log_index);
        }
    }

    // ========================================================================
    // Scrubber
    // ========================================================================

    /// Periodic sweep: for each alive region, measure how far the apply log
    /// runs past the last durable snapshot and let the kernel decide whether
    /// to rebuild or save.
    pub fn scrub_vector_index(&self) -> Result<()> {
        let regions = self.region_meta.alive_regions();
        if regions.is_empty() {
            info!("no alive region, skip scrub vector index");
            return Ok(());
        }
        info!(region_count = regions.len(), "scrub vector index start");

        for region in regions {
            let vector_index_id = region.id();
            let Some(vector_index) = self.get_vector_index(vector_index_id) else {
                continue;
            };

            let last_snapshot_log_id = self
                .snapshot_manager
                .store()
                .last(vector_index_id)
                .map(|snapshot| snapshot.snapshot_log_id())
                .unwrap_or(0);
            let log_behind = vector_index
                .apply_log_index()
                .saturating_sub(last_snapshot_log_id);

            let need_rebuild = vector_index.kernel().needs_rebuild(log_behind);
            let need_save = vector_index.kernel().needs_save(log_behind);
            if !need_rebuild && !need_save {
                continue;
            }

            info!(vector_index_id, need_rebuild, need_save, log_behind, "scrub vector index");
            if let Err(err) = self.scrub_region_vector_index(&region, need_rebuild, need_save) {
                error!(vector_index_id, error = %err, "scrub vector index failed");
            }
        }
        Ok(())
    }

    /// Act on one region's scrub decision. Skips handles not in `Normal`.
    fn scrub_region_vector_index(
        &self,
        region: &Arc<Region>,
        need_rebuild: bool,
        need_save: bool,
    ) -> Result<()> {
        let vector_index_id = region.id();
        let vector_index = self
            .get_vector_index(vector_index_id)
            .ok_or(Error::VectorIndexNotFound { vector_index_id })?;
        if vector_index.status() != IndexStatus::Normal {
            info!(vector_index_id, "vector index status not normal, skip scrub");
            return Ok(());
        }

        if need_rebuild {
            self.rebuild_vector_index(region, true)?;
        } else if need_save {
            self.save_vector_index(&vector_index)?;
        }
        Ok(())
    }
}
