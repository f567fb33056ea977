//! Shared harness: an in-process node with an in-memory engine, raft log,
//! region registry and the in-process snapshot transport.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use shardvec_core::codec::{
    encode_raw_key, encode_vector_data_key, encode_vector_scalar_key, encode_vector_table_key,
};
use shardvec_core::{
    IndexParameter, Range, Region, RegionDefinition, RegionState, ScalarData, StoreRegionMeta,
    Vector, VectorId, VectorIndexConfig, VectorWithId,
};
use shardvec_engine::{
    InProcessNodeClient, MemRaftRouter, VectorIndexManager, VectorReader,
};
use shardvec_storage::{
    KvWriter, LogStorage, LogStorageManager, MemEngine, MemLogStorage, RaftCommand, RawEngine,
    CF_STORE_DATA,
};

/// One in-process node.
pub struct TestNode {
    pub addr: String,
    pub config: Arc<VectorIndexConfig>,
    pub engine: Arc<MemEngine>,
    pub log_storage_manager: Arc<LogStorageManager>,
    pub region_meta: Arc<StoreRegionMeta>,
    pub raft_router: Arc<MemRaftRouter>,
    pub manager: Arc<VectorIndexManager>,
    pub reader: VectorReader,
    _index_dir: TempDir,
}

impl TestNode {
    /// Build a node registered on the shared in-process transport.
    pub fn new(addr: &str, client: &Arc<InProcessNodeClient>) -> TestNode {
        Self::with_config_tweak(addr, client, |_| {})
    }

    /// Build a node, letting the caller adjust the config first.
    pub fn with_config_tweak(
        addr: &str,
        client: &Arc<InProcessNodeClient>,
        tweak: impl FnOnce(&mut VectorIndexConfig),
    ) -> TestNode {
        let index_dir = TempDir::new().unwrap();
        let mut config = VectorIndexConfig {
            index_root: index_dir.path().to_path_buf(),
            server_addr: addr.to_string(),
            ..Default::default()
        };
        tweak(&mut config);
        let config = Arc::new(config);

        let engine = Arc::new(MemEngine::new());
        let raw_engine_concrete = Arc::clone(&engine);
        let raw_engine: Arc<dyn RawEngine> = raw_engine_concrete;
        let log_storage_manager = Arc::new(LogStorageManager::new());
        let region_meta = Arc::new(StoreRegionMeta::new());
        let raft_router = Arc::new(MemRaftRouter::new(addr));

        let raft_router_concrete = Arc::clone(&raft_router);
        let raft_dyn: Arc<dyn shardvec_engine::RaftRouter> = raft_router_concrete;
        let client_concrete = Arc::clone(client);
        let client_dyn: Arc<dyn shardvec_engine::NodeClient> = client_concrete;
        let manager = VectorIndexManager::new(
            Arc::clone(&config),
            Arc::clone(&raw_engine),
            Arc::clone(&log_storage_manager),
            Arc::clone(&region_meta),
            raft_dyn,
            client_dyn,
        );
        client.register_node(addr, Arc::clone(manager.snapshot_manager()));

        let kv_reader_concrete = Arc::clone(&engine);
        let kv_reader: Arc<dyn shardvec_storage::KvReader> = kv_reader_concrete;
        TestNode {
            addr: addr.to_string(),
            config,
            reader: VectorReader::new(kv_reader),
            engine,
            log_storage_manager,
            region_meta,
            raft_router,
            manager,
            _index_dir: index_dir,
        }
    }

    /// Restart: a fresh manager over the same engine, log and snapshot
    /// directory, registered under the same address.
    pub fn restart(&self, client: &Arc<InProcessNodeClient>) -> Arc<VectorIndexManager> {
        let raw_engine_concrete = Arc::clone(&self.engine);
        let raw_engine: Arc<dyn RawEngine> = raw_engine_concrete;
        let raft_router_concrete = Arc::clone(&self.raft_router);
        let raft_dyn: Arc<dyn shardvec_engine::RaftRouter> = raft_router_concrete;
        let client_concrete = Arc::clone(client);
        let client_dyn: Arc<dyn shardvec_engine::NodeClient> = client_concrete;
        let manager = VectorIndexManager::new(
            Arc::clone(&self.config),
            raw_engine,
            Arc::clone(&self.log_storage_manager),
            Arc::clone(&self.region_meta),
            raft_dyn,
            client_dyn,
        );
        client.register_node(&self.addr, Arc::clone(manager.snapshot_manager()));
        manager
    }

    /// Register a region with ids in `[min_id, max_id)` plus its raft group
    /// and log storage. The raft group lists `peers` with `leader` leading.
    pub fn add_region(
        &self,
        region_id: u64,
        parameter: IndexParameter,
        min_id: VectorId,
        max_id: VectorId,
        peers: Vec<String>,
        leader: &str,
    ) -> Arc<Region> {
        let region = Region::new(RegionDefinition {
            id: region_id,
            partition_id: region_id,
            range: Range::new(
                encode_raw_key(region_id, min_id),
                encode_raw_key(region_id, max_id),
            ),
            index_parameter: parameter,
        });
        region.set_state(RegionState::Normal);
        self.region_meta.add_region(Arc::clone(&region));
        self.raft_router.add_group(region_id, peers, leader);
        self.log_storage_manager
            .add_log_storage(region_id, Arc::new(MemLogStorage::new()));
        region
    }

    /// Single-node convenience: the region's raft group is just this node.
    pub fn add_local_region(
        &self,
        region_id: u64,
        parameter: IndexParameter,
        min_id: VectorId,
        max_id: VectorId,
    ) -> Arc<Region> {
        self.add_region(
            region_id,
            parameter,
            min_id,
            max_id,
            vec![self.addr.clone()],
            &self.addr.clone(),
        )
    }

    /// Write a record's keyspaces directly (what the raft state machine does
    /// before the index apply).
    pub fn seed_record(
        &self,
        partition_id: u64,
        vector_id: VectorId,
        values: Vec<f32>,
        scalar: Option<ScalarData>,
        table: Option<Vec<u8>>,
    ) {
        self.engine
            .put(
                CF_STORE_DATA,
                encode_vector_data_key(partition_id, vector_id),
                rmp_serde::to_vec(&Vector::Float(values)).unwrap(),
            )
            .unwrap();
        if let Some(scalar) = scalar {
            self.engine
                .put(
                    CF_STORE_DATA,
                    encode_vector_scalar_key(partition_id, vector_id),
                    rmp_serde::to_vec(&scalar).unwrap(),
                )
                .unwrap();
        }
        if let Some(table) = table {
            self.engine
                .put(
                    CF_STORE_DATA,
                    encode_vector_table_key(partition_id, vector_id),
                    table,
                )
                .unwrap();
        }
    }

    /// Full committed write: key-value keyspaces, WAL entry, index apply.
    pub fn commit_vector_add(&self, region: &Arc<Region>, log_index: u64, ids: &[VectorId]) {
        let vectors: Vec<VectorWithId> = ids
            .iter()
            .map(|id| {
                self.seed_record(region.partition_id(), *id, test_values(*id), None, None);
                VectorWithId::with_vector(*id, Vector::Float(test_values(*id)))
            })
            .collect();
        let log = self.log_storage_manager.log_storage(region.id()).unwrap();
        log.append_command(log_index, &RaftCommand::vector_add(vectors.clone()))
            .unwrap();
        self.manager
            .apply_vector_add(region, &vectors, log_index)
            .unwrap();
    }

    /// Append a WAL entry without applying it (a restart will replay it).
    pub fn append_unapplied_add(&self, region: &Arc<Region>, log_index: u64, ids: &[VectorId]) {
        let vectors: Vec<VectorWithId> = ids
            .iter()
            .map(|id| {
                self.seed_record(region.partition_id(), *id, test_values(*id), None, None);
                VectorWithId::with_vector(*id, Vector::Float(test_values(*id)))
            })
            .collect();
        let log = self.log_storage_manager.log_storage(region.id()).unwrap();
        log.append_command(log_index, &RaftCommand::vector_add(vectors))
            .unwrap();
    }
}

/// Deterministic embedding for a test id.
pub fn test_values(id: VectorId) -> Vec<f32> {
    vec![id as f32, (id % 17) as f32]
}

/// Two-dimensional query record.
pub fn query_record(values: Vec<f32>) -> Vec<VectorWithId> {
    vec![VectorWithId::with_vector(0, Vector::Float(values))]
}

/// A single-field scalar map.
pub fn scalar(field: &str, value: shardvec_core::ScalarValue) -> ScalarData {
    let mut data = ScalarData::new();
    data.insert(field.to_string(), value);
    data
}
