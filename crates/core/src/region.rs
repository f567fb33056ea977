//! Region metadata.
//!
//! A region is a key-range shard, the unit of replication and of index
//! ownership. The subsystem only consumes region metadata; membership and
//! epoch management live in the metadata registry outside this codebase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::range::Range;
use crate::registry::SafeMap;
use crate::types::IndexParameter;

/// Region lifecycle state. Only `Normal` accepts reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionState {
    /// Just created, not yet serving
    New,
    /// Waiting to join the raft group
    Standby,
    /// Serving reads and writes
    Normal,
    /// Teardown in progress
    Deleting,
    /// Torn down
    Deleted,
    /// Abandoned by the metadata registry
    Orphan,
}

/// Immutable part of a region's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDefinition {
    /// Region id; doubles as the vector index id
    pub id: u64,
    /// Partition the region's keys live in
    pub partition_id: u64,
    /// Raw key range owned by the region
    pub range: Range,
    /// How to construct the region's vector index
    pub index_parameter: IndexParameter,
}

/// A region as seen by the index lifecycle subsystem.
pub struct Region {
    definition: RegionDefinition,
    state: Mutex<RegionState>,
    /// While set, mutators must retry: the published index handle is being
    /// swapped by a rebuild.
    switching_vector_index: AtomicBool,
    /// Id of another region's index this region temporarily reads through
    /// (set during splits, cleared when the own index is rebuilt). The
    /// handle itself is owned by the manager's registry.
    share_vector_index_id: Mutex<Option<u64>>,
}

impl Region {
    /// Wrap a definition into a live region in `New` state.
    pub fn new(definition: RegionDefinition) -> Arc<Self> {
        Arc::new(Region {
            definition,
            state: Mutex::new(RegionState::New),
            switching_vector_index: AtomicBool::new(false),
            share_vector_index_id: Mutex::new(None),
        })
    }

    /// Region id.
    pub fn id(&self) -> u64 {
        self.definition.id
    }

    /// Partition id.
    pub fn partition_id(&self) -> u64 {
        self.definition.partition_id
    }

    /// Raw key range.
    pub fn range(&self) -> &Range {
        &self.definition.range
    }

    /// Index construction parameters.
    pub fn index_parameter(&self) -> &IndexParameter {
        &self.definition.index_parameter
    }

    /// Full definition.
    pub fn definition(&self) -> &RegionDefinition {
        &self.definition
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegionState {
        *self.state.lock()
    }

    /// Transition the lifecycle state.
    pub fn set_state(&self, state: RegionState) {
        *self.state.lock() = state;
    }

    /// True while a rebuild is swapping the published handle.
    pub fn is_switching_vector_index(&self) -> bool {
        self.switching_vector_index.load(Ordering::Acquire)
    }

    /// Set or clear the switching flag.
    pub fn set_switching_vector_index(&self, switching: bool) {
        self.switching_vector_index
            .store(switching, Ordering::Release);
    }

    /// Id of the shared index this region reads through, if any.
    pub fn share_vector_index_id(&self) -> Option<u64> {
        *self.share_vector_index_id.lock()
    }

    /// Point this region at another region's index, or clear with `None`.
    pub fn set_share_vector_index_id(&self, id: Option<u64>) {
        *self.share_vector_index_id.lock() = id;
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("switching", &self.is_switching_vector_index())
            .finish()
    }
}

/// Region registry: the subsystem's view of the node's regions.
///
/// Built on the concurrent registry so readers (scrubber, service entry
/// points) never block the writer that applies metadata changes.
#[derive(Default)]
pub struct StoreRegionMeta {
    regions: SafeMap<u64, Arc<Region>>,
}

impl StoreRegionMeta {
    /// Empty registry.
    pub fn new() -> Self {
        StoreRegionMeta {
            regions: SafeMap::new(),
        }
    }

    /// Register or replace a region.
    pub fn add_region(&self, region: Arc<Region>) {
        // Registry write failures only happen on poisoning; treat as fatal.
        self.regions
            .put(region.id(), region)
            .expect("region registry poisoned");
    }

    /// Look up a region by id.
    pub fn region(&self, region_id: u64) -> Option<Arc<Region>> {
        self.regions.get(&region_id).unwrap_or(None)
    }

    /// Remove a region.
    pub fn remove_region(&self, region_id: u64) {
        let _ = self.regions.erase(&region_id);
    }

    /// All regions that have not been torn down, for the scrubber sweep.
    pub fn alive_regions(&self) -> Vec<Arc<Region>> {
        self.regions
            .get_all_values(Some(&|region: &Arc<Region>| {
                !matches!(region.state(), RegionState::Deleted | RegionState::Orphan)
            }))
            .unwrap_or_default()
    }
}
