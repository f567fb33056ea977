//! HNSW (hierarchical navigable small world) kernel.
//!
//! Multi-layer graph with greedy descent and a beam search at each layer.
//! Level assignment uses a fixed-seed splitmix64 counter, neighbor lists are
//! kept sorted by distance, and all tie-breaks fall back to ascending vector
//! id, so identical insert sequences produce identical graphs and results.
//!
//! Deletes are soft: tombstoned nodes stay in the graph as traversal
//! waypoints but are excluded from results. The tombstone ratio feeds the
//! kernel's rebuild self-assessment.
//!
//! ## Snapshot file format
//!
//! ```text
//! [Header length: u32 LE]
//! [Header: MessagePack HnswSnapshotHeader]
//! For each node (in vector-id order):
//!   [VectorId: u64 LE]
//!   [Max layer: u32 LE]
//!   [Deleted: u8]
//!   For each layer 0..=max_layer:
//!     [Neighbor count: u32 LE][Neighbor ids: u64 LE ...]
//!   [Embedding: dimension * f32 LE]
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use shardvec_core::{
    DistanceMetric, Error, IndexKind, IndexParameter, Result, SearchResult, VectorId,
    VectorWithDistance, VectorWithId,
};

use crate::distance::compute_distance;
use crate::filter::{FilterSet, SearchFilter};
use crate::kernel::{query_values, ScrubPolicy, VectorIndexKernel};

const RNG_SEED: u64 = 42;

/// Scored candidate ordered by (distance asc, id asc).
#[derive(Debug, Clone, Copy, PartialEq)]
struct DistId {
    distance: f32,
    id: VectorId,
}

impl Eq for DistId {}

impl Ord for DistId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for DistId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct HnswNode {
    /// neighbors[layer] = ids linked at that layer, sorted by distance
    neighbors: Vec<Vec<VectorId>>,
    max_layer: usize,
    deleted: bool,
}

impl HnswNode {
    fn new(max_layer: usize) -> Self {
        HnswNode {
            neighbors: vec![Vec::new(); max_layer + 1],
            max_layer,
            deleted: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HnswSnapshotHeader {
    dimension: usize,
    metric: DistanceMetric,
    max_connections: usize,
    ef_construction: usize,
    ef_search: usize,
    entry_point: Option<VectorId>,
    max_level: usize,
    rng_counter: u64,
    node_count: u64,
}

struct HnswCore {
    nodes: BTreeMap<VectorId, HnswNode>,
    vectors: BTreeMap<VectorId, Vec<f32>>,
    entry_point: Option<VectorId>,
    max_level: usize,
    rng_counter: u64,
    deleted_count: u64,
}

/// HNSW kernel.
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    max_connections: usize,
    ef_construction: usize,
    ef_search: usize,
    level_multiplier: f64,
    policy: ScrubPolicy,
    core: RwLock<HnswCore>,
}

impl HnswIndex {
    /// Empty HNSW index.
    pub fn new(parameter: &IndexParameter, policy: ScrubPolicy) -> Self {
        HnswIndex {
            dimension: parameter.dimension,
            metric: parameter.metric,
            max_connections: parameter.hnsw_max_connections,
            ef_construction: parameter.hnsw_ef_construction.max(16),
            ef_search: parameter.hnsw_ef_search.max(16),
            level_multiplier: 1.0 / (parameter.hnsw_max_connections.max(2) as f64).ln(),
            policy,
            core: RwLock::new(HnswCore {
                nodes: BTreeMap::new(),
                vectors: BTreeMap::new(),
                entry_point: None,
                max_level: 0,
                rng_counter: 0,
                deleted_count: 0,
            }),
        }
    }

    fn max_connections_at(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_connections * 2
        } else {
            self.max_connections
        }
    }

    fn splitmix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        x ^ (x >> 31)
    }

    fn assign_level(&self, core: &mut HnswCore) -> usize {
        core.rng_counter += 1;
        let hash = Self::splitmix64(RNG_SEED.wrapping_add(core.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        (-uniform.ln() * self.level_multiplier) as usize
    }

    /// Beam search at one layer. Tombstoned nodes and (when a filter is
    /// given) non-matching ids are traversed as waypoints but excluded from
    /// the returned results.
    fn search_layer(
        &self,
        core: &HnswCore,
        query: &[f32],
        entry_id: VectorId,
        ef: usize,
        layer: usize,
        filter: Option<&FilterSet>,
    ) -> Vec<DistId> {
        let entry_values = match core.vectors.get(&entry_id) {
            Some(values) => values,
            None => return Vec::new(),
        };
        let entry = DistId {
            distance: compute_distance(query, entry_values, self.metric),
            id: entry_id,
        };

        let admissible = |id: VectorId| {
            !core.nodes.get(&id).map_or(true, |n| n.deleted)
                && filter.map_or(true, |f| f.matches(id))
        };

        let mut visited: BTreeSet<VectorId> = BTreeSet::new();
        visited.insert(entry_id);

        // Nearest candidate on top.
        let mut candidates: BinaryHeap<Reverse<DistId>> = BinaryHeap::new();
        candidates.push(Reverse(entry));

        // Worst admitted result on top, bounded to ef.
        let mut results: BinaryHeap<DistId> = BinaryHeap::new();
        if admissible(entry_id) {
            results.push(entry);
        }

        while let Some(Reverse(nearest)) = candidates.pop() {
            let worst = results.peek().map(|r| r.distance).unwrap_or(f32::MAX);
            if results.len() >= ef && nearest.distance > worst {
                break;
            }

            let Some(node) = core.nodes.get(&nearest.id) else {
                continue;
            };
            let Some(neighbors) = node.neighbors.get(layer) else {
                continue;
            };
            for &neighbor_id in neighbors {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let Some(values) = core.vectors.get(&neighbor_id) else {
                    continue;
                };
                let scored = DistId {
                    distance: compute_distance(query, values, self.metric),
                    id: neighbor_id,
                };
                let worst = results.peek().map(|r| r.distance).unwrap_or(f32::MAX);
                if results.len() < ef || scored.distance < worst {
                    candidates.push(Reverse(scored));
                    if admissible(neighbor_id) {
                        results.push(scored);
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort();
        out
    }

    /// Greedy descent through the upper layers down to `target_layer + 1`.
    fn descend(
        &self,
        core: &HnswCore,
        query: &[f32],
        mut entry_id: VectorId,
        from_layer: usize,
        target_layer: usize,
    ) -> VectorId {
        let mut layer = from_layer;
        while layer > target_layer {
            let nearest = self.search_layer(core, query, entry_id, 1, layer, None);
            if let Some(best) = nearest.first() {
                entry_id = best.id;
            }
            layer -= 1;
        }
        entry_id
    }

    fn link(&self, core: &mut HnswCore, id: VectorId, values: &[f32], level: usize) {
        let Some(entry_id) = core.entry_point else {
            core.entry_point = Some(id);
            core.max_level = level;
            return;
        };

        let mut ep = entry_id;
        if core.max_level > level {
            ep = self.descend(core, values, ep, core.max_level, level);
        }

        for layer in (0..=level.min(core.max_level)).rev() {
            let candidates =
                self.search_layer(core, values, ep, self.ef_construction, layer, None);
            if let Some(best) = candidates.first() {
                ep = best.id;
            }

            let max_conn = self.max_connections_at(layer);
            let selected: Vec<DistId> = candidates.into_iter().take(max_conn).collect();

            if let Some(node) = core.nodes.get_mut(&id) {
                node.neighbors[layer] = selected.iter().map(|c| c.id).collect();
            }

            for candidate in &selected {
                let neighbor_values = match core.vectors.get(&candidate.id) {
                    Some(values) => values.clone(),
                    None => continue,
                };
                if let Some(neighbor) = core.nodes.get_mut(&candidate.id) {
                    if layer >= neighbor.neighbors.len() {
                        continue;
                    }
                    neighbor.neighbors[layer].push(id);
                    if neighbor.neighbors[layer].len() > max_conn {
                        // Shrink to the closest links, measured from the
                        // neighbor itself.
                        let mut scored: Vec<DistId> = neighbor.neighbors[layer]
                            .iter()
                            .filter_map(|nid| {
                                core.vectors.get(nid).map(|v| DistId {
                                    distance: compute_distance(&neighbor_values, v, self.metric),
                                    id: *nid,
                                })
                            })
                            .collect();
                        scored.sort();
                        scored.truncate(max_conn);
                        if let Some(neighbor) = core.nodes.get_mut(&candidate.id) {
                            neighbor.neighbors[layer] = scored.iter().map(|c| c.id).collect();
                        }
                    }
                }
            }
        }

        if level > core.max_level {
            core.max_level = level;
            core.entry_point = Some(id);
        }
    }
}

impl VectorIndexKernel for HnswIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Hnsw
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn upsert(&self, vectors: &[VectorWithId]) -> Result<()> {
        let mut prepared = Vec::with_capacity(vectors.len());
        for record in vectors {
            let values = record
                .vector
                .as_ref()
                .and_then(|v| v.float_values())
                .ok_or_else(|| Error::illegal_parameters("upsert carries no float values"))?;
            if values.len() != self.dimension {
                return Err(Error::illegal_parameters(format!(
                    "vector {} dimension {} != index dimension {}",
                    record.id,
                    values.len(),
                    self.dimension
                )));
            }
            prepared.push((record.id, values.to_vec()));
        }

        let mut guard = self.core.write();
        let core = &mut *guard;
        for (id, values) in prepared {
            if let Some(node) = core.nodes.get_mut(&id) {
                // Update in place; the node keeps its links.
                if node.deleted {
                    node.deleted = false;
                    core.deleted_count -= 1;
                }
                core.vectors.insert(id, values);
                continue;
            }
            let level = self.assign_level(core);
            core.vectors.insert(id, values.clone());
            core.nodes.insert(id, HnswNode::new(level));
            self.link(core, id, &values, level);
        }
        Ok(())
    }

    fn delete(&self, ids: &[VectorId]) -> Result<()> {
        let mut guard = self.core.write();
        let core = &mut *guard;
        for id in ids {
            if let Some(node) = core.nodes.get_mut(id) {
                if !node.deleted {
                    node.deleted = true;
                    core.deleted_count += 1;
                }
            }
        }
        Ok(())
    }

    fn search(
        &self,
        queries: &[VectorWithId],
        top_n: usize,
        filters: &FilterSet,
        _with_vector_data: bool,
    ) -> Result<Vec<SearchResult>> {
        let values = query_values(queries, self.dimension)?;
        let core = self.core.read();

        let mut results = Vec::with_capacity(queries.len());
        for query in values {
            let Some(entry_id) = core.entry_point else {
                results.push(Vec::new());
                continue;
            };
            let ep = self.descend(&core, query, entry_id, core.max_level, 0);
            let ef = self.ef_search.max(top_n);
            let mut hits = self.search_layer(&core, query, ep, ef, 0, Some(filters));
            hits.truncate(top_n);
            // The graph kernel never materializes vector bytes; the reader
            // re-fetches them from the data keyspace when asked to.
            results.push(
                hits.into_iter()
                    .map(|hit| VectorWithDistance {
                        vector_with_id: VectorWithId {
                            id: hit.id,
                            vector: None,
                            scalar_data: Default::default(),
                            table_data: None,
                        },
                        distance: hit.distance,
                    })
                    .collect(),
            );
        }
        Ok(results)
    }

    fn supports_filter(&self, filter: &SearchFilter) -> bool {
        matches!(
            filter,
            SearchFilter::Range { .. } | SearchFilter::IdList(_)
        )
    }

    fn save(&self, path: &Path) -> Result<()> {
        let core = self.core.read();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = HnswSnapshotHeader {
            dimension: self.dimension,
            metric: self.metric,
            max_connections: self.max_connections,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            entry_point: core.entry_point,
            max_level: core.max_level,
            rng_counter: core.rng_counter,
            node_count: core.nodes.len() as u64,
        };
        let header_bytes =
            rmp_serde::to_vec(&header).map_err(|e| Error::serialization(e.to_string()))?;
        writer.write_u32::<LittleEndian>(header_bytes.len() as u32)?;
        writer.write_all(&header_bytes)?;

        for (id, node) in &core.nodes {
            writer.write_u64::<LittleEndian>(*id)?;
            writer.write_u32::<LittleEndian>(node.max_layer as u32)?;
            writer.write_u8(node.deleted as u8)?;
            for neighbors in &node.neighbors {
                writer.write_u32::<LittleEndian>(neighbors.len() as u32)?;
                for neighbor in neighbors {
                    writer.write_u64::<LittleEndian>(*neighbor)?;
                }
            }
            let values = core.vectors.get(id).ok_or_else(|| {
                Error::internal(format!("node {} has no vector values", id))
            })?;
            for value in values {
                writer.write_f32::<LittleEndian>(*value)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let header_len = reader.read_u32::<LittleEndian>()? as usize;
        let mut header_bytes = vec![0u8; header_len];
        reader.read_exact(&mut header_bytes)?;
        let header: HnswSnapshotHeader =
            rmp_serde::from_slice(&header_bytes).map_err(|e| Error::serialization(e.to_string()))?;

        if header.dimension != self.dimension || header.metric != self.metric {
            return Err(Error::serialization(format!(
                "snapshot parameters mismatch: dimension {} metric {:?}",
                header.dimension, header.metric
            )));
        }

        let mut nodes = BTreeMap::new();
        let mut vectors = BTreeMap::new();
        let mut deleted_count = 0u64;
        for _ in 0..header.node_count {
            let id = reader.read_u64::<LittleEndian>()?;
            let max_layer = reader.read_u32::<LittleEndian>()? as usize;
            let deleted = reader.read_u8()? != 0;
            let mut neighbors = Vec::with_capacity(max_layer + 1);
            for _ in 0..=max_layer {
                let count = reader.read_u32::<LittleEndian>()? as usize;
                let mut layer = Vec::with_capacity(count);
                for _ in 0..count {
                    layer.push(reader.read_u64::<LittleEndian>()?);
                }
                neighbors.push(layer);
            }
            let mut values = vec![0f32; header.dimension];
            for value in &mut values {
                *value = reader.read_f32::<LittleEndian>()?;
            }
            if deleted {
                deleted_count += 1;
            }
            nodes.insert(
                id,
                HnswNode {
                    neighbors,
                    max_layer,
                    deleted,
                },
            );
            vectors.insert(id, values);
        }

        let mut core = self.core.write();
        core.nodes = nodes;
        core.vectors = vectors;
        core.entry_point = header.entry_point;
        core.max_level = header.max_level;
        core.rng_counter = header.rng_counter;
        core.deleted_count = deleted_count;
        Ok(())
    }

    fn count(&self) -> u64 {
        let core = self.core.read();
        core.nodes.len() as u64 - core.deleted_count
    }

    fn deleted_count(&self) -> u64 {
        self.core.read().deleted_count
    }

    fn memory_size(&self) -> u64 {
        let core = self.core.read();
        let vector_bytes = core.vectors.len() * self.dimension * std::mem::size_of::<f32>();
        let link_bytes: usize = core
            .nodes
            .values()
            .map(|n| n.neighbors.iter().map(|l| l.len() * 8).sum::<usize>() + 48)
            .sum();
        (vector_bytes + link_bytes) as u64
    }

    fn needs_rebuild(&self, log_behind: u64) -> bool {
        let core = self.core.read();
        let total = core.nodes.len() as u64;
        // A third of the graph tombstoned degrades traversal enough to pay
        // for a rebuild, as does an apply log far past the last snapshot.
        (total > 0 && core.deleted_count * 3 >= total)
            || log_behind >= self.policy.rebuild_log_behind
    }

    fn needs_save(&self, log_behind: u64) -> bool {
        log_behind >= self.policy.save_log_behind
    }
}
