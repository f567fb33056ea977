//! Flat (exact scan) kernel.
//!
//! O(n) per query, exact results, no durable form: `save` and `load` return
//! `Unsupported`, which makes flat snapshots meta-only and boot fall through
//! to a key-value build.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;

use shardvec_core::{
    DistanceMetric, Error, IndexKind, IndexParameter, Result, SearchResult, Vector, VectorId,
    VectorWithDistance, VectorWithId,
};

use crate::distance::compute_distance;
use crate::filter::{FilterSet, SearchFilter};
use crate::kernel::{query_values, ScrubPolicy, VectorIndexKernel};

/// Exact-scan kernel.
pub struct FlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    policy: ScrubPolicy,
    vectors: RwLock<BTreeMap<VectorId, Vec<f32>>>,
}

impl FlatIndex {
    /// Empty flat index.
    pub fn new(parameter: &IndexParameter, policy: ScrubPolicy) -> Self {
        FlatIndex {
            dimension: parameter.dimension,
            metric: parameter.metric,
            policy,
            vectors: RwLock::new(BTreeMap::new()),
        }
    }
}

impl VectorIndexKernel for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
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

        let mut guard = self.vectors.write();
        for (id, values) in prepared {
            guard.insert(id, values);
        }
        Ok(())
    }

    fn delete(&self, ids: &[VectorId]) -> Result<()> {
        let mut guard = self.vectors.write();
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    fn search(
        &self,
        queries: &[VectorWithId],
        top_n: usize,
        filters: &FilterSet,
        with_vector_data: bool,
    ) -> Result<Vec<SearchResult>> {
        let values = query_values(queries, self.dimension)?;
        let guard = self.vectors.read();

        let mut results = Vec::with_capacity(queries.len());
        for query in values {
            let mut hits: Vec<(VectorId, f32)> = guard
                .iter()
                .filter(|(id, _)| filters.matches(**id))
                .map(|(id, target)| (*id, compute_distance(query, target, self.metric)))
                .collect();
            hits.sort_by(|(id_a, dist_a), (id_b, dist_b)| {
                dist_a
                    .partial_cmp(dist_b)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| id_a.cmp(id_b))
            });
            hits.truncate(top_n);

            results.push(
                hits.into_iter()
                    .map(|(id, distance)| VectorWithDistance {
                        vector_with_id: VectorWithId {
                            id,
                            vector: with_vector_data
                                .then(|| Vector::Float(guard[&id].clone())),
                            scalar_data: Default::default(),
                            table_data: None,
                        },
                        distance,
                    })
                    .collect(),
            );
        }
        Ok(results)
    }

    fn supports_filter(&self, _filter: &SearchFilter) -> bool {
        true
    }

    fn save(&self, _path: &Path) -> Result<()> {
        Err(Error::unsupported("flat index has no durable form"))
    }

    fn load(&self, _path: &Path) -> Result<()> {
        Err(Error::unsupported("flat index has no durable form"))
    }

    fn count(&self) -> u64 {
        self.vectors.read().len() as u64
    }

    fn deleted_count(&self) -> u64 {
        0
    }

    fn memory_size(&self) -> u64 {
        let guard = self.vectors.read();
        (guard.len() * (self.dimension * std::mem::size_of::<f32>() + 16)) as u64
    }

    fn needs_rebuild(&self, _log_behind: u64) -> bool {
        // A rebuild recreates the same exact scan; only deletions in other
        // kernels make rebuilds worthwhile.
        false
    }

    fn needs_save(&self, log_behind: u64) -> bool {
        // Meta-only snapshots still advance the WAL truncation mark.
        log_behind >= self.policy.save_log_behind
    }
}
