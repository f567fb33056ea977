//! Kernel contract and factory.
//!
//! A kernel is the similarity-search engine behind one index handle. The
//! lifecycle layer treats kernels as opaque implementations of this fixed
//! capability set; HNSW and flat are the two families shipped here.

use std::path::Path;

use shardvec_core::{
    DistanceMetric, Error, IndexKind, IndexParameter, Result, SearchResult, VectorId, VectorWithId,
};

use crate::filter::{FilterSet, SearchFilter};
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;

/// Lag thresholds a kernel consults when self-assessing scrub actions.
#[derive(Debug, Clone, Copy)]
pub struct ScrubPolicy {
    /// Save once the apply log runs this far past the last snapshot
    pub save_log_behind: u64,
    /// Rebuild once the apply log runs this far past the last snapshot
    pub rebuild_log_behind: u64,
}

/// Capability set every kernel implements.
///
/// Kernels handle their own internal concurrency: all methods take `&self`
/// and may be called from multiple threads. The handle-level write lock that
/// freezes a kernel during snapshot serialization lives above this trait.
pub trait VectorIndexKernel: Send + Sync {
    /// Kernel family.
    fn kind(&self) -> IndexKind;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Distance metric.
    fn metric(&self) -> DistanceMetric;

    /// Insert or replace a batch of vectors.
    fn upsert(&self, vectors: &[VectorWithId]) -> Result<()>;

    /// Delete a batch of ids. Unknown ids are ignored.
    fn delete(&self, ids: &[VectorId]) -> Result<()>;

    /// K-nearest search for each query. Results are per-query, ordered by
    /// ascending distance with vector-id tie-break. When `with_vector_data`
    /// is false (or the kernel does not materialize values) results carry
    /// ids and distances only.
    fn search(
        &self,
        queries: &[VectorWithId],
        top_n: usize,
        filters: &FilterSet,
        with_vector_data: bool,
    ) -> Result<Vec<SearchResult>>;

    /// Whether this kernel can evaluate the filter variant during traversal.
    fn supports_filter(&self, filter: &SearchFilter) -> bool;

    /// Serialize the kernel to `path`. Kernels without a durable form
    /// return `Unsupported`; the snapshot layer treats that as success.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace this kernel's contents from a file written by `save`.
    fn load(&self, path: &Path) -> Result<()>;

    /// Live vector count.
    fn count(&self) -> u64;

    /// Tombstoned vector count.
    fn deleted_count(&self) -> u64;

    /// Approximate resident memory in bytes.
    fn memory_size(&self) -> u64;

    /// Self-assessment: should the scrubber rebuild this index given how far
    /// the apply log is past the last snapshot?
    fn needs_rebuild(&self, log_behind: u64) -> bool;

    /// Self-assessment: should the scrubber save a snapshot?
    fn needs_save(&self, log_behind: u64) -> bool;
}

/// Instantiate a kernel from a region's index parameter.
pub fn new_kernel(
    parameter: &IndexParameter,
    policy: ScrubPolicy,
) -> Result<Box<dyn VectorIndexKernel>> {
    parameter.validate()?;
    match parameter.kind {
        IndexKind::Flat => Ok(Box::new(FlatIndex::new(parameter, policy))),
        IndexKind::Hnsw => Ok(Box::new(HnswIndex::new(parameter, policy))),
    }
}

/// Validate a query batch against the kernel's dimension and extract the
/// float values. Shared by both kernel families.
pub(crate) fn query_values<'a>(
    queries: &'a [VectorWithId],
    dimension: usize,
) -> Result<Vec<&'a [f32]>> {
    queries
        .iter()
        .map(|query| {
            let values = query
                .vector
                .as_ref()
                .and_then(|v| v.float_values())
                .ok_or_else(|| Error::illegal_parameters("query carries no float values"))?;
            if values.len() != dimension {
                return Err(Error::illegal_parameters(format!(
                    "query dimension {} != index dimension {}",
                    values.len(),
                    dimension
                )));
            }
            Ok(values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardvec_core::Vector;

    #[test]
    fn test_factory_builds_both_kinds() {
        let policy = ScrubPolicy {
            save_log_behind: 10,
            rebuild_log_behind: 100,
        };
        let flat = new_kernel(&IndexParameter::flat(4, DistanceMetric::L2), policy).unwrap();
        assert_eq!(flat.kind(), IndexKind::Flat);
        let hnsw = new_kernel(&IndexParameter::hnsw(4, DistanceMetric::Cosine), policy).unwrap();
        assert_eq!(hnsw.kind(), IndexKind::Hnsw);
    }

    #[test]
    fn test_factory_rejects_bad_parameters() {
        let policy = ScrubPolicy {
            save_log_behind: 10,
            rebuild_log_behind: 100,
        };
        assert!(new_kernel(&IndexParameter::flat(0, DistanceMetric::L2), policy).is_err());
    }

    #[test]
    fn test_query_values_validation() {
        let queries = vec![VectorWithId::with_vector(0, Vector::Float(vec![1.0, 2.0]))];
        assert!(query_values(&queries, 2).is_ok());
        assert!(query_values(&queries, 3).is_err());

        let no_values = vec![VectorWithId::default()];
        assert!(query_values(&no_values, 2).is_err());

        let binary = vec![VectorWithId::with_vector(0, Vector::Binary(vec![1]))];
        assert!(query_values(&binary, 2).is_err());
    }
}
