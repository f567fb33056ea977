//! shardvec-index: similarity-search kernels.
//!
//! Two kernel families behind one capability trait: `FlatIndex` for exact
//! scans and `HnswIndex` for approximate graph search. Kernels evaluate
//! tagged filter variants during traversal and self-assess when the
//! lifecycle layer should save or rebuild them.

pub mod distance;
pub mod filter;
pub mod flat;
pub mod hnsw;
pub mod kernel;

pub use distance::compute_distance;
pub use filter::{FilterSet, SearchFilter};
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use kernel::{new_kernel, ScrubPolicy, VectorIndexKernel};
