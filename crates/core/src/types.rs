//! Shared data types for vector records and index parameters.
//!
//! A vector record is addressed by `(partition_id, vector_id)` and split
//! across three parallel keyspaces: the vector values themselves (`data`),
//! typed scalar side-data (`scalar`) and opaque table bytes (`table`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Internal vector id. Ids `0` and `u64::MAX` are reserved sentinels and
/// never returned by scans.
pub type VectorId = u64;

/// Reserved minimum sentinel id.
pub const VECTOR_ID_MIN: VectorId = 0;

/// Reserved maximum sentinel id.
pub const VECTOR_ID_MAX: VectorId = u64::MAX;

/// Vector values: float embeddings or packed binary codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    /// Dense f32 embedding
    Float(Vec<f32>),
    /// Packed binary embedding
    Binary(Vec<u8>),
}

impl Vector {
    /// Number of stored values.
    pub fn len(&self) -> usize {
        match self {
            Vector::Float(values) => values.len(),
            Vector::Binary(values) => values.len(),
        }
    }

    /// True if the vector carries no values. Records with empty vectors are
    /// dropped during index builds.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Float values, if this is a float vector.
    pub fn float_values(&self) -> Option<&[f32]> {
        match self {
            Vector::Float(values) => Some(values),
            Vector::Binary(_) => None,
        }
    }
}

/// A typed scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    /// Boolean field
    Bool(bool),
    /// Signed integer field
    Int(i64),
    /// Floating point field
    Float(f64),
    /// UTF-8 string field
    String(String),
    /// Opaque bytes field
    Bytes(Vec<u8>),
}

/// Scalar side-data attached to a vector record, keyed by field name.
pub type ScalarData = BTreeMap<String, ScalarValue>;

/// Field-wise equality check used by scalar filters: every field of `query`
/// must be present in `record` with an equal value. Extra fields in the
/// record are allowed; a field missing from the record is a non-match.
pub fn scalar_data_matches(query: &ScalarData, record: &ScalarData) -> bool {
    query
        .iter()
        .all(|(field, value)| record.get(field) == Some(value))
}

/// A vector record as read or written through the subsystem.
///
/// `vector`, `scalar_data` and `table_data` are each optional so that readers
/// can return exactly the keyspaces a request asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorWithId {
    /// Internal vector id
    pub id: VectorId,
    /// Vector values, when requested/present
    pub vector: Option<Vector>,
    /// Scalar side-data, when requested/present
    pub scalar_data: ScalarData,
    /// Opaque table bytes, when requested/present
    pub table_data: Option<Vec<u8>>,
}

impl VectorWithId {
    /// A record carrying only values.
    pub fn with_vector(id: VectorId, vector: Vector) -> Self {
        VectorWithId {
            id,
            vector: Some(vector),
            scalar_data: ScalarData::new(),
            table_data: None,
        }
    }

    /// True if the record carries materialized vector values.
    pub fn has_vector_values(&self) -> bool {
        self.vector.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// One search hit: a record plus its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorWithDistance {
    /// The matched record
    pub vector_with_id: VectorWithId,
    /// Distance to the query (lower is closer)
    pub distance: f32,
}

/// Per-query search results, ordered by ascending distance.
pub type SearchResult = Vec<VectorWithDistance>;

/// Kernel family backing an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Hierarchical navigable small world graph
    Hnsw,
    /// Exact flat scan
    Flat,
}

/// Distance metric used by a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared euclidean distance
    L2,
    /// Negated inner product
    InnerProduct,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
}

/// Index construction parameters, part of the region definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParameter {
    /// Kernel family
    pub kind: IndexKind,
    /// Embedding dimension
    pub dimension: usize,
    /// Distance metric
    pub metric: DistanceMetric,
    /// HNSW: max connections per node and layer
    pub hnsw_max_connections: usize,
    /// HNSW: build-time beam width
    pub hnsw_ef_construction: usize,
    /// HNSW: search-time beam width
    pub hnsw_ef_search: usize,
}

impl IndexParameter {
    /// Flat index over the given dimension.
    pub fn flat(dimension: usize, metric: DistanceMetric) -> Self {
        IndexParameter {
            kind: IndexKind::Flat,
            dimension,
            metric,
            hnsw_max_connections: 0,
            hnsw_ef_construction: 0,
            hnsw_ef_search: 0,
        }
    }

    /// HNSW index with default graph parameters.
    pub fn hnsw(dimension: usize, metric: DistanceMetric) -> Self {
        IndexParameter {
            kind: IndexKind::Hnsw,
            dimension,
            metric,
            hnsw_max_connections: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }

    /// Validate the parameter combination.
    pub fn validate(&self) -> crate::Result<()> {
        if self.dimension == 0 {
            return Err(crate::Error::illegal_parameters("dimension must be > 0"));
        }
        if self.kind == IndexKind::Hnsw && self.hnsw_max_connections == 0 {
            return Err(crate::Error::illegal_parameters(
                "hnsw_max_connections must be > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_len_and_empty() {
        assert_eq!(Vector::Float(vec![1.0, 2.0]).len(), 2);
        assert!(Vector::Float(vec![]).is_empty());
        assert!(Vector::Binary(vec![]).is_empty());
        assert!(!Vector::Binary(vec![0xFF]).is_empty());
    }

    #[test]
    fn test_scalar_match_missing_field_is_non_match() {
        let mut query = ScalarData::new();
        query.insert("kind".to_string(), ScalarValue::String("doc".into()));
        query.insert("year".to_string(), ScalarValue::Int(2024));

        let mut record = ScalarData::new();
        record.insert("kind".to_string(), ScalarValue::String("doc".into()));

        assert!(!scalar_data_matches(&query, &record));
    }

    #[test]
    fn test_scalar_match_extra_fields_allowed() {
        let mut query = ScalarData::new();
        query.insert("kind".to_string(), ScalarValue::String("doc".into()));

        let mut record = ScalarData::new();
        record.insert("kind".to_string(), ScalarValue::String("doc".into()));
        record.insert("extra".to_string(), ScalarValue::Bool(true));

        assert!(scalar_data_matches(&query, &record));
    }

    #[test]
    fn test_scalar_match_value_mismatch() {
        let mut query = ScalarData::new();
        query.insert("year".to_string(), ScalarValue::Int(2024));

        let mut record = ScalarData::new();
        record.insert("year".to_string(), ScalarValue::Int(2023));

        assert!(!scalar_data_matches(&query, &record));
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let query = ScalarData::new();
        let mut record = ScalarData::new();
        record.insert("a".to_string(), ScalarValue::Int(1));
        assert!(scalar_data_matches(&query, &record));
    }

    #[test]
    fn test_index_parameter_validate() {
        assert!(IndexParameter::flat(8, DistanceMetric::L2).validate().is_ok());
        assert!(IndexParameter::hnsw(8, DistanceMetric::Cosine)
            .validate()
            .is_ok());

        let mut bad = IndexParameter::flat(0, DistanceMetric::L2);
        assert!(bad.validate().is_err());
        bad = IndexParameter::hnsw(8, DistanceMetric::L2);
        bad.hnsw_max_connections = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_has_vector_values() {
        let mut record = VectorWithId::with_vector(1, Vector::Float(vec![0.5]));
        assert!(record.has_vector_values());
        record.vector = Some(Vector::Float(vec![]));
        assert!(!record.has_vector_values());
        record.vector = None;
        assert!(!record.has_vector_values());
    }
}
