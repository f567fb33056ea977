//! Filtered vector reads.
//!
//! Point, batch, scan and search reads over vector records and their scalar
//! side-data. The search pipeline composes the always-on region range filter
//! with one of the selectable filter strategies and hands the result to the
//! live kernel; whatever data the kernel does not materialize is re-fetched
//! from the key-value engine by point-gets.

use std::sync::Arc;

use tracing::{info, warn};

use shardvec_core::codec::{
    decode_vector_id, encode_vector_data_key, encode_vector_scalar_key, encode_vector_table_key,
    fill_vector_data_prefix, fill_vector_scalar_prefix,
};
use shardvec_core::range::{validate_range, validate_region_state};
use shardvec_core::types::scalar_data_matches;
use shardvec_core::{
    Error, Range, Region, Result, ScalarData, SearchResult, Vector, VectorId, VectorWithId,
};
use shardvec_index::{FilterSet, SearchFilter};
use shardvec_storage::{IteratorOptions, KvReader, CF_STORE_DATA};

use crate::handle::VectorIndex;

/// Filter strategy selected by a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorFilter {
    /// No user filter; only the region range filter applies
    #[default]
    None,
    /// Filter on scalar field equality
    ScalarFilter,
    /// Filter on an explicit id list
    VectorIdFilter,
    /// Filter through the table coprocessor (not implemented)
    TableFilter,
}

/// Whether a scalar filter runs before or after the kernel search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorFilterType {
    /// Kernel searches wide, reader filters the results
    #[default]
    QueryPost,
    /// Reader computes the candidate set, kernel searches inside it
    QueryPre,
}

/// Search request parameters.
#[derive(Debug, Clone)]
pub struct VectorSearchParameter {
    /// Results per query
    pub top_n: usize,
    /// Materialize vector values in results
    pub with_vector_data: bool,
    /// Attach scalar side-data to results
    pub with_scalar_data: bool,
    /// When non-empty, only these scalar fields are attached
    pub selected_scalar_keys: Vec<String>,
    /// Attach table bytes to results
    pub with_table_data: bool,
    /// Filter strategy
    pub vector_filter: VectorFilter,
    /// Pre/post placement for scalar filters
    pub vector_filter_type: VectorFilterType,
    /// Candidate ids for `VectorIdFilter`
    pub vector_ids: Vec<VectorId>,
}

impl Default for VectorSearchParameter {
    fn default() -> Self {
        VectorSearchParameter {
            top_n: 10,
            with_vector_data: true,
            with_scalar_data: false,
            selected_scalar_keys: Vec::new(),
            with_table_data: false,
            vector_filter: VectorFilter::None,
            vector_filter_type: VectorFilterType::QueryPost,
            vector_ids: Vec::new(),
        }
    }
}

/// Scan request parameters.
#[derive(Debug, Clone)]
pub struct VectorScanContext {
    /// Partition the scan runs in
    pub partition_id: u64,
    /// Region range bounding the scan
    pub region_range: Range,
    /// First id of the scan (last id for reverse scans)
    pub start_id: VectorId,
    /// Inclusive end id; 0 means unbounded
    pub end_id: VectorId,
    /// Descending scan
    pub is_reverse: bool,
    /// Max ids to return
    pub limit: usize,
    /// Materialize vector values
    pub with_vector_data: bool,
    /// Attach scalar side-data
    pub with_scalar_data: bool,
    /// When non-empty, only these scalar fields are attached
    pub selected_scalar_keys: Vec<String>,
    /// Attach table bytes
    pub with_table_data: bool,
    /// Drop records whose scalar data does not match `scalar_for_filter`
    pub use_scalar_filter: bool,
    /// Equality template for the scalar filter
    pub scalar_for_filter: ScalarData,
}

/// Aggregate numbers for one region's index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorIndexMetrics {
    /// Live vectors in the kernel
    pub current_count: u64,
    /// Tombstoned vectors in the kernel
    pub deleted_count: u64,
    /// Approximate kernel memory
    pub memory_bytes: u64,
    /// Smallest vector id present in the range, 0 when empty
    pub min_vector_id: VectorId,
    /// Greatest vector id present in the range, 0 when empty
    pub max_vector_id: VectorId,
}

/// Read-side API over one node's vector records.
pub struct VectorReader {
    reader: Arc<dyn KvReader>,
}

impl VectorReader {
    /// Reader over the node's key-value engine.
    pub fn new(reader: Arc<dyn KvReader>) -> Self {
        VectorReader { reader }
    }

    // ========================================================================
    // Point and batch reads
    // ========================================================================

    /// Fetch one record by id. `NotFound` when the data key is absent.
    pub fn query_vector_with_id(
        &self,
        partition_id: u64,
        vector_id: VectorId,
        with_vector_data: bool,
    ) -> Result<VectorWithId> {
        let key = encode_vector_data_key(partition_id, vector_id);
        let value = self
            .reader
            .get(CF_STORE_DATA, &key)?
            .ok_or_else(|| Error::not_found(format!("vector {} not found", vector_id)))?;

        let mut record = VectorWithId {
            id: vector_id,
            ..Default::default()
        };
        if with_vector_data {
            record.vector = Some(
                rmp_serde::from_slice::<Vector>(&value)
                    .map_err(|e| Error::serialization(e.to_string()))?,
            );
        }
        Ok(record)
    }

    /// Fetch records for an id list. The result stays aligned with the
    /// request: a missing id yields `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn vector_batch_query(
        &self,
        partition_id: u64,
        vector_ids: &[VectorId],
        with_vector_data: bool,
        with_scalar_data: bool,
        selected_scalar_keys: &[String],
        with_table_data: bool,
    ) -> Result<Vec<Option<VectorWithId>>> {
        let mut records = Vec::with_capacity(vector_ids.len());
        for vector_id in vector_ids {
            match self.query_vector_with_id(partition_id, *vector_id, with_vector_data) {
                Ok(record) => records.push(Some(record)),
                Err(err) if err.is_not_found() => records.push(None),
                Err(err) => return Err(err),
            }
        }

        for record in records.iter_mut().flatten() {
            if with_scalar_data {
                self.query_vector_scalar_data(partition_id, selected_scalar_keys, record)?;
            }
            if with_table_data {
                self.query_vector_table_data(partition_id, record)?;
            }
        }
        Ok(records)
    }

    fn query_vector_scalar_data(
        &self,
        partition_id: u64,
        selected_scalar_keys: &[String],
        record: &mut VectorWithId,
    ) -> Result<()> {
        let key = encode_vector_scalar_key(partition_id, record.id);
        let Some(value) = self.reader.get(CF_STORE_DATA, &key)? else {
            return Ok(());
        };
        let scalar: ScalarData = match rmp_serde::from_slice(&value) {
            Ok(scalar) => scalar,
            Err(err) => {
                warn!(vector_id = record.id, error = %err, "decode vector scalar data failed, skip");
                return Ok(());
            }
        };
        record.scalar_data = if selected_scalar_keys.is_empty() {
            scalar
        } else {
            scalar
                .into_iter()
                .filter(|(field, _)| selected_scalar_keys.contains(field))
                .collect()
        };
        Ok(())
    }

    fn query_vector_table_data(&self, partition_id: u64, record: &mut VectorWithId) -> Result<()> {
        let key = encode_vector_table_key(partition_id, record.id);
        record.table_data = self.reader.get(CF_STORE_DATA, &key)?;
        Ok(())
    }

    /// Field-wise equality of a record's stored scalar data against a query
    /// template. Records with missing or undecodable scalar data do not
    /// match.
    fn compare_vector_scalar_data(
        &self,
        partition_id: u64,
        vector_id: VectorId,
        query_scalar: &ScalarData,
    ) -> Result<bool> {
        let key = encode_vector_scalar_key(partition_id, vector_id);
        let Some(value) = self.reader.get(CF_STORE_DATA, &key)? else {
            return Ok(false);
        };
        match rmp_serde::from_slice::<ScalarData>(&value) {
            Ok(record_scalar) => Ok(scalar_data_matches(query_scalar, &record_scalar)),
            Err(err) => {
                warn!(vector_id, error = %err, "decode vector scalar data failed, skip");
                Ok(false)
            }
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Batch similarity search over a region's live index.
    pub fn vector_batch_search(
        &self,
        region: &Arc<Region>,
        vector_index: &Arc<VectorIndex>,
        queries: &[VectorWithId],
        parameter: &VectorSearchParameter,
    ) -> Result<Vec<SearchResult>> {
        validate_region_state(region)?;
        validate_range(region.range())?;

        let mut results = self.search_vector(
            region.partition_id(),
            vector_index,
            region.range(),
            queries,
            parameter,
        )?;

        if parameter.with_scalar_data {
            for hits in &mut results {
                for hit in hits {
                    self.query_vector_scalar_data(
                        region.partition_id(),
                        &parameter.selected_scalar_keys,
                        &mut hit.vector_with_id,
                    )?;
                }
            }
        }
        if parameter.with_table_data {
            for hits in &mut results {
                for hit in hits {
                    self.query_vector_table_data(region.partition_id(), &mut hit.vector_with_id)?;
                }
            }
        }
        Ok(results)
    }

    fn search_vector(
        &self,
        partition_id: u64,
        vector_index: &Arc<VectorIndex>,
        region_range: &Range,
        queries: &[VectorWithId],
        parameter: &VectorSearchParameter,
    ) -> Result<Vec<SearchResult>> {
        if queries.is_empty() {
            warn!("empty search queries");
            return Ok(Vec::new());
        }

        // The region range always bounds the candidate ids.
        let min_vector_id = decode_vector_id(&region_range.start_key);
        let max_vector_id = decode_vector_id(&region_range.end_key);
        info!(min_vector_id, max_vector_id, "vector id range");
        let range_filter = SearchFilter::Range {
            min_vector_id,
            max_vector_id,
        };
        if !vector_index.kernel().supports_filter(&range_filter) {
            return Err(Error::unsupported("kernel does not support range filters"));
        }
        let mut filters = FilterSet::new();
        filters.push(range_filter);

        let mut results = match (parameter.vector_filter, parameter.vector_filter_type) {
            (VectorFilter::ScalarFilter, VectorFilterType::QueryPost) => {
                if queries[0].scalar_data.is_empty() {
                    vector_index.search(
                        queries,
                        parameter.top_n,
                        &filters,
                        parameter.with_vector_data,
                    )?
                } else {
                    // Search wide, then keep the hits whose stored scalar
                    // data matches the query template.
                    let expanded = vector_index.search(
                        queries,
                        parameter.top_n * 10,
                        &filters,
                        parameter.with_vector_data,
                    )?;
                    let mut filtered = Vec::with_capacity(expanded.len());
                    for hits in expanded {
                        let mut kept = Vec::new();
                        for hit in hits {
                            if kept.len() >= parameter.top_n {
                                break;
                            }
                            if self.compare_vector_scalar_data(
                                partition_id,
                                hit.vector_with_id.id,
                                &queries[0].scalar_data,
                            )? {
                                kept.push(hit);
                            }
                        }
                        filtered.push(kept);
                    }
                    filtered
                }
            }
            (VectorFilter::VectorIdFilter, _) => {
                let id_filter = SearchFilter::id_list(parameter.vector_ids.iter().copied());
                if !vector_index.kernel().supports_filter(&id_filter) {
                    return Err(Error::unsupported("kernel does not support id-list filters"));
                }
                filters.push(id_filter);
                vector_index.search(
                    queries,
                    parameter.top_n,
                    &filters,
                    parameter.with_vector_data,
                )?
            }
            (VectorFilter::ScalarFilter, VectorFilterType::QueryPre) => {
                let matching_ids =
                    self.scan_scalar_matching_ids(region_range, &queries[0].scalar_data)?;
                let id_filter = SearchFilter::id_list(matching_ids);
                if !vector_index.kernel().supports_filter(&id_filter) {
                    return Err(Error::unsupported("kernel does not support id-list filters"));
                }
                filters.push(id_filter);
                vector_index.search(
                    queries,
                    parameter.top_n,
                    &filters,
                    parameter.with_vector_data,
                )?
            }
            (VectorFilter::TableFilter, _) => {
                return Err(Error::unsupported(
                    "vector search table filter for coprocessor not support",
                ));
            }
            (VectorFilter::None, _) => vector_index.search(
                queries,
                parameter.top_n,
                &filters,
                parameter.with_vector_data,
            )?,
        };

        // Re-fetch values the kernel did not materialize.
        if parameter.with_vector_data {
            for hits in &mut results {
                for hit in hits {
                    if hit.vector_with_id.has_vector_values() {
                        continue;
                    }
                    let record =
                        self.query_vector_with_id(partition_id, hit.vector_with_id.id, true)?;
                    hit.vector_with_id.vector = record.vector;
                }
            }
        }
        Ok(results)
    }

    /// Scan the scalar keyspace over the region range and collect the ids of
    /// records matching the query template.
    fn scan_scalar_matching_ids(
        &self,
        region_range: &Range,
        query_scalar: &ScalarData,
    ) -> Result<Vec<VectorId>> {
        let start_key = fill_vector_scalar_prefix(&region_range.start_key);
        let end_key = fill_vector_scalar_prefix(&region_range.end_key);

        let mut iter = self.reader.iter(
            CF_STORE_DATA,
            IteratorOptions {
                lower_bound: None,
                upper_bound: Some(end_key),
            },
        )?;

        let mut matching_ids = Vec::with_capacity(1024);
        iter.seek(&start_key);
        while iter.valid() {
            match rmp_serde::from_slice::<ScalarData>(iter.value()) {
                Ok(record_scalar) => {
                    if scalar_data_matches(query_scalar, &record_scalar) {
                        let vector_id = decode_vector_id(iter.key());
                        if vector_id != 0 {
                            matching_ids.push(vector_id);
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "decode vector scalar data failed, skip");
                }
            }
            iter.next();
        }
        Ok(matching_ids)
    }

    // ========================================================================
    // Border and scan
    // ========================================================================

    /// Smallest (`get_min`) or greatest vector id present in the range;
    /// 0 when the range holds no records.
    pub fn vector_get_border_id(&self, region_range: &Range, get_min: bool) -> Result<VectorId> {
        let start_key = fill_vector_data_prefix(&region_range.start_key);
        let end_key = fill_vector_data_prefix(&region_range.end_key);

        if get_min {
            let mut iter = self.reader.iter(
                CF_STORE_DATA,
                IteratorOptions {
                    lower_bound: None,
                    upper_bound: Some(end_key),
                },
            )?;
            iter.seek(&start_key);
            if !iter.valid() {
                return Ok(0);
            }
            Ok(decode_vector_id(iter.key()))
        } else {
            let mut iter = self.reader.iter(
                CF_STORE_DATA,
                IteratorOptions {
                    lower_bound: Some(start_key),
                    upper_bound: None,
                },
            )?;
            iter.seek_for_prev(&end_key);
            if !iter.valid() {
                return Ok(0);
            }
            Ok(decode_vector_id(iter.key()))
        }
    }

    /// Scan ids in key order with optional scalar-equality filtering, then
    /// fetch the requested keyspaces for each id.
    pub fn vector_scan_query(&self, ctx: &VectorScanContext) -> Result<Vec<VectorWithId>> {
        validate_range(&ctx.region_range)?;
        info!(
            partition_id = ctx.partition_id,
            start_id = ctx.start_id,
            end_id = ctx.end_id,
            is_reverse = ctx.is_reverse,
            limit = ctx.limit,
            "scan vector id"
        );

        let vector_ids = self.scan_vector_ids(ctx)?;
        info!(count = vector_ids.len(), "scan vector id finish");
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(vector_ids.len());
        for vector_id in vector_ids {
            match self.query_vector_with_id(ctx.partition_id, vector_id, ctx.with_vector_data) {
                Ok(record) => records.push(record),
                Err(err) if err.is_not_found() => {
                    warn!(vector_id, "vector disappeared during scan");
                    records.push(VectorWithId {
                        id: vector_id,
                        ..Default::default()
                    });
                }
                Err(err) => return Err(err),
            }
        }

        for record in &mut records {
            if ctx.with_scalar_data {
                self.query_vector_scalar_data(ctx.partition_id, &ctx.selected_scalar_keys, record)?;
            }
            if ctx.with_table_data {
                self.query_vector_table_data(ctx.partition_id, record)?;
            }
        }
        Ok(records)
    }

    fn scan_vector_ids(&self, ctx: &VectorScanContext) -> Result<Vec<VectorId>> {
        let seek_key = encode_vector_data_key(ctx.partition_id, ctx.start_id);
        let mut vector_ids = Vec::new();

        if !ctx.is_reverse {
            let mut iter = self.reader.iter(
                CF_STORE_DATA,
                IteratorOptions {
                    lower_bound: None,
                    upper_bound: Some(fill_vector_data_prefix(&ctx.region_range.end_key)),
                },
            )?;
            iter.seek(&seek_key);
            while iter.valid() && vector_ids.len() < ctx.limit {
                let vector_id = decode_vector_id(iter.key());
                if vector_id != 0 && vector_id != u64::MAX {
                    if ctx.end_id != 0 && vector_id > ctx.end_id {
                        break;
                    }
                    if self.scan_filter_matches(ctx, vector_id)? {
                        vector_ids.push(vector_id);
                    }
                }
                iter.next();
            }
        } else {
            let mut iter = self.reader.iter(
                CF_STORE_DATA,
                IteratorOptions {
                    lower_bound: Some(fill_vector_data_prefix(&ctx.region_range.start_key)),
                    upper_bound: None,
                },
            )?;
            iter.seek_for_prev(&seek_key);
            while iter.valid() && vector_ids.len() < ctx.limit {
                let vector_id = decode_vector_id(iter.key());
                if vector_id != 0 && vector_id != u64::MAX {
                    if ctx.end_id != 0 && vector_id < ctx.end_id {
                        break;
                    }
                    if self.scan_filter_matches(ctx, vector_id)? {
                        vector_ids.push(vector_id);
                    }
                }
                iter.prev();
            }
        }
        Ok(vector_ids)
    }

    fn scan_filter_matches(&self, ctx: &VectorScanContext, vector_id: VectorId) -> Result<bool> {
        if !ctx.use_scalar_filter {
            return Ok(true);
        }
        self.compare_vector_scalar_data(ctx.partition_id, vector_id, &ctx.scalar_for_filter)
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Aggregate numbers for one region's live index.
    pub fn vector_get_region_metrics(
        &self,
        region_range: &Range,
        vector_index: &Arc<VectorIndex>,
    ) -> Result<VectorIndexMetrics> {
        Ok(VectorIndexMetrics {
            current_count: vector_index.kernel().count(),
            deleted_count: vector_index.kernel().deleted_count(),
            memory_bytes: vector_index.kernel().memory_size(),
            min_vector_id: self.vector_get_border_id(region_range, true)?,
            max_vector_id: self.vector_get_border_id(region_range, false)?,
        })
    }
}
