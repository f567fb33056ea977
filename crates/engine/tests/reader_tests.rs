//! Filtered reader: point/batch/scan reads and the search filter pipeline.

mod common;

use std::sync::Arc;

use common::{scalar, test_values, TestNode};
use shardvec_core::codec::{encode_raw_key, encode_vector_data_key};
use shardvec_core::{
    DistanceMetric, IndexParameter, Range, Region, ScalarValue, Vector, VectorWithId,
};
use shardvec_engine::{
    InProcessNodeClient, VectorFilter, VectorFilterType, VectorScanContext, VectorSearchParameter,
};
use shardvec_storage::{KvWriter, LogStorage};

/// Node with ids 1..=60 committed: even ids tagged kind=even, odd kind=odd,
/// ids 1..=10 carry table bytes.
fn reader_fixture(parameter: IndexParameter) -> (TestNode, Arc<Region>) {
    let client = InProcessNodeClient::new();
    let node = TestNode::new("127.0.0.1:25001", &client);
    let region = node.add_local_region(1, parameter, 1, 10_000);

    node.manager.create_vector_index(&region).unwrap();
    for id in 1..=60u64 {
        let kind = if id % 2 == 0 { "even" } else { "odd" };
        node.seed_record(
            1,
            id,
            test_values(id),
            Some(scalar("kind", ScalarValue::String(kind.into()))),
            (id <= 10).then(|| format!("table-{id}").into_bytes()),
        );
        let record = VectorWithId::with_vector(id, Vector::Float(test_values(id)));
        let log = node.log_storage_manager.log_storage(1).unwrap();
        log.append_command(id, &shardvec_storage::RaftCommand::vector_add(vec![record.clone()]))
            .unwrap();
        node.manager.apply_vector_add(&region, &[record], id).unwrap();
    }
    (node, region)
}

fn search_query(values: Vec<f32>, scalar_data: shardvec_core::ScalarData) -> Vec<VectorWithId> {
    vec![VectorWithId {
        id: 0,
        vector: Some(Vector::Float(values)),
        scalar_data,
        table_data: None,
    }]
}

#[test]
fn query_vector_with_id_hits_and_misses() {
    let (node, _region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));

    let record = node.reader.query_vector_with_id(1, 7, true).unwrap();
    assert_eq!(record.id, 7);
    assert_eq!(record.vector, Some(Vector::Float(test_values(7))));

    let without_values = node.reader.query_vector_with_id(1, 7, false).unwrap();
    assert!(without_values.vector.is_none());

    let missing = node.reader.query_vector_with_id(1, 9999, true).unwrap_err();
    assert!(missing.is_not_found());
}

#[test]
fn batch_query_stays_aligned_and_projects_scalars() {
    let (node, _region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));

    let records = node
        .reader
        .vector_batch_query(1, &[2, 9999, 4], true, true, &[], true)
        .unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[1].is_none());

    let second = records[0].as_ref().unwrap();
    assert_eq!(second.id, 2);
    assert_eq!(
        second.scalar_data.get("kind"),
        Some(&ScalarValue::String("even".into()))
    );
    assert_eq!(second.table_data, Some(b"table-2".to_vec()));

    // Projection: a selected-keys list that matches nothing strips the map.
    let projected = node
        .reader
        .vector_batch_query(1, &[2], true, true, &["other".to_string()], false)
        .unwrap();
    assert!(projected[0].as_ref().unwrap().scalar_data.is_empty());
}

#[test]
fn plain_search_refetches_vector_values_for_graph_kernels() {
    let (node, region) = reader_fixture(IndexParameter::hnsw(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    let parameter = VectorSearchParameter {
        top_n: 5,
        with_scalar_data: true,
        ..Default::default()
    };
    let results = node
        .reader
        .vector_batch_search(
            &region,
            &vector_index,
            &search_query(test_values(30), Default::default()),
            &parameter,
        )
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].len(), 5);
    assert_eq!(results[0][0].vector_with_id.id, 30);
    for hit in &results[0] {
        // The graph kernel returns ids only; the reader fills in values and
        // scalar data from the keyspaces.
        assert!(hit.vector_with_id.has_vector_values());
        assert!(hit.vector_with_id.scalar_data.contains_key("kind"));
    }
}

#[test]
fn search_results_respect_the_region_range_filter() {
    let (node, region) = reader_fixture(IndexParameter::hnsw(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    // Shrink the served range: only ids [1, 20) remain addressable.
    let narrow = Region::new(shardvec_core::RegionDefinition {
        id: 1,
        partition_id: 1,
        range: Range::new(encode_raw_key(1, 1), encode_raw_key(1, 20)),
        index_parameter: region.index_parameter().clone(),
    });
    narrow.set_state(shardvec_core::RegionState::Normal);

    let parameter = VectorSearchParameter {
        top_n: 50,
        with_vector_data: false,
        ..Default::default()
    };
    let results = node
        .reader
        .vector_batch_search(
            &narrow,
            &vector_index,
            &search_query(test_values(30), Default::default()),
            &parameter,
        )
        .unwrap();
    assert!(!results[0].is_empty());
    for hit in &results[0] {
        assert!((1..20).contains(&hit.vector_with_id.id));
    }
}

#[test]
fn scalar_post_filter_truncates_to_top_n() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    let parameter = VectorSearchParameter {
        top_n: 4,
        vector_filter: VectorFilter::ScalarFilter,
        vector_filter_type: VectorFilterType::QueryPost,
        with_vector_data: false,
        ..Default::default()
    };
    let query = search_query(test_values(10), scalar("kind", ScalarValue::String("even".into())));
    let results = node
        .reader
        .vector_batch_search(&region, &vector_index, &query, &parameter)
        .unwrap();

    assert_eq!(results[0].len(), 4);
    for hit in &results[0] {
        assert_eq!(hit.vector_with_id.id % 2, 0);
    }

    // Deterministic: the same query against a quiescent index repeats.
    let again = node
        .reader
        .vector_batch_search(&region, &vector_index, &query, &parameter)
        .unwrap();
    assert_eq!(results, again);
}

#[test]
fn scalar_post_filter_without_constraints_is_a_plain_search() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    let parameter = VectorSearchParameter {
        top_n: 3,
        vector_filter: VectorFilter::ScalarFilter,
        vector_filter_type: VectorFilterType::QueryPost,
        with_vector_data: false,
        ..Default::default()
    };
    let results = node
        .reader
        .vector_batch_search(
            &region,
            &vector_index,
            &search_query(test_values(10), Default::default()),
            &parameter,
        )
        .unwrap();
    assert_eq!(results[0].len(), 3);
    assert_eq!(results[0][0].vector_with_id.id, 10);
}

#[test]
fn scalar_pre_filter_searches_inside_the_matching_set() {
    let (node, region) = reader_fixture(IndexParameter::hnsw(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    let parameter = VectorSearchParameter {
        top_n: 10,
        vector_filter: VectorFilter::ScalarFilter,
        vector_filter_type: VectorFilterType::QueryPre,
        with_vector_data: false,
        ..Default::default()
    };
    let results = node
        .reader
        .vector_batch_search(
            &region,
            &vector_index,
            &search_query(test_values(11), scalar("kind", ScalarValue::String("odd".into()))),
            &parameter,
        )
        .unwrap();

    assert!(!results[0].is_empty());
    for hit in &results[0] {
        assert_eq!(hit.vector_with_id.id % 2, 1);
    }
}

#[test]
fn vector_id_filter_is_an_allow_list() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    let parameter = VectorSearchParameter {
        top_n: 10,
        vector_filter: VectorFilter::VectorIdFilter,
        vector_ids: vec![3, 5, 8],
        with_vector_data: false,
        ..Default::default()
    };
    let results = node
        .reader
        .vector_batch_search(
            &region,
            &vector_index,
            &search_query(test_values(5), Default::default()),
            &parameter,
        )
        .unwrap();

    let mut ids: Vec<u64> = results[0].iter().map(|h| h.vector_with_id.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![3, 5, 8]);
}

#[test]
fn table_filter_is_not_supported() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    let parameter = VectorSearchParameter {
        vector_filter: VectorFilter::TableFilter,
        ..Default::default()
    };
    let err = node
        .reader
        .vector_batch_search(
            &region,
            &vector_index,
            &search_query(test_values(5), Default::default()),
            &parameter,
        )
        .unwrap_err();
    assert_eq!(err.code().as_str(), "EVECTOR_NOT_SUPPORT");
}

#[test]
fn search_rejects_unavailable_region() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    region.set_state(shardvec_core::RegionState::Deleting);
    let err = node
        .reader
        .vector_batch_search(
            &region,
            &vector_index,
            &search_query(test_values(5), Default::default()),
            &VectorSearchParameter::default(),
        )
        .unwrap_err();
    assert_eq!(err.code().as_str(), "EREGION_UNAVAILABLE");
    region.set_state(shardvec_core::RegionState::Normal);
}

#[test]
fn border_ids_and_region_metrics() {
    let (node, region) = reader_fixture(IndexParameter::hnsw(2, DistanceMetric::L2));
    let vector_index = node.manager.get_vector_index(1).unwrap();

    assert_eq!(node.reader.vector_get_border_id(region.range(), true).unwrap(), 1);
    assert_eq!(node.reader.vector_get_border_id(region.range(), false).unwrap(), 60);

    let metrics = node
        .reader
        .vector_get_region_metrics(region.range(), &vector_index)
        .unwrap();
    assert_eq!(metrics.current_count, 60);
    assert_eq!(metrics.deleted_count, 0);
    assert!(metrics.memory_bytes > 0);
    assert_eq!(metrics.min_vector_id, 1);
    assert_eq!(metrics.max_vector_id, 60);

    // An empty range reports zero borders.
    let empty = Range::new(encode_raw_key(2, 1), encode_raw_key(2, 100));
    assert_eq!(node.reader.vector_get_border_id(&empty, true).unwrap(), 0);
    assert_eq!(node.reader.vector_get_border_id(&empty, false).unwrap(), 0);
}

fn scan_context(region: &Arc<Region>) -> VectorScanContext {
    VectorScanContext {
        partition_id: 1,
        region_range: region.range().clone(),
        start_id: 1,
        end_id: 0,
        is_reverse: false,
        limit: 100,
        with_vector_data: false,
        with_scalar_data: false,
        selected_scalar_keys: Vec::new(),
        with_table_data: false,
        use_scalar_filter: false,
        scalar_for_filter: Default::default(),
    }
}

#[test]
fn scan_is_monotone_and_respects_limit_and_end() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));

    let mut ctx = scan_context(&region);
    ctx.limit = 7;
    let records = node.reader.vector_scan_query(&ctx).unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);

    ctx.limit = 100;
    ctx.start_id = 10;
    ctx.end_id = 14;
    let records = node.reader.vector_scan_query(&ctx).unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![10, 11, 12, 13, 14]);
}

#[test]
fn reverse_scan_descends() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));

    let mut ctx = scan_context(&region);
    ctx.is_reverse = true;
    ctx.start_id = 15;
    ctx.end_id = 11;
    let records = node.reader.vector_scan_query(&ctx).unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![15, 14, 13, 12, 11]);
}

#[test]
fn scan_skips_reserved_sentinel_ids() {
    let client = InProcessNodeClient::new();
    let node = TestNode::new("127.0.0.1:25002", &client);
    let region = node.add_region(
        1,
        IndexParameter::flat(2, DistanceMetric::L2),
        0,
        u64::MAX,
        vec!["127.0.0.1:25002".to_string()],
        "127.0.0.1:25002",
    );

    // Records at the sentinel ids exist in the keyspace but never surface.
    for id in [0u64, 1, 2, u64::MAX] {
        node.seed_record(1, id, vec![1.0, 1.0], None, None);
    }
    // Force a raw write of the u64::MAX key (seed_record already did), then scan.
    node.engine
        .put(
            shardvec_storage::CF_STORE_DATA,
            encode_vector_data_key(1, u64::MAX),
            rmp_serde::to_vec(&Vector::Float(vec![1.0, 1.0])).unwrap(),
        )
        .unwrap();

    let mut ctx = scan_context(&region);
    ctx.start_id = 0;
    ctx.region_range = region.range().clone();
    let records = node.reader.vector_scan_query(&ctx).unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn scan_applies_scalar_equality_filter() {
    let (node, region) = reader_fixture(IndexParameter::flat(2, DistanceMetric::L2));

    let mut ctx = scan_context(&region);
    ctx.limit = 5;
    ctx.use_scalar_filter = true;
    ctx.scalar_for_filter = scalar("kind", ScalarValue::String("even".into()));
    ctx.with_scalar_data = true;
    let records = node.reader.vector_scan_query(&ctx).unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![2, 4, 6, 8, 10]);
    for record in &records {
        assert_eq!(
            record.scalar_data.get("kind"),
            Some(&ScalarValue::String("even".into()))
        );
    }
}
