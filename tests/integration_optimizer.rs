//! 优化器集成测试
//!
//! 测试范围:
//! - 从管道翻译到物理计划的完整优化
//! - 索引与全扫描之间的代价选择
//! - 多键索引去重
//! - 优化提示
//! - 失败路径

mod common;

use common::assertions::{assert_explain_contains, assert_explain_lacks, assert_ok};
use common::fixtures::{
    catalog_with_a_and_b_indexes, catalog_with_a_index, catalog_with_multikey_a_index, catalog_with_multikey_index,
    coll_ns, metadata_with_coll,
};
use docplan::core::OptimizerError;
use docplan::query::abt::node::{make_root, make_scan};
use docplan::query::abt::{Abt, ExplainGenerator};
use docplan::query::optimizer::{
    DefaultCosting, DisableIndexOptions, HeuristicCe, OptPhase, OptPhaseManager, PrefixId, QueryHints,
};
use docplan::query::translate::{build_metadata, translate_pipeline, Catalog, InMemoryCatalog, Pipeline};
use serde_json::json;

/// 翻译并优化管道，返回优化后计划的打印结果
fn optimize(catalog: &InMemoryCatalog, pipeline: serde_json::Value, hints: QueryHints) -> Option<String> {
    let mut prefix_id = PrefixId::new();
    let snapshot = catalog.snapshot();
    let translation = assert_ok(build_metadata(
        snapshot.as_ref(),
        &coll_ns(),
        &[],
        &mut prefix_id,
        hints.disable_indexes,
        1,
    ));
    let pipeline = assert_ok(Pipeline::parse(&pipeline));
    let initial = assert_ok(translation.initial_tree());
    let tree = assert_ok(translate_pipeline(&pipeline, &translation.scan_projection, initial, &mut prefix_id));

    let mut manager = OptPhaseManager::new(
        OptPhase::all(),
        prefix_id,
        hints,
        translation.metadata,
        Box::new(HeuristicCe::new()),
        Box::new(DefaultCosting::default()),
    );
    if !manager.optimize(&tree) {
        return None;
    }
    manager.optimized_plan().map(ExplainGenerator::explain)
}

// ==================== 索引选择 ====================

#[test]
fn test_equality_uses_index() {
    let explain = optimize(&catalog_with_a_index(), json!([{"$match": {"a": 1}}]), QueryHints::default())
        .expect("应该有计划");
    assert_explain_contains(&explain, "IndexScan");
    assert_explain_contains(&explain, "index: a_1");
    assert_explain_contains(&explain, "Seek");
    assert_explain_lacks(&explain, "Sargable");
}

#[test]
fn test_disable_indexes_falls_back_to_scan() {
    let hints = QueryHints {
        disable_indexes: DisableIndexOptions::DisableAll,
        ..Default::default()
    };
    let explain = optimize(&catalog_with_a_index(), json!([{"$match": {"a": 1}}]), hints).expect("应该有计划");
    assert_explain_contains(&explain, "PhysicalScan");
    assert_explain_lacks(&explain, "IndexScan");
}

#[test]
fn test_unindexed_field_uses_scan() {
    let explain = optimize(&catalog_with_a_index(), json!([{"$match": {"c": 1}}]), QueryHints::default())
        .expect("应该有计划");
    assert_explain_contains(&explain, "PhysicalScan");
    assert_explain_lacks(&explain, "IndexScan");
}

#[test]
fn test_multikey_index_deduplicates_rids() {
    let explain = optimize(
        &catalog_with_multikey_index(),
        json!([{"$match": {"a.b": 1}}]),
        QueryHints::default(),
    )
    .expect("应该有计划");
    assert_explain_contains(&explain, "IndexScan");
    assert_explain_contains(&explain, "Unique");
}

#[test]
fn test_conjunction_over_two_indexes_produces_plan() {
    let explain = optimize(
        &catalog_with_a_and_b_indexes(),
        json!([{"$match": {"a": 1, "b": 2}}]),
        QueryHints::default(),
    )
    .expect("应该有计划");
    assert_explain_contains(&explain, "Root");
    assert_explain_lacks(&explain, "Sargable");
}

#[test]
fn test_rid_intersect_hints_keep_single_index_plan() {
    let hints = QueryHints {
        disable_hash_join_rid_intersect: true,
        disable_merge_join_rid_intersect: true,
        disable_group_by_and_union_rid_intersect: true,
        ..Default::default()
    };
    let explain = optimize(&catalog_with_a_and_b_indexes(), json!([{"$match": {"a": 1, "b": 2}}]), hints)
        .expect("应该有计划");
    assert_explain_lacks(&explain, "HashJoin");
    assert_explain_lacks(&explain, "MergeJoin");
}

// ==================== 索引计划与扫描计划一致 ====================

fn force_index() -> QueryHints {
    QueryHints {
        disable_scan: true,
        ..Default::default()
    }
}

fn force_scan() -> QueryHints {
    QueryHints {
        disable_indexes: DisableIndexOptions::DisableAll,
        ..Default::default()
    }
}

fn compare_count(explain: &str, op: &str) -> usize {
    explain.matches(&format!("PathCompare [{}]", op)).count()
}

#[test]
fn test_range_on_index_keeps_residual_filter() {
    let pipeline = json!([{"$match": {"a": {"$gt": 1}}}]);
    let index_plan = optimize(&catalog_with_a_index(), pipeline.clone(), force_index()).expect("应该有索引计划");
    let scan_plan = optimize(&catalog_with_a_index(), pipeline, force_scan()).expect("应该有扫描计划");
    assert_explain_contains(&index_plan, "IndexScan");
    assert_explain_contains(&index_plan, "Filter");
    assert_eq!(compare_count(&index_plan, "Gt"), 1);
    assert_eq!(compare_count(&index_plan, "Gt"), compare_count(&scan_plan, "Gt"));
}

#[test]
fn test_equality_on_index_needs_no_residual() {
    let explain = optimize(&catalog_with_a_index(), json!([{"$match": {"a": 1}}]), force_index()).expect("应该有计划");
    assert_explain_contains(&explain, "IndexScan");
    assert_eq!(compare_count(&explain, "Eq"), 0);
}

#[test]
fn test_multikey_conjunction_keeps_both_predicates() {
    let pipeline = json!([{"$match": {"$and": [{"a": {"$gt": 1}}, {"a": {"$lt": 5}}]}}]);
    let index_plan =
        optimize(&catalog_with_multikey_a_index(), pipeline.clone(), force_index()).expect("应该有索引计划");
    let scan_plan = optimize(&catalog_with_multikey_a_index(), pipeline, force_scan()).expect("应该有扫描计划");
    assert_explain_contains(&index_plan, "IndexScan");
    assert_explain_contains(&index_plan, "Unique");
    for plan in [&index_plan, &scan_plan] {
        assert_explain_lacks(plan, "ValueScan");
        assert_eq!(compare_count(plan, "Gt"), 1);
        assert_eq!(compare_count(plan, "Lt"), 1);
    }
}

#[test]
fn test_disjoint_ranges_on_array_field_are_not_contradictory() {
    // [0, 10] 同时满足 a > 5 和 a < 1
    let pipeline = json!([{"$match": {"$and": [{"a": {"$gt": 5}}, {"a": {"$lt": 1}}]}}]);
    let explain = optimize(&catalog_with_multikey_a_index(), pipeline, QueryHints::default()).expect("应该有计划");
    assert_explain_lacks(&explain, "ValueScan");
    assert_eq!(compare_count(&explain, "Gt"), 1);
    assert_eq!(compare_count(&explain, "Lt"), 1);
}

// ==================== 失败路径 ====================

#[test]
fn test_disable_scan_without_usable_index_fails() {
    let hints = QueryHints {
        disable_scan: true,
        ..Default::default()
    };
    assert!(optimize(&catalog_with_a_index(), json!([{"$match": {"c": 1}}]), hints).is_none());
}

#[test]
fn test_free_variable_fails_optimization() {
    let scan = assert_ok(make_scan("scan_0", "coll"));
    let root: Abt = assert_ok(make_root(vec!["unknown".to_string()], scan));
    let mut manager = OptPhaseManager::new(
        OptPhase::all(),
        PrefixId::new(),
        QueryHints::default(),
        metadata_with_coll(false),
        Box::new(HeuristicCe::new()),
        Box::new(DefaultCosting::default()),
    );
    assert!(!manager.optimize(&root));
    assert!(manager.optimized_plan().is_none());
    assert!(matches!(manager.last_error(), Some(OptimizerError::FreeVariables(_))));
}

#[test]
fn test_successful_optimization_always_has_plan() {
    let scan = assert_ok(make_scan("scan_0", "coll"));
    let root = assert_ok(make_root(vec!["scan_0".to_string()], scan));
    let mut manager = OptPhaseManager::new(
        OptPhase::all(),
        PrefixId::new(),
        QueryHints::default(),
        metadata_with_coll(true),
        Box::new(HeuristicCe::new()),
        Box::new(DefaultCosting::default()),
    );
    assert!(manager.optimize(&root));
    assert!(manager.optimized_plan().is_some());
    assert!(manager.plan_cost().is_some());
    assert!(manager.memo().group_count() > 0);
}

#[test]
fn test_optimization_is_deterministic() {
    let pipeline = json!([{"$match": {"a": {"$gt": 3}}}, {"$limit": 5}]);
    let first = optimize(&catalog_with_a_index(), pipeline.clone(), QueryHints::default());
    let second = optimize(&catalog_with_a_index(), pipeline, QueryHints::default());
    assert!(first.is_some());
    assert_eq!(first, second);
}
