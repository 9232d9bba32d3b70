//! 元数据翻译集成测试
//!
//! 测试范围:
//! - 目录快照到扫描定义的翻译
//! - 缺失集合
//! - 不支持的索引形态就地排除
//! - 部分索引与索引禁用提示
//! - 致命的目录契约违反

mod common;

use std::collections::BTreeSet;

use common::assertions::assert_ok;
use common::fixtures::{catalog_with_a_index, catalog_with_multikey_index, coll_ns, empty_catalog, RECORDS};
use docplan::core::MetadataError;
use docplan::query::abt::ExplainGenerator;
use docplan::query::metadata::UNKNOWN_CE;
use docplan::query::optimizer::{DisableIndexOptions, PrefixId};
use docplan::query::translate::{
    build_metadata, Catalog, IndexCatalogEntry, IndexDescriptor, InMemoryCatalog, MetadataTranslation, Namespace,
};
use serde_json::json;

fn translate(catalog: &InMemoryCatalog, disable: DisableIndexOptions) -> Result<MetadataTranslation, MetadataError> {
    let snapshot = catalog.snapshot();
    build_metadata(snapshot.as_ref(), &coll_ns(), &[], &mut PrefixId::new(), disable, 1)
}

fn index_names(translation: &MetadataTranslation) -> Vec<String> {
    translation
        .metadata
        .scan_def(&translation.scan_def_name)
        .map(|def| def.index_defs().keys().cloned().collect())
        .unwrap_or_default()
}

fn with_index(descriptor: IndexDescriptor) -> InMemoryCatalog {
    let catalog = empty_catalog();
    catalog.add_index(&coll_ns(), IndexCatalogEntry::new(descriptor));
    catalog
}

// ==================== 扫描定义 ====================

#[test]
fn test_existing_collection_scan_definition() {
    let translation = assert_ok(translate(&catalog_with_a_index(), DisableIndexOptions::Enabled));
    assert!(translation.primary_exists);
    assert_eq!(translation.scan_projection, "scan_0");
    assert!(translation.scan_def_name.starts_with("coll_"));

    let def = translation
        .metadata
        .scan_def(&translation.scan_def_name)
        .expect("扫描定义应该存在");
    assert!(def.exists());
    assert_eq!(def.ce(), RECORDS as f64);
    assert_eq!(def.option("type"), Some("collection"));
    assert_eq!(def.option("database"), Some("test"));
    assert_eq!(def.option("collection"), Some("coll"));
    assert_eq!(index_names(&translation), vec!["a_1".to_string()]);
}

#[test]
fn test_missing_collection_yields_empty_definition() {
    let catalog = InMemoryCatalog::new();
    let translation = assert_ok(translate(&catalog, DisableIndexOptions::Enabled));
    assert!(!translation.primary_exists);
    assert_eq!(translation.scan_def_name, "coll_<missing_uuid>");

    let def = translation
        .metadata
        .scan_def(&translation.scan_def_name)
        .expect("扫描定义应该存在");
    assert!(!def.exists());
    assert_eq!(def.ce(), UNKNOWN_CE);
    assert!(def.index_defs().is_empty());

    let initial = assert_ok(translation.initial_tree());
    assert!(ExplainGenerator::explain(&initial).starts_with("ValueScan [rows: 0"));
}

#[test]
fn test_involved_collections_get_their_own_definitions() {
    let catalog = catalog_with_a_index();
    let other = Namespace::new("test", "other");
    catalog.create_collection(other.clone(), 5);
    let snapshot = catalog.snapshot();
    let translation = assert_ok(build_metadata(
        snapshot.as_ref(),
        &coll_ns(),
        &[other.clone(), coll_ns(), other],
        &mut PrefixId::new(),
        DisableIndexOptions::Enabled,
        1,
    ));
    assert_eq!(translation.metadata.scan_defs().len(), 2);
    assert_eq!(translation.involved.get("other").map(String::as_str), Some("scan_1"));
    assert_eq!(translation.metadata.scan_def("other").map(|d| d.ce()), Some(5.0));
}

#[test]
fn test_parallel_degree_sets_partitions() {
    let catalog = catalog_with_a_index();
    let snapshot = catalog.snapshot();
    let translation = assert_ok(build_metadata(
        snapshot.as_ref(),
        &coll_ns(),
        &[],
        &mut PrefixId::new(),
        DisableIndexOptions::Enabled,
        4,
    ));
    assert_eq!(translation.metadata.number_of_partitions(), 4);
    assert!(translation.metadata.is_parallel_execution());
}

// ==================== 索引排除 ====================

#[test]
fn test_wildcard_index_excluded() {
    let catalog = with_index(IndexDescriptor::new("wc", json!({"$**": 1})));
    let translation = assert_ok(translate(&catalog, DisableIndexOptions::Enabled));
    assert!(index_names(&translation).is_empty());
}

#[test]
fn test_hashed_and_hidden_indexes_excluded() {
    let catalog = with_index(IndexDescriptor::new("a_hashed", json!({"a": "hashed"})));
    catalog.add_index(
        &coll_ns(),
        IndexCatalogEntry::new(IndexDescriptor::new("b_1", json!({"b": 1})).hidden()),
    );
    catalog.add_index(
        &coll_ns(),
        IndexCatalogEntry::new(IndexDescriptor::new("c_1", json!({"c": 1})).sparse()),
    );
    let translation = assert_ok(translate(&catalog, DisableIndexOptions::Enabled));
    assert!(index_names(&translation).is_empty());
}

#[test]
fn test_unsatisfiable_partial_filter_excluded() {
    let catalog = with_index(
        IndexDescriptor::new("a_1", json!({"a": 1})).with_partial_filter(json!({"a": {"$gt": 5, "$lt": 1}})),
    );
    let translation = assert_ok(translate(&catalog, DisableIndexOptions::Enabled));
    assert!(index_names(&translation).is_empty());
}

#[test]
fn test_partial_index_requirements_recorded() {
    let catalog = with_index(
        IndexDescriptor::new("a_1", json!({"a": 1})).with_partial_filter(json!({"b": {"$gt": 0}})),
    );
    let translation = assert_ok(translate(&catalog, DisableIndexOptions::Enabled));
    let def = translation
        .metadata
        .scan_def(&translation.scan_def_name)
        .and_then(|d| d.index_defs().get("a_1"))
        .expect("部分索引应该保留");
    assert!(def.is_partial());
    assert_eq!(def.partial_requirements().len(), 1);
}

#[test]
fn test_disable_partial_only_keeps_regular_indexes() {
    let catalog = catalog_with_a_index();
    catalog.add_index(
        &coll_ns(),
        IndexCatalogEntry::new(
            IndexDescriptor::new("b_1", json!({"b": 1})).with_partial_filter(json!({"b": {"$gt": 0}})),
        ),
    );
    let translation = assert_ok(translate(&catalog, DisableIndexOptions::DisablePartialOnly));
    assert_eq!(index_names(&translation), vec!["a_1".to_string()]);
}

#[test]
fn test_disable_all_indexes() {
    let translation = assert_ok(translate(&catalog_with_a_index(), DisableIndexOptions::DisableAll));
    assert!(index_names(&translation).is_empty());
}

#[test]
fn test_multikey_index_has_traversal() {
    let translation = assert_ok(translate(&catalog_with_multikey_index(), DisableIndexOptions::Enabled));
    let def = translation
        .metadata
        .scan_def(&translation.scan_def_name)
        .and_then(|d| d.index_defs().get("a.b_1"))
        .expect("多键索引应该保留");
    assert!(def.is_multikey());
    let path = ExplainGenerator::explain_compact(&def.collation_spec()[0].path);
    assert!(path.contains("PathTraverse"));
}

// ==================== 契约违反 ====================

#[test]
fn test_duplicate_index_names_are_fatal() {
    let catalog = catalog_with_a_index();
    catalog.add_index(
        &coll_ns(),
        IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"b": 1}))),
    );
    assert_eq!(
        translate(&catalog, DisableIndexOptions::Enabled).err(),
        Some(MetadataError::DuplicateIndexName("a_1".to_string()))
    );
}

#[test]
fn test_multikey_paths_shorter_than_key_pattern_are_fatal() {
    let catalog = empty_catalog();
    let entry = IndexCatalogEntry::new(IndexDescriptor::new("ab", json!({"a": 1, "b": 1})))
        .with_multikey_paths(vec![BTreeSet::from([0])]);
    catalog.add_index(&coll_ns(), entry);
    assert!(matches!(
        translate(&catalog, DisableIndexOptions::Enabled),
        Err(MetadataError::MultikeyPathsMismatch { expected: 2, actual: 1, .. })
    ));
}

#[test]
fn test_empty_multikey_paths_are_fatal() {
    let catalog = empty_catalog();
    let entry = IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1}))).with_multikey_paths(Vec::new());
    catalog.add_index(&coll_ns(), entry);
    assert!(matches!(
        translate(&catalog, DisableIndexOptions::Enabled),
        Err(MetadataError::EmptyMultikeyPaths { .. })
    ));
}
