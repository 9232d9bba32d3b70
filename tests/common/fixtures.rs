//! 测试数据生成模块
//!
//! 提供目录、命名空间和元数据的构造函数

use std::collections::{BTreeMap, BTreeSet};

use docplan::query::abt::path::{make_path_get, make_path_identity};
use docplan::query::abt::CollationOp;
use docplan::query::metadata::index_bounds::PartialSchemaRequirements;
use docplan::query::metadata::{DistributionAndPaths, IndexCollationEntry, IndexDefinition, Metadata, ScanDefinition};
use docplan::query::translate::{IndexCatalogEntry, IndexDescriptor, InMemoryCatalog, Namespace};
use serde_json::json;

/// 测试集合的记录数
pub const RECORDS: u64 = 1000;

pub fn coll_ns() -> Namespace {
    Namespace::new("test", "coll")
}

/// 只有集合、没有索引的目录
pub fn empty_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.create_collection(coll_ns(), RECORDS);
    catalog
}

/// 带有 `{a: 1}` 单字段索引的目录
pub fn catalog_with_a_index() -> InMemoryCatalog {
    let catalog = empty_catalog();
    catalog.add_index(&coll_ns(), IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1}))));
    catalog
}

/// 带有 `{a: 1}` 和 `{b: 1}` 两个索引的目录
pub fn catalog_with_a_and_b_indexes() -> InMemoryCatalog {
    let catalog = catalog_with_a_index();
    catalog.add_index(&coll_ns(), IndexCatalogEntry::new(IndexDescriptor::new("b_1", json!({"b": 1}))));
    catalog
}

/// 带有 `{"a.b": 1}` 多键索引的目录，`a` 是数组
pub fn catalog_with_multikey_index() -> InMemoryCatalog {
    let catalog = empty_catalog();
    let entry = IndexCatalogEntry::new(IndexDescriptor::new("a.b_1", json!({"a.b": 1})))
        .with_multikey_paths(vec![BTreeSet::from([0])]);
    catalog.add_index(&coll_ns(), entry);
    catalog
}

/// 带有 `{a: 1}` 多键索引的目录，`a` 本身是数组
pub fn catalog_with_multikey_a_index() -> InMemoryCatalog {
    let catalog = empty_catalog();
    let entry = IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1})))
        .with_multikey_paths(vec![BTreeSet::from([0])]);
    catalog.add_index(&coll_ns(), entry);
    catalog
}

/// 单个扫描定义 `coll`，可选一个 `{a: 1}` 索引
pub fn metadata_with_coll(with_index: bool) -> Metadata {
    let mut indexes = BTreeMap::new();
    if with_index {
        let path = make_path_get("a", make_path_identity()).expect("构造应该成功");
        let index = IndexDefinition::new(
            "a_1",
            vec![IndexCollationEntry::new(path, CollationOp::Ascending)],
            1,
            0,
            false,
            DistributionAndPaths::centralized(),
            PartialSchemaRequirements::new(),
        )
        .expect("构造应该成功");
        indexes.insert("a_1".to_string(), index);
    }
    let def = ScanDefinition::new(
        BTreeMap::new(),
        indexes,
        DistributionAndPaths::centralized(),
        true,
        RECORDS as f64,
    );
    let mut metadata = Metadata::empty();
    metadata.add_scan_definition("coll", def).expect("添加应该成功");
    metadata
}
