//! 目录协作方
//!
//! 索引翻译只通过这里的 trait 读取集合与索引信息。
//! 快照在整个元数据构建期间持有读锁，保证看到一致的目录状态

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use parking_lot::{RwLock, RwLockReadGuard};
use uuid::Uuid;

/// 默认的有序键访问方法
pub const BTREE_ACCESS_METHOD: &str = "btree";

/// 命名空间：数据库名加集合名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// 索引描述
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub name: String,
    /// 有序的键模式，例如 `{"a": 1, "b.c": -1}`
    pub key_pattern: serde_json::Value,
    pub version: i64,
    pub hidden: bool,
    pub sparse: bool,
    pub partial_filter: Option<serde_json::Value>,
    pub collation: Option<serde_json::Value>,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, key_pattern: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            key_pattern,
            version: 2,
            hidden: false,
            sparse: false,
            partial_filter: None,
            collation: None,
        }
    }

    pub fn with_partial_filter(mut self, filter: serde_json::Value) -> Self {
        self.partial_filter = Some(filter);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// 访问方法名：键模式中出现字符串取值（如 `"hashed"`、`"text"`）时为该字符串，否则为有序键
    pub fn access_method(&self) -> String {
        self.key_pattern
            .as_object()
            .and_then(|fields| fields.values().find_map(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| BTREE_ACCESS_METHOD.to_string())
    }

    pub fn is_partial(&self) -> bool {
        self.partial_filter.is_some()
    }
}

/// 目录中的一条索引记录
#[derive(Debug, Clone, PartialEq)]
pub struct IndexCatalogEntry {
    pub descriptor: IndexDescriptor,
    pub multikey: bool,
    /// 每个键字段中哪些路径位置是多键的
    pub multikey_paths: Vec<BTreeSet<usize>>,
    pub ready: bool,
}

impl IndexCatalogEntry {
    pub fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            multikey: false,
            multikey_paths: Vec::new(),
            ready: true,
        }
    }

    pub fn with_multikey_paths(mut self, multikey_paths: Vec<BTreeSet<usize>>) -> Self {
        self.multikey = true;
        self.multikey_paths = multikey_paths;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// 集合句柄
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionHandle {
    pub uuid: Uuid,
    pub num_records: u64,
    pub indexes: Vec<IndexCatalogEntry>,
}

impl CollectionHandle {
    pub fn new(num_records: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            num_records,
            indexes: Vec::new(),
        }
    }

    /// 已构建完成的索引
    pub fn ready_indexes(&self) -> impl Iterator<Item = &IndexCatalogEntry> {
        self.indexes.iter().filter(|e| e.ready)
    }
}

/// 一致的目录视图
pub trait CatalogSnapshot {
    fn collection(&self, ns: &Namespace) -> Option<&CollectionHandle>;
}

/// 目录协作方
pub trait Catalog {
    /// 获取快照，快照存活期间目录不会被修改
    fn snapshot(&self) -> Box<dyn CatalogSnapshot + '_>;
}

/// 基于读写锁的内存目录
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    collections: RwLock<BTreeMap<Namespace, CollectionHandle>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建集合，已存在时返回已有集合的标识
    pub fn create_collection(&self, ns: Namespace, num_records: u64) -> Uuid {
        let mut collections = self.collections.write();
        collections
            .entry(ns)
            .or_insert_with(|| CollectionHandle::new(num_records))
            .uuid
    }

    pub fn drop_collection(&self, ns: &Namespace) -> bool {
        self.collections.write().remove(ns).is_some()
    }

    /// 添加索引记录，集合不存在时返回 false
    ///
    /// 不检查名称唯一性，重复名称由索引翻译报告
    pub fn add_index(&self, ns: &Namespace, entry: IndexCatalogEntry) -> bool {
        match self.collections.write().get_mut(ns) {
            Some(handle) => {
                handle.indexes.push(entry);
                true
            }
            None => false,
        }
    }

    pub fn set_num_records(&self, ns: &Namespace, num_records: u64) -> bool {
        match self.collections.write().get_mut(ns) {
            Some(handle) => {
                handle.num_records = num_records;
                true
            }
            None => false,
        }
    }

    /// 更新某个索引的多键状态
    pub fn set_multikey_paths(&self, ns: &Namespace, index: &str, paths: Vec<BTreeSet<usize>>) -> bool {
        let mut collections = self.collections.write();
        let Some(entry) = collections
            .get_mut(ns)
            .and_then(|h| h.indexes.iter_mut().find(|e| e.name() == index))
        else {
            return false;
        };
        entry.multikey = true;
        entry.multikey_paths = paths;
        true
    }
}

struct InMemorySnapshot<'a> {
    guard: RwLockReadGuard<'a, BTreeMap<Namespace, CollectionHandle>>,
}

impl CatalogSnapshot for InMemorySnapshot<'_> {
    fn collection(&self, ns: &Namespace) -> Option<&CollectionHandle> {
        self.guard.get(ns)
    }
}

impl Catalog for InMemoryCatalog {
    fn snapshot(&self) -> Box<dyn CatalogSnapshot + '_> {
        Box::new(InMemorySnapshot {
            guard: self.collections.read(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_access_method_from_key_pattern() {
        assert_eq!(IndexDescriptor::new("a_1", json!({"a": 1})).access_method(), "btree");
        assert_eq!(
            IndexDescriptor::new("a_hashed", json!({"a": "hashed"})).access_method(),
            "hashed"
        );
    }

    #[test]
    fn test_snapshot_sees_collection_and_ready_indexes() {
        let catalog = InMemoryCatalog::new();
        let ns = Namespace::new("test", "coll");
        catalog.create_collection(ns.clone(), 10);
        assert!(catalog.add_index(&ns, IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1})))));
        assert!(catalog.add_index(
            &ns,
            IndexCatalogEntry::new(IndexDescriptor::new("b_1", json!({"b": 1}))).not_ready()
        ));
        assert!(!catalog.add_index(&Namespace::new("test", "none"), IndexCatalogEntry::new(IndexDescriptor::new("x", json!({"x": 1})))));

        let snapshot = catalog.snapshot();
        let handle = snapshot.collection(&ns).expect("集合应该存在");
        assert_eq!(handle.num_records, 10);
        let names: Vec<&str> = handle.ready_indexes().map(|e| e.name()).collect();
        assert_eq!(names, vec!["a_1"]);
        assert!(snapshot.collection(&Namespace::new("test", "none")).is_none());
    }

    #[test]
    fn test_set_multikey_paths() {
        let catalog = InMemoryCatalog::new();
        let ns = Namespace::new("test", "coll");
        catalog.create_collection(ns.clone(), 0);
        catalog.add_index(&ns, IndexCatalogEntry::new(IndexDescriptor::new("ab_1", json!({"a.b": 1}))));
        assert!(catalog.set_multikey_paths(&ns, "ab_1", vec![BTreeSet::from([0])]));
        let snapshot = catalog.snapshot();
        let entry = &snapshot.collection(&ns).expect("集合应该存在").indexes[0];
        assert!(entry.multikey);
        assert_eq!(entry.multikey_paths, vec![BTreeSet::from([0])]);
    }
}
