//! 索引与集合元数据翻译
//!
//! 在目录快照下把每个涉及的集合翻译为扫描定义。
//! 不支持的索引形态就地排除并记录警告；目录契约违反以 `MetadataError` 返回

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};

use super::catalog::{CatalogSnapshot, CollectionHandle, IndexCatalogEntry, Namespace, BTREE_ACCESS_METHOD};
use super::match_expr::translate_filter;
use super::requirements::convert_to_requirements;
use crate::core::error::{AbtResult, MetadataError, MetadataResult};
use crate::query::abt::expr::{make_eval_filter, make_variable};
use crate::query::abt::node::{make_scan, make_value_scan};
use crate::query::abt::path::{make_path_get, make_path_identity, make_path_traverse};
use crate::query::abt::{Abt, CollationOp, DistributionType, ProjectionName};
use crate::query::metadata::index_bounds::PartialSchemaRequirements;
use crate::query::metadata::{
    DistributionAndPaths, IndexCollationEntry, IndexDefinition, Metadata, ScanDefinition, UNKNOWN_CE,
};
use crate::query::optimizer::hints::DisableIndexOptions;
use crate::query::optimizer::prefix_id::PrefixId;

/// 缺失集合使用的标识
pub const MISSING_UUID: &str = "<missing_uuid>";

const WILDCARD_FRAGMENT: &str = "$**";

/// 索引被排除的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    Hidden,
    Sparse,
    UnsupportedAccessMethod(String),
    PartialIndexesDisabled,
    Wildcard,
    InvalidDirection(String),
    MalformedKeyPattern(String),
    MalformedPartialFilter(String),
    UnsupportedPartialFilter,
    UnsatisfiablePartialFilter,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Hidden => write!(f, "隐藏索引"),
            ExclusionReason::Sparse => write!(f, "稀疏索引"),
            ExclusionReason::UnsupportedAccessMethod(method) => write!(f, "不支持的访问方法 {}", method),
            ExclusionReason::PartialIndexesDisabled => write!(f, "部分索引已被提示禁用"),
            ExclusionReason::Wildcard => write!(f, "通配符索引"),
            ExclusionReason::InvalidDirection(dir) => write!(f, "无效的排序方向 {}", dir),
            ExclusionReason::MalformedKeyPattern(reason) => write!(f, "键模式无法分解: {}", reason),
            ExclusionReason::MalformedPartialFilter(reason) => write!(f, "部分过滤表达式无效: {}", reason),
            ExclusionReason::UnsupportedPartialFilter => write!(f, "部分过滤表达式无法转换为需求"),
            ExclusionReason::UnsatisfiablePartialFilter => write!(f, "部分过滤表达式不可满足"),
        }
    }
}

/// 单个索引的翻译结果，致命错误走 `Err` 分支
#[derive(Debug, Clone, PartialEq)]
pub enum IndexTranslation {
    Usable(IndexDefinition),
    Excluded(ExclusionReason),
}

fn distribution_for(dop: usize) -> DistributionAndPaths {
    if dop <= 1 {
        DistributionAndPaths::new(DistributionType::Centralized)
    } else {
        DistributionAndPaths::new(DistributionType::UnknownPartitioning)
    }
}

/// 翻译单个索引
pub fn build_index_definition(
    entry: &IndexCatalogEntry,
    scan_projection: &str,
    disable: DisableIndexOptions,
    dop: usize,
) -> MetadataResult<IndexTranslation> {
    use IndexTranslation::Excluded;

    let descriptor = &entry.descriptor;
    if descriptor.hidden {
        return Ok(Excluded(ExclusionReason::Hidden));
    }
    if descriptor.sparse {
        return Ok(Excluded(ExclusionReason::Sparse));
    }
    let access_method = descriptor.access_method();
    if access_method != BTREE_ACCESS_METHOD {
        return Ok(Excluded(ExclusionReason::UnsupportedAccessMethod(access_method)));
    }
    if disable == DisableIndexOptions::DisablePartialOnly && descriptor.is_partial() {
        return Ok(Excluded(ExclusionReason::PartialIndexesDisabled));
    }

    let Some(fields) = descriptor.key_pattern.as_object().filter(|f| !f.is_empty()) else {
        return Ok(Excluded(ExclusionReason::MalformedKeyPattern(
            descriptor.key_pattern.to_string(),
        )));
    };

    if entry.multikey {
        if entry.multikey_paths.is_empty() {
            return Err(MetadataError::EmptyMultikeyPaths {
                index: descriptor.name.clone(),
            });
        }
        if entry.multikey_paths.len() != fields.len() {
            return Err(MetadataError::MultikeyPathsMismatch {
                index: descriptor.name.clone(),
                expected: fields.len(),
                actual: entry.multikey_paths.len(),
            });
        }
    }

    let mut collation_spec = Vec::with_capacity(fields.len());
    let mut ordering_bits = 0u32;
    for (position, (field, direction)) in fields.iter().enumerate() {
        let fragments: Vec<&str> = field.split('.').collect();
        if fragments.contains(&WILDCARD_FRAGMENT) {
            return Ok(Excluded(ExclusionReason::Wildcard));
        }
        if fragments.iter().any(|f| f.is_empty()) {
            return Ok(Excluded(ExclusionReason::MalformedKeyPattern(field.clone())));
        }
        let op = match direction.as_f64() {
            Some(d) if d == 1.0 => CollationOp::Ascending,
            Some(d) if d == -1.0 => CollationOp::Descending,
            _ => return Ok(Excluded(ExclusionReason::InvalidDirection(direction.to_string()))),
        };
        if op == CollationOp::Descending && position < 32 {
            ordering_bits |= 1 << position;
        }

        let multikey_positions = if entry.multikey {
            entry.multikey_paths.get(position)
        } else {
            None
        };
        let path = fragments
            .iter()
            .enumerate()
            .rev()
            .try_fold(make_path_identity(), |inner, (i, fragment)| -> AbtResult<Abt> {
                let inner = if multikey_positions.is_some_and(|p| p.contains(&i)) {
                    make_path_traverse(inner)?
                } else {
                    inner
                };
                make_path_get(*fragment, inner)
            })?;
        collation_spec.push(IndexCollationEntry::new(path, op));
    }

    let partial_requirements = match &descriptor.partial_filter {
        None => PartialSchemaRequirements::new(),
        Some(filter) => {
            let path = match translate_filter(filter) {
                Ok(path) => path,
                Err(e) => return Ok(Excluded(ExclusionReason::MalformedPartialFilter(e.to_string()))),
            };
            let expr = make_eval_filter(path, make_variable(scan_projection))?;
            let conversion = convert_to_requirements(&expr);
            if !conversion.success {
                return Ok(Excluded(ExclusionReason::UnsupportedPartialFilter));
            }
            if conversion.has_empty_interval {
                return Ok(Excluded(ExclusionReason::UnsatisfiablePartialFilter));
            }
            conversion.requirements
        }
    };

    let definition = IndexDefinition::new(
        &descriptor.name,
        collation_spec,
        descriptor.version - 1,
        ordering_bits,
        entry.multikey,
        distribution_for(dop),
        partial_requirements,
    )?;
    Ok(IndexTranslation::Usable(definition))
}

/// 翻译集合的全部就绪索引
pub fn build_index_specs(
    collection: &CollectionHandle,
    scan_projection: &str,
    disable: DisableIndexOptions,
    dop: usize,
) -> MetadataResult<BTreeMap<String, IndexDefinition>> {
    let mut result = BTreeMap::new();
    if disable == DisableIndexOptions::DisableAll {
        return Ok(result);
    }

    let mut seen = std::collections::BTreeSet::new();
    for entry in collection.ready_indexes() {
        if !seen.insert(entry.name().to_string()) {
            return Err(MetadataError::DuplicateIndexName(entry.name().to_string()));
        }
    }

    for entry in collection.ready_indexes() {
        match build_index_definition(entry, scan_projection, disable, dop)? {
            IndexTranslation::Usable(definition) => {
                result.insert(entry.name().to_string(), definition);
            }
            IndexTranslation::Excluded(reason) => {
                warn!("索引 {} 被排除: {}", entry.name(), reason);
            }
        }
    }
    Ok(result)
}

/// 翻译一个命名空间的扫描定义，集合不存在时 `exists` 为 false、基数为 -1
pub fn build_scan_definition(
    snapshot: &dyn CatalogSnapshot,
    ns: &Namespace,
    scan_projection: &str,
    disable: DisableIndexOptions,
    dop: usize,
) -> MetadataResult<ScanDefinition> {
    let collection = snapshot.collection(ns);
    let mut options = BTreeMap::new();
    options.insert("type".to_string(), "collection".to_string());
    options.insert("database".to_string(), ns.db.clone());
    options.insert("collection".to_string(), ns.coll.clone());
    options.insert(
        "uuid".to_string(),
        collection
            .map(|c| c.uuid.to_string())
            .unwrap_or_else(|| MISSING_UUID.to_string()),
    );

    let Some(collection) = collection else {
        debug!("集合 {} 不存在，生成空扫描定义", ns);
        return Ok(ScanDefinition::new(
            options,
            BTreeMap::new(),
            distribution_for(dop),
            false,
            UNKNOWN_CE,
        ));
    };

    let index_defs = build_index_specs(collection, scan_projection, disable, dop)?;
    Ok(ScanDefinition::new(
        options,
        index_defs,
        distribution_for(dop),
        true,
        collection.num_records as f64,
    ))
}

/// 一次元数据翻译的结果
#[derive(Debug, Clone)]
pub struct MetadataTranslation {
    pub metadata: Metadata,
    /// 主集合的扫描定义名
    pub scan_def_name: String,
    /// 主集合扫描绑定的投影
    pub scan_projection: ProjectionName,
    pub primary_exists: bool,
    /// 其它涉及集合：扫描定义名 -> 投影
    pub involved: BTreeMap<String, ProjectionName>,
}

impl MetadataTranslation {
    /// 主集合上的初始树：集合存在时为 `Scan`，否则为不产生任何行的 `ValueScan`
    pub fn initial_tree(&self) -> AbtResult<Abt> {
        if self.primary_exists {
            make_scan(self.scan_projection.clone(), self.scan_def_name.clone())
        } else {
            make_value_scan(vec![self.scan_projection.clone()], Vec::new())
        }
    }
}

/// 构建主集合与所有涉及集合的元数据
///
/// 主集合的扫描定义名为 `<集合名>_<uuid>`，其它集合直接使用集合名
pub fn build_metadata(
    snapshot: &dyn CatalogSnapshot,
    primary: &Namespace,
    involved: &[Namespace],
    prefix_id: &mut PrefixId,
    disable: DisableIndexOptions,
    dop: usize,
) -> MetadataResult<MetadataTranslation> {
    let mut metadata = Metadata::new(BTreeMap::new(), dop.max(1))?;

    let scan_projection = prefix_id.get_next_id("scan");
    let primary_def = build_scan_definition(snapshot, primary, &scan_projection, disable, dop)?;
    let primary_exists = primary_def.exists();
    let scan_def_name = format!(
        "{}_{}",
        primary.coll,
        primary_def.option("uuid").unwrap_or(MISSING_UUID)
    );
    metadata.add_scan_definition(scan_def_name.clone(), primary_def)?;

    let mut involved_projections = BTreeMap::new();
    for ns in involved.iter().filter(|ns| *ns != primary) {
        if involved_projections.contains_key(&ns.coll) {
            continue;
        }
        let projection = prefix_id.get_next_id("scan");
        let def = build_scan_definition(snapshot, ns, &projection, disable, dop)?;
        metadata.add_scan_definition(ns.coll.clone(), def)?;
        involved_projections.insert(ns.coll.clone(), projection);
    }

    debug!(
        "元数据构建完成: 主扫描定义 {}, 共 {} 个扫描定义, 并行度 {}",
        scan_def_name,
        metadata.scan_defs().len(),
        dop
    );
    Ok(MetadataTranslation {
        metadata,
        scan_def_name,
        scan_projection,
        primary_exists,
        involved: involved_projections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::abt::ExplainGenerator;
    use crate::query::translate::catalog::IndexDescriptor;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn translate(entry: &IndexCatalogEntry) -> MetadataResult<IndexTranslation> {
        build_index_definition(entry, "scan_0", DisableIndexOptions::Enabled, 1)
    }

    fn usable(entry: &IndexCatalogEntry) -> IndexDefinition {
        match translate(entry) {
            Ok(IndexTranslation::Usable(def)) => def,
            other => panic!("索引应该可用: {:?}", other),
        }
    }

    fn excluded(entry: &IndexCatalogEntry) -> ExclusionReason {
        match translate(entry) {
            Ok(IndexTranslation::Excluded(reason)) => reason,
            other => panic!("索引应该被排除: {:?}", other),
        }
    }

    #[test]
    fn test_simple_ascending_index() {
        let def = usable(&IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1}))));
        assert_eq!(def.version(), 1);
        assert_eq!(def.ordering_bits(), 0);
        assert!(!def.is_multikey());
        assert_eq!(def.collation_spec().len(), 1);
        assert_eq!(
            ExplainGenerator::explain_compact(&def.collation_spec()[0].path),
            "PathGet [a](PathIdentity)"
        );
    }

    #[test]
    fn test_descending_bits() {
        let def = usable(&IndexCatalogEntry::new(IndexDescriptor::new(
            "a_1_b_-1",
            json!({"a": 1, "b": -1}),
        )));
        assert_eq!(def.ordering_bits(), 0b10);
        assert!(def.is_descending(1));
        assert_eq!(def.collation_spec()[1].op, CollationOp::Descending);
    }

    #[test]
    fn test_multikey_traversal_position() {
        let entry = IndexCatalogEntry::new(IndexDescriptor::new("ab_1", json!({"a.b": 1})))
            .with_multikey_paths(vec![BTreeSet::from([0])]);
        let def = usable(&entry);
        assert_eq!(
            ExplainGenerator::explain_compact(&def.collation_spec()[0].path),
            "PathGet [a](PathTraverse(PathGet [b](PathIdentity)))"
        );
    }

    #[test]
    fn test_unsupported_shapes_are_excluded() {
        let wildcard = IndexCatalogEntry::new(IndexDescriptor::new("$**_1", json!({"$**": 1})));
        assert_eq!(excluded(&wildcard), ExclusionReason::Wildcard);
        let nested = IndexCatalogEntry::new(IndexDescriptor::new("a.$**_1", json!({"a.$**": 1})));
        assert_eq!(excluded(&nested), ExclusionReason::Wildcard);

        let hashed = IndexCatalogEntry::new(IndexDescriptor::new("a_hashed", json!({"a": "hashed"})));
        assert!(matches!(excluded(&hashed), ExclusionReason::UnsupportedAccessMethod(_)));

        let bad_dir = IndexCatalogEntry::new(IndexDescriptor::new("a_2", json!({"a": 2})));
        assert!(matches!(excluded(&bad_dir), ExclusionReason::InvalidDirection(_)));

        let hidden = IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1})).hidden());
        assert_eq!(excluded(&hidden), ExclusionReason::Hidden);
        let sparse = IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1})).sparse());
        assert_eq!(excluded(&sparse), ExclusionReason::Sparse);
    }

    #[test]
    fn test_partial_filter_handling() {
        let ok = IndexCatalogEntry::new(
            IndexDescriptor::new("a_1", json!({"a": 1})).with_partial_filter(json!({"a": {"$gt": 0}})),
        );
        assert!(usable(&ok).is_partial());

        let unsat = IndexCatalogEntry::new(
            IndexDescriptor::new("a_1", json!({"a": 1}))
                .with_partial_filter(json!({"a": {"$gt": 10, "$lt": 5}})),
        );
        assert_eq!(excluded(&unsat), ExclusionReason::UnsatisfiablePartialFilter);

        let malformed = IndexCatalogEntry::new(
            IndexDescriptor::new("a_1", json!({"a": 1})).with_partial_filter(json!({"a": {"$where": 1}})),
        );
        assert!(matches!(excluded(&malformed), ExclusionReason::MalformedPartialFilter(_)));

        let disabled = build_index_definition(&ok, "scan_0", DisableIndexOptions::DisablePartialOnly, 1);
        assert_eq!(
            disabled,
            Ok(IndexTranslation::Excluded(ExclusionReason::PartialIndexesDisabled))
        );
    }

    #[test]
    fn test_catalog_contract_violations_are_fatal() {
        let mut empty_paths = IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1})));
        empty_paths.multikey = true;
        assert!(matches!(translate(&empty_paths), Err(MetadataError::EmptyMultikeyPaths { .. })));

        let mismatch = IndexCatalogEntry::new(IndexDescriptor::new("a_1_b_1", json!({"a": 1, "b": 1})))
            .with_multikey_paths(vec![BTreeSet::from([0])]);
        assert!(matches!(translate(&mismatch), Err(MetadataError::MultikeyPathsMismatch { .. })));

        let no_traverse = IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1})))
            .with_multikey_paths(vec![BTreeSet::new()]);
        assert!(matches!(translate(&no_traverse), Err(MetadataError::MultikeyWithoutTraversal(_))));
    }

    #[test]
    fn test_duplicate_index_names_are_fatal() {
        let mut handle = CollectionHandle::new(10);
        handle.indexes.push(IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1}))));
        handle.indexes.push(IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"b": 1}))));
        assert_eq!(
            build_index_specs(&handle, "scan_0", DisableIndexOptions::Enabled, 1),
            Err(MetadataError::DuplicateIndexName("a_1".to_string()))
        );
        let disabled = build_index_specs(&handle, "scan_0", DisableIndexOptions::DisableAll, 1);
        assert_eq!(disabled.map(|m| m.len()), Ok(0));
    }
}
