//! 元数据模型
//!
//! 优化器看到的集合、索引与数据分布信息。
//! 由索引翻译层在目录快照下一次性构建，之后在整个优化过程中只读

pub mod index_bounds;

use std::collections::BTreeMap;
use std::fmt;

use crate::core::error::{AbtError, MetadataError, MetadataResult};
use crate::query::abt::path::{path_steps, PathStep};
use crate::query::abt::{Abt, CollationOp, DistributionType, ExplainGenerator, SyntaxSort};

use index_bounds::PartialSchemaRequirements;

/// 未知基数的标记值
pub const UNKNOWN_CE: f64 = -1.0;

/// 分布类型及其分区路径
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionAndPaths {
    kind: DistributionType,
    paths: Vec<Abt>,
}

impl DistributionAndPaths {
    pub fn new(kind: DistributionType) -> Self {
        Self {
            kind,
            paths: Vec::new(),
        }
    }

    /// 带分区路径的分布，只有哈希分区和范围分区允许非空路径
    pub fn with_paths(kind: DistributionType, paths: Vec<Abt>) -> MetadataResult<Self> {
        if !paths.is_empty() && !kind.allows_paths() {
            return Err(MetadataError::IllegalDistribution {
                kind: kind.to_string(),
                paths: paths.len(),
            });
        }
        for (i, path) in paths.iter().enumerate() {
            if !path.is_expression() {
                return Err(AbtError::sort_mismatch(
                    "DistributionAndPaths",
                    i,
                    SyntaxSort::Expression,
                    path.sort(),
                )
                .into());
            }
        }
        Ok(Self { kind, paths })
    }

    pub fn centralized() -> Self {
        Self::new(DistributionType::Centralized)
    }

    pub fn kind(&self) -> DistributionType {
        self.kind
    }

    pub fn paths(&self) -> &[Abt] {
        &self.paths
    }
}

impl fmt::Display for DistributionAndPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.paths.is_empty() {
            let paths: Vec<String> = self.paths.iter().map(ExplainGenerator::explain_compact).collect();
            write!(f, " ({})", paths.join(", "))?;
        }
        Ok(())
    }
}

/// 索引排序规格中的一个字段
#[derive(Debug, Clone, PartialEq)]
pub struct IndexCollationEntry {
    pub path: Abt,
    pub op: CollationOp,
}

impl IndexCollationEntry {
    pub fn new(path: Abt, op: CollationOp) -> Self {
        Self { path, op }
    }
}

pub type IndexCollationSpec = Vec<IndexCollationEntry>;

/// 优化器视角的索引定义
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    collation_spec: IndexCollationSpec,
    version: i64,
    ordering_bits: u32,
    multikey: bool,
    distribution_and_paths: DistributionAndPaths,
    partial_requirements: PartialSchemaRequirements,
}

impl IndexDefinition {
    /// 构造索引定义
    ///
    /// 多键索引至少要有一条排序路径包含遍历节点
    pub fn new(
        name: &str,
        collation_spec: IndexCollationSpec,
        version: i64,
        ordering_bits: u32,
        multikey: bool,
        distribution_and_paths: DistributionAndPaths,
        partial_requirements: PartialSchemaRequirements,
    ) -> MetadataResult<Self> {
        if multikey && !collation_spec.iter().any(|e| contains_traverse(&e.path)) {
            return Err(MetadataError::MultikeyWithoutTraversal(name.to_string()));
        }
        Ok(Self {
            collation_spec,
            version,
            ordering_bits,
            multikey,
            distribution_and_paths,
            partial_requirements,
        })
    }

    pub fn collation_spec(&self) -> &IndexCollationSpec {
        &self.collation_spec
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn ordering_bits(&self) -> u32 {
        self.ordering_bits
    }

    /// 第 `field` 个键字段是否降序
    pub fn is_descending(&self, field: usize) -> bool {
        field < 32 && (self.ordering_bits >> field) & 1 == 1
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey
    }

    pub fn distribution_and_paths(&self) -> &DistributionAndPaths {
        &self.distribution_and_paths
    }

    pub fn partial_requirements(&self) -> &PartialSchemaRequirements {
        &self.partial_requirements
    }

    pub fn is_partial(&self) -> bool {
        !self.partial_requirements.is_empty()
    }
}

fn contains_traverse(path: &Abt) -> bool {
    path_steps(path).is_some_and(|steps| steps.contains(&PathStep::Traverse))
}

/// 扫描定义：一个集合在优化器中的全部信息
#[derive(Debug, Clone, PartialEq)]
pub struct ScanDefinition {
    options: BTreeMap<String, String>,
    index_defs: BTreeMap<String, IndexDefinition>,
    distribution_and_paths: DistributionAndPaths,
    exists: bool,
    ce: f64,
}

impl ScanDefinition {
    pub fn new(
        options: BTreeMap<String, String>,
        index_defs: BTreeMap<String, IndexDefinition>,
        distribution_and_paths: DistributionAndPaths,
        exists: bool,
        ce: f64,
    ) -> Self {
        Self {
            options,
            index_defs,
            distribution_and_paths,
            exists,
            ce,
        }
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn index_defs(&self) -> &BTreeMap<String, IndexDefinition> {
        &self.index_defs
    }

    pub fn distribution_and_paths(&self) -> &DistributionAndPaths {
        &self.distribution_and_paths
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// 集合记录数，未知时为 `UNKNOWN_CE`
    pub fn ce(&self) -> f64 {
        self.ce
    }

    pub fn has_known_ce(&self) -> bool {
        self.ce >= 0.0
    }

    pub fn without_indexes(&self) -> Self {
        Self {
            index_defs: BTreeMap::new(),
            ..self.clone()
        }
    }
}

/// 一次优化使用的全部元数据
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    scan_defs: BTreeMap<String, ScanDefinition>,
    number_of_partitions: usize,
}

impl Metadata {
    pub fn new(scan_defs: BTreeMap<String, ScanDefinition>, number_of_partitions: usize) -> MetadataResult<Self> {
        if number_of_partitions == 0 {
            return Err(MetadataError::InvalidPartitionCount(number_of_partitions));
        }
        Ok(Self {
            scan_defs,
            number_of_partitions,
        })
    }

    /// 单分区、没有扫描定义的元数据
    pub fn empty() -> Self {
        Self {
            scan_defs: BTreeMap::new(),
            number_of_partitions: 1,
        }
    }

    pub fn add_scan_definition(&mut self, name: impl Into<String>, def: ScanDefinition) -> MetadataResult<()> {
        let name = name.into();
        if self.scan_defs.contains_key(&name) {
            return Err(MetadataError::DuplicateScanDefinition(name));
        }
        self.scan_defs.insert(name, def);
        Ok(())
    }

    pub fn scan_defs(&self) -> &BTreeMap<String, ScanDefinition> {
        &self.scan_defs
    }

    pub fn scan_def(&self, name: &str) -> Option<&ScanDefinition> {
        self.scan_defs.get(name)
    }

    pub fn number_of_partitions(&self) -> usize {
        self.number_of_partitions
    }

    pub fn is_parallel_execution(&self) -> bool {
        self.number_of_partitions > 1
    }

    /// 去掉所有索引的副本，供采样子计划使用
    pub fn without_indexes(&self) -> Self {
        Self {
            scan_defs: self
                .scan_defs
                .iter()
                .map(|(name, def)| (name.clone(), def.without_indexes()))
                .collect(),
            number_of_partitions: self.number_of_partitions,
        }
    }
}
