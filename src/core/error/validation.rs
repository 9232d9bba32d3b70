//! 元数据契约错误类型
//!
//! 目录协作方返回了不一致的数据时产生这些错误。它们是致命的：
//! 优化器不能在内部不一致的元数据上继续工作

use thiserror::Error;

use super::expression::AbtError;

/// 元数据契约违反
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// 多键索引的多键路径数组为空
    #[error("多键索引 {index} 的多键路径为空")]
    EmptyMultikeyPaths { index: String },

    /// 多键路径数组长度与键模式字段数不一致
    #[error("索引 {index} 的多键路径数量不匹配: 期望 {expected}, 实际 {actual}")]
    MultikeyPathsMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    /// 多键索引没有任何包含遍历的排序路径
    #[error("多键索引 {0} 的排序路径中没有遍历节点")]
    MultikeyWithoutTraversal(String),

    /// 重复的索引名称
    #[error("重复的索引名称: {0}")]
    DuplicateIndexName(String),

    /// 重复的扫描定义名称
    #[error("重复的扫描定义名称: {0}")]
    DuplicateScanDefinition(String),

    /// 分布类型与分区路径组合非法
    #[error("分布类型 {kind} 不允许非空分区路径 (共 {paths} 条)")]
    IllegalDistribution { kind: String, paths: usize },

    /// 分区数必须为正
    #[error("无效的分区数: {0}")]
    InvalidPartitionCount(usize),

    #[error("ABT 构造错误: {0}")]
    Abt(#[from] AbtError),
}

/// 元数据结果类型
pub type MetadataResult<T> = Result<T, MetadataError>;
