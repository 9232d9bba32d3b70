//! 查询提示
//!
//! 每次编译读取一次的开关集合，用于整体关闭某类计划策略

use serde::{Deserialize, Serialize};

/// 索引使用开关
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisableIndexOptions {
    /// 允许使用所有索引
    #[default]
    #[serde(rename = "enabled")]
    Enabled,
    /// 禁用所有索引
    #[serde(rename = "all")]
    DisableAll,
    /// 只禁用部分索引
    #[serde(rename = "partial_only")]
    DisablePartialOnly,
}

/// 优化提示
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHints {
    /// 禁止全集合扫描
    pub disable_scan: bool,
    pub disable_indexes: DisableIndexOptions,
    pub disable_hash_join_rid_intersect: bool,
    pub disable_merge_join_rid_intersect: bool,
    pub disable_group_by_and_union_rid_intersect: bool,
    /// 保留被淘汰的候选计划，供诊断输出
    pub keep_rejected_plans: bool,
    pub disable_branch_and_bound: bool,
}

impl QueryHints {
    /// 三种记录标识求交策略是否全部被禁用
    pub fn all_rid_intersect_disabled(&self) -> bool {
        self.disable_hash_join_rid_intersect
            && self.disable_merge_join_rid_intersect
            && self.disable_group_by_and_union_rid_intersect
    }
}
