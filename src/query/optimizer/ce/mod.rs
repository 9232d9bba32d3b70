//! 基数估计
//!
//! 逻辑节点加入备忘录分组时估计其输出行数，子节点的基数从子分组的逻辑属性读取

pub mod heuristic;
pub mod sampling;

pub use heuristic::HeuristicCe;
pub use sampling::SamplingCe;

use super::memo::Memo;
use crate::query::abt::Abt;
use crate::query::metadata::Metadata;

/// 基数估计器
pub trait CardinalityEstimator {
    /// 估计逻辑节点的输出行数，子节点均为逻辑委托节点
    fn derive_ce(&self, metadata: &Metadata, memo: &Memo, node: &Abt) -> f64;
}

/// 读取逻辑委托节点所指分组的基数，其它节点返回 0
pub(crate) fn child_ce(memo: &Memo, child: &Abt) -> f64 {
    match child.node() {
        crate::query::abt::AbtNode::MemoLogicalDelegator(group_id) => memo
            .group(*group_id)
            .map(|g| g.logical_props.cardinality)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}
