//! 启发式基数估计
//!
//! 没有统计信息时使用固定的选择性：等值 0.1，范围 0.33，过滤 0.1

use super::{child_ce, CardinalityEstimator};
use crate::query::abt::{Abt, AbtNode, GroupNodeType};
use crate::query::metadata::index_bounds::{
    IntervalRequirement, PartialSchemaRequirement, PartialSchemaRequirements,
};
use crate::query::metadata::Metadata;
use crate::query::optimizer::memo::Memo;

/// 集合基数未知时假定的行数
pub const DEFAULT_SCAN_CE: f64 = 1000.0;

/// 一般过滤条件的选择性
pub const FILTER_SELECTIVITY: f64 = 0.1;

const EQUALITY_SELECTIVITY: f64 = 0.1;
const RANGE_SELECTIVITY: f64 = 0.33;
const UNWIND_FACTOR: f64 = 10.0;

/// 单个区间的选择性
pub fn interval_selectivity(interval: &IntervalRequirement) -> f64 {
    if interval.is_fully_open() {
        1.0
    } else if interval.is_equality() {
        EQUALITY_SELECTIVITY
    } else if interval.is_empty() {
        0.0
    } else {
        RANGE_SELECTIVITY
    }
}

/// 析取区间的选择性之和，不超过 1
pub fn requirement_selectivity(req: &PartialSchemaRequirement) -> f64 {
    req.intervals
        .iter()
        .map(interval_selectivity)
        .sum::<f64>()
        .min(1.0)
}

/// 合取需求的选择性之积
pub fn requirements_selectivity(reqs: &PartialSchemaRequirements) -> f64 {
    reqs.iter().map(|(_, req)| requirement_selectivity(req)).product()
}

/// 分组聚合的输出比例
pub fn group_by_factor(kind: GroupNodeType) -> f64 {
    match kind {
        GroupNodeType::Complete => 0.01,
        GroupNodeType::Local => 0.02,
        GroupNodeType::Global => 0.5,
    }
}

/// 启发式基数估计器
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCe;

impl HeuristicCe {
    pub fn new() -> Self {
        Self
    }
}

impl CardinalityEstimator for HeuristicCe {
    fn derive_ce(&self, metadata: &Metadata, memo: &Memo, node: &Abt) -> f64 {
        let single_child = |child: &Abt| child_ce(memo, child);
        let ce = match node.node() {
            AbtNode::Scan { scan_def_name, .. } => match metadata.scan_def(scan_def_name) {
                Some(def) if !def.exists() => 0.0,
                Some(def) if def.has_known_ce() => def.ce(),
                _ => DEFAULT_SCAN_CE,
            },
            AbtNode::ValueScan { rows, .. } => rows.len() as f64,
            AbtNode::CoScan => 1.0,

            AbtNode::Filter { filter, child } => {
                if filter.is_constant_bool(true) {
                    single_child(child)
                } else if filter.is_constant_bool(false) {
                    0.0
                } else {
                    single_child(child) * FILTER_SELECTIVITY
                }
            }
            AbtNode::Sargable { reqs, child, .. } => {
                single_child(child) * requirements_selectivity(reqs)
            }
            AbtNode::RidIntersect { left, right, .. } => single_child(left).min(single_child(right)),
            AbtNode::Evaluation { child, .. }
            | AbtNode::Unique { child, .. }
            | AbtNode::Collation { child, .. }
            | AbtNode::Exchange { child, .. }
            | AbtNode::Root { child, .. } => single_child(child),
            AbtNode::Unwind { child, .. } => single_child(child) * UNWIND_FACTOR,
            AbtNode::GroupBy { kind, child, .. } => single_child(child) * group_by_factor(*kind),
            AbtNode::LimitSkip { limit, skip, child } => {
                let after_skip = (single_child(child) - *skip as f64).max(0.0);
                limit.map_or(after_skip, |l| after_skip.min(l as f64))
            }
            AbtNode::Union { children, .. } => children.iter().map(single_child).sum(),
            AbtNode::BinaryJoin {
                filter, left, right, ..
            } => {
                let product = single_child(left) * single_child(right);
                if filter.is_constant_bool(true) {
                    product
                } else {
                    product * FILTER_SELECTIVITY
                }
            }
            AbtNode::HashJoin { left, right, .. } | AbtNode::MergeJoin { left, right, .. } => {
                single_child(left).min(single_child(right))
            }
            _ => 0.0,
        };
        ce.max(0.0)
    }
}
