//! 代价模型
//!
//! 物理计划的代价按节点递归计算：每个节点的代价等于子节点代价之和
//! 加上自身的启动代价与按处理行数计的增量代价

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

use serde::Serialize;

use super::ce::heuristic::{group_by_factor, interval_selectivity, DEFAULT_SCAN_CE, FILTER_SELECTIVITY};
use super::memo::Memo;
use crate::query::abt::{Abt, AbtNode};
use crate::query::metadata::Metadata;

/// 代价值，不可行的计划代价为无穷大
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CostType {
    Finite(f64),
    Infinite,
}

impl CostType {
    pub fn zero() -> Self {
        CostType::Finite(0.0)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, CostType::Infinite)
    }

    pub fn value(&self) -> f64 {
        match self {
            CostType::Finite(v) => *v,
            CostType::Infinite => f64::INFINITY,
        }
    }
}

impl PartialOrd for CostType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value().partial_cmp(&other.value())
    }
}

impl Add for CostType {
    type Output = CostType;

    fn add(self, rhs: CostType) -> CostType {
        match (self, rhs) {
            (CostType::Finite(a), CostType::Finite(b)) => CostType::Finite(a + b),
            _ => CostType::Infinite,
        }
    }
}

/// 从代价上限中扣除已花费的代价，结果不小于零
impl Sub for CostType {
    type Output = CostType;

    fn sub(self, rhs: CostType) -> CostType {
        match (self, rhs) {
            (CostType::Infinite, _) => CostType::Infinite,
            (CostType::Finite(_), CostType::Infinite) => CostType::zero(),
            (CostType::Finite(a), CostType::Finite(b)) => CostType::Finite((a - b).max(0.0)),
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostType::Finite(v) => write!(f, "{:.6}", v),
            CostType::Infinite => write!(f, "{{Infinite cost}}"),
        }
    }
}

/// 代价系数
///
/// 每种物理操作的代价由启动代价加上增量代价乘以处理行数构成
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostCoefficients {
    /// 每个节点的启动代价
    pub startup: f64,

    /// 全集合扫描每行代价
    pub scan_incremental: f64,

    /// 索引扫描每个索引项代价
    ///
    /// 低于全扫描，因为索引项比文档小
    pub index_scan_incremental: f64,

    /// 按记录标识取回一个文档的代价
    ///
    /// 随机访问，远高于顺序扫描
    pub seek_incremental: f64,

    pub filter_incremental: f64,
    pub eval_incremental: f64,
    pub group_by_incremental: f64,
    pub unwind_incremental: f64,
    pub binary_join_incremental: f64,
    pub hash_join_incremental: f64,
    pub merge_join_incremental: f64,
    pub unique_incremental: f64,

    /// 排序每行代价，再乘以 log2(行数)
    pub collation_incremental: f64,

    pub union_incremental: f64,
    pub exchange_incremental: f64,
}

impl Default for CostCoefficients {
    fn default() -> Self {
        Self {
            startup: 0.000001,
            scan_incremental: 0.6,
            index_scan_incremental: 0.5,
            seek_incremental: 2.0,
            filter_incremental: 0.2,
            eval_incremental: 2.0,
            group_by_incremental: 0.07,
            unwind_incremental: 0.03,
            binary_join_incremental: 0.2,
            hash_join_incremental: 0.05,
            merge_join_incremental: 0.02,
            unique_incremental: 0.7,
            collation_incremental: 2.5,
            union_incremental: 0.02,
            exchange_incremental: 0.1,
        }
    }
}

/// 代价计算上下文
#[derive(Clone, Copy)]
pub struct CostContext<'a> {
    pub metadata: &'a Metadata,
    pub memo: &'a Memo,
}

impl<'a> CostContext<'a> {
    pub fn new(metadata: &'a Metadata, memo: &'a Memo) -> Self {
        Self { metadata, memo }
    }
}

/// 节点代价与输出基数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeCost {
    pub cost: CostType,
    pub ce: f64,
}

impl NodeCost {
    fn new(cost: f64, ce: f64) -> Self {
        Self {
            cost: CostType::Finite(cost),
            ce: ce.max(0.0),
        }
    }

    fn infinite() -> Self {
        Self {
            cost: CostType::Infinite,
            ce: 0.0,
        }
    }
}

/// 代价模型
pub trait CostModel {
    /// 计算一棵物理计划树的总代价和输出基数
    ///
    /// 逻辑委托节点代价为零、基数取分组基数；物理委托节点取对应获胜计划的代价
    fn cost(&self, node: &Abt, ctx: &CostContext<'_>) -> NodeCost;
}

/// 默认代价模型
#[derive(Debug, Clone, Default)]
pub struct DefaultCosting {
    coefficients: CostCoefficients,
}

impl DefaultCosting {
    pub fn new(coefficients: CostCoefficients) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &CostCoefficients {
        &self.coefficients
    }

    /// 单子节点操作：子节点代价加上按子节点行数计的增量代价
    fn unary(&self, child: NodeCost, incremental: f64, ce: f64) -> NodeCost {
        if child.cost.is_infinite() {
            return NodeCost::infinite();
        }
        NodeCost::new(
            child.cost.value() + self.coefficients.startup + incremental * child.ce,
            ce,
        )
    }

    fn scan_ce(ctx: &CostContext<'_>, scan_def_name: &str) -> f64 {
        match ctx.metadata.scan_def(scan_def_name) {
            Some(def) if !def.exists() => 0.0,
            Some(def) if def.has_known_ce() => def.ce(),
            _ => DEFAULT_SCAN_CE,
        }
    }
}

impl CostModel for DefaultCosting {
    fn cost(&self, node: &Abt, ctx: &CostContext<'_>) -> NodeCost {
        let c = &self.coefficients;
        match node.node() {
            AbtNode::MemoLogicalDelegator(group_id) => NodeCost::new(
                0.0,
                ctx.memo
                    .group(*group_id)
                    .map(|g| g.logical_props.cardinality)
                    .unwrap_or(0.0),
            ),
            AbtNode::MemoPhysicalDelegator(id) => match ctx.memo.winner(*id) {
                Some(winner) => NodeCost {
                    cost: winner.cost,
                    ce: winner.ce,
                },
                None => NodeCost::infinite(),
            },

            AbtNode::PhysicalScan { scan_def_name, .. } => {
                let ce = Self::scan_ce(ctx, scan_def_name);
                NodeCost::new(c.startup + c.scan_incremental * ce, ce)
            }
            AbtNode::IndexScan { spec, .. } => {
                let selectivity: f64 = spec.intervals.iter().map(interval_selectivity).product();
                let ce = Self::scan_ce(ctx, &spec.scan_def_name) * selectivity;
                NodeCost::new(c.startup + c.index_scan_incremental * ce, ce)
            }
            AbtNode::Seek { .. } => NodeCost::new(c.startup + c.seek_incremental, 1.0),
            AbtNode::ValueScan { rows, .. } => {
                let ce = rows.len() as f64;
                NodeCost::new(c.startup + c.scan_incremental * ce, ce)
            }
            AbtNode::CoScan => NodeCost::new(c.startup, 1.0),

            AbtNode::Filter { filter, child } => {
                let child = self.cost(child, ctx);
                let ce = if filter.is_constant_bool(true) {
                    child.ce
                } else if filter.is_constant_bool(false) {
                    0.0
                } else {
                    child.ce * FILTER_SELECTIVITY
                };
                self.unary(child, c.filter_incremental, ce)
            }
            AbtNode::Evaluation { child, .. } => {
                let child = self.cost(child, ctx);
                self.unary(child, c.eval_incremental, child.ce)
            }
            AbtNode::Unique { child, .. } => {
                let child = self.cost(child, ctx);
                self.unary(child, c.unique_incremental, child.ce)
            }
            AbtNode::Unwind { child, .. } => {
                let child = self.cost(child, ctx);
                self.unary(child, c.unwind_incremental, child.ce * 10.0)
            }
            AbtNode::GroupBy { kind, child, .. } => {
                let child = self.cost(child, ctx);
                self.unary(child, c.group_by_incremental, child.ce * group_by_factor(*kind))
            }
            AbtNode::Collation { child, .. } => {
                let child = self.cost(child, ctx);
                let factor = child.ce.max(2.0).log2();
                self.unary(child, c.collation_incremental * factor, child.ce)
            }
            AbtNode::Exchange { child, .. } => {
                let child = self.cost(child, ctx);
                self.unary(child, c.exchange_incremental, child.ce)
            }
            AbtNode::LimitSkip { limit, skip, child } => {
                let child = self.cost(child, ctx);
                let after_skip = (child.ce - *skip as f64).max(0.0);
                let ce = limit.map_or(after_skip, |l| after_skip.min(l as f64));
                self.unary(child, 0.0, ce)
            }
            AbtNode::Root { child, .. } => self.cost(child, ctx),

            AbtNode::BinaryJoin {
                filter, left, right, ..
            } => {
                let l = self.cost(left, ctx);
                let r = self.cost(right, ctx);
                if l.cost.is_infinite() || r.cost.is_infinite() {
                    return NodeCost::infinite();
                }
                // 右侧对左侧每一行执行一次
                let mut ce = l.ce * r.ce;
                if !filter.is_constant_bool(true) {
                    ce *= FILTER_SELECTIVITY;
                }
                NodeCost::new(
                    l.cost.value() + l.ce * r.cost.value() + c.startup + c.binary_join_incremental * l.ce,
                    ce,
                )
            }
            AbtNode::HashJoin { left, right, .. } | AbtNode::MergeJoin { left, right, .. } => {
                let l = self.cost(left, ctx);
                let r = self.cost(right, ctx);
                if l.cost.is_infinite() || r.cost.is_infinite() {
                    return NodeCost::infinite();
                }
                let incremental = if matches!(node.node(), AbtNode::HashJoin { .. }) {
                    c.hash_join_incremental
                } else {
                    c.merge_join_incremental
                };
                NodeCost::new(
                    l.cost.value() + r.cost.value() + c.startup + incremental * (l.ce + r.ce),
                    l.ce.min(r.ce),
                )
            }
            AbtNode::Union { children, .. } => {
                let mut total = c.startup;
                let mut ce = 0.0;
                for child in children {
                    let child = self.cost(child, ctx);
                    if child.cost.is_infinite() {
                        return NodeCost::infinite();
                    }
                    total += child.cost.value() + c.union_incremental * child.ce;
                    ce += child.ce;
                }
                NodeCost::new(total, ce)
            }

            // 逻辑节点没有物理代价
            _ => NodeCost::infinite(),
        }
    }
}
