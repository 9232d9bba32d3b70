//! 备忘录
//!
//! 分组保存逻辑上等价的替代方案及其共享的逻辑属性；
//! 每个分组按物理属性缓存优化结果（获胜计划、代价上限、被拒绝的计划）

use std::collections::{BTreeSet, HashMap};

use log::trace;
use serde::Serialize;

use super::ce::CardinalityEstimator;
use super::cost::CostType;
use crate::core::error::{OptimizerError, OptimizerResult};
use crate::query::abt::node::make_memo_logical_delegator;
use crate::query::abt::{
    Abt, AbtNode, DelegatorResolver, ExplainGenerator, GroupId, MemoPhysicalNodeId, ProjectionName,
};
use crate::query::metadata::Metadata;

/// 分组能否由某个集合的索引服务
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingAvailability {
    /// 产生集合扫描的分组
    pub scan_group: GroupId,
    pub scan_projection: ProjectionName,
    pub scan_def_name: String,
}

/// 分组的逻辑属性
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalProps {
    pub cardinality: f64,
    pub projections: BTreeSet<ProjectionName>,
    pub indexing: Option<IndexingAvailability>,
}

/// 分布要求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DistributionRequirement {
    /// 所有行集中在一处
    Centralized,
    /// 不限制分布
    Any,
}

/// 物理属性要求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysProps {
    pub distribution: DistributionRequirement,
}

impl PhysProps {
    pub fn centralized() -> Self {
        Self {
            distribution: DistributionRequirement::Centralized,
        }
    }

    pub fn any() -> Self {
        Self {
            distribution: DistributionRequirement::Any,
        }
    }
}

/// 一个物理计划及其代价
#[derive(Debug, Clone)]
pub struct PhysNodeInfo {
    /// 子节点为物理委托节点的计划片段
    pub node: Abt,
    pub cost: CostType,
    /// 不含子分组的本地代价
    pub local_cost: CostType,
    pub ce: f64,
}

/// 分组在某个物理属性下的优化结果
#[derive(Debug, Clone)]
pub struct PhysOptResult {
    pub props: PhysProps,
    pub cost_limit: CostType,
    pub winner: Option<PhysNodeInfo>,
    pub rejected: Vec<PhysNodeInfo>,
    /// 优化已完成；为 false 时表示正在优化中
    pub optimized: bool,
}

/// 备忘录分组
#[derive(Debug, Clone)]
pub struct Group {
    pub logical_nodes: Vec<Abt>,
    pub logical_props: LogicalProps,
    pub physical: Vec<PhysOptResult>,
    pub explored: bool,
}

impl Group {
    /// 查找给定物理属性的优化结果下标
    pub fn find_physical(&self, props: &PhysProps) -> Option<usize> {
        self.physical.iter().position(|r| r.props == *props)
    }
}

/// 备忘录统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    /// 逻辑节点集成次数
    pub integrations: usize,
    /// 计算过代价的物理替代方案数
    pub physical_plans_explored: usize,
    /// 物理优化结果的查找次数
    pub physical_memo_checks: usize,
}

/// 备忘录
#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<Group>,
    node_index: HashMap<String, GroupId>,
    /// 扫描定义名 -> 记录标识投影
    rid_projections: HashMap<String, ProjectionName>,
    stats: MemoStats,
}

/// 逻辑节点的去重键
///
/// 紧凑打印不包含可下推谓词的需求，需要另外拼接
fn memo_key(node: &Abt) -> String {
    let compact = ExplainGenerator::explain_compact(node);
    match node.node() {
        AbtNode::Sargable { reqs, .. } => format!("{} {{{}}}", compact, reqs),
        _ => compact,
    }
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn logical_node_count(&self) -> usize {
        self.groups.iter().map(|g| g.logical_nodes.len()).sum()
    }

    pub fn physical_node_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.physical.iter())
            .filter(|r| r.winner.is_some())
            .count()
    }

    pub fn stats(&self) -> &MemoStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut MemoStats {
        &mut self.stats
    }

    pub fn set_rid_projection(&mut self, scan_def_name: impl Into<String>, projection: ProjectionName) {
        self.rid_projections.insert(scan_def_name.into(), projection);
    }

    pub fn rid_projection(&self, scan_def_name: &str) -> Option<&ProjectionName> {
        self.rid_projections.get(scan_def_name)
    }

    pub fn rid_projections(&self) -> &HashMap<String, ProjectionName> {
        &self.rid_projections
    }

    /// 物理结果中的获胜计划
    pub fn winner(&self, id: MemoPhysicalNodeId) -> Option<&PhysNodeInfo> {
        self.groups
            .get(id.group_id)?
            .physical
            .get(id.index)?
            .winner
            .as_ref()
    }

    /// 把一棵逻辑树集成进备忘录，返回根节点所在分组
    ///
    /// 关系子节点先递归集成并替换为逻辑委托节点；已存在的节点不会重复加入
    pub fn integrate(
        &mut self,
        tree: &Abt,
        metadata: &Metadata,
        ce: &dyn CardinalityEstimator,
    ) -> OptimizerResult<GroupId> {
        self.integrate_into(tree, metadata, ce, None)
    }

    /// 把一个替代方案加入指定分组，子节点仍按普通方式集成
    pub fn add_to_group(
        &mut self,
        group_id: GroupId,
        tree: &Abt,
        metadata: &Metadata,
        ce: &dyn CardinalityEstimator,
    ) -> OptimizerResult<GroupId> {
        self.integrate_into(tree, metadata, ce, Some(group_id))
    }

    fn integrate_into(
        &mut self,
        tree: &Abt,
        metadata: &Metadata,
        ce: &dyn CardinalityEstimator,
        target: Option<GroupId>,
    ) -> OptimizerResult<GroupId> {
        if let AbtNode::MemoLogicalDelegator(group_id) = tree.node() {
            return Ok(*group_id);
        }

        let mut delegators = Vec::new();
        for child in tree.node_children() {
            let child_group = self.integrate_into(child, metadata, ce, None)?;
            delegators.push(make_memo_logical_delegator(child_group));
        }
        let node = if delegators.is_empty() {
            tree.clone()
        } else {
            tree.with_node_children(delegators)?
        };

        self.stats.integrations += 1;
        let key = memo_key(&node);
        if let Some(existing) = self.node_index.get(&key) {
            return Ok(*existing);
        }

        let group_id = match target {
            Some(group_id) => {
                let group = self.groups.get_mut(group_id).ok_or_else(|| {
                    OptimizerError::RuleApplication(format!("分组 {} 不存在", group_id))
                })?;
                group.logical_nodes.push(node);
                group_id
            }
            None => {
                let logical_props = self.derive_logical_props(&node, metadata, ce);
                self.groups.push(Group {
                    logical_nodes: vec![node],
                    logical_props,
                    physical: Vec::new(),
                    explored: false,
                });
                self.groups.len() - 1
            }
        };
        trace!("逻辑节点加入分组 {}: {}", group_id, key);
        self.node_index.insert(key, group_id);
        Ok(group_id)
    }

    fn child_props(&self, child: &Abt) -> Option<&LogicalProps> {
        match child.node() {
            AbtNode::MemoLogicalDelegator(group_id) => {
                self.groups.get(*group_id).map(|g| &g.logical_props)
            }
            _ => None,
        }
    }

    fn derive_logical_props(
        &self,
        node: &Abt,
        metadata: &Metadata,
        ce: &dyn CardinalityEstimator,
    ) -> LogicalProps {
        let cardinality = ce.derive_ce(metadata, self, node);
        let children: Vec<&LogicalProps> = node
            .node_children()
            .into_iter()
            .filter_map(|c| self.child_props(c))
            .collect();

        let mut projections = BTreeSet::new();
        match node.node() {
            // 这些节点只输出自己绑定的名称
            AbtNode::Union { binder, .. } => {
                projections.extend(binder.binder_names().iter().cloned());
            }
            AbtNode::GroupBy {
                group_keys,
                agg_binder,
                ..
            } => {
                projections.extend(group_keys.iter().cloned());
                projections.extend(agg_binder.binder_names().iter().cloned());
            }
            AbtNode::Root { projections: out, .. } => {
                projections.extend(out.iter().cloned());
            }
            other => {
                for child in &children {
                    projections.extend(child.projections.iter().cloned());
                }
                for binder in other.children().into_iter().filter(|c| {
                    matches!(c.node(), AbtNode::ExpressionBinder { .. })
                }) {
                    projections.extend(binder.binder_names().iter().cloned());
                }
            }
        }

        let indexing = match node.node() {
            AbtNode::Scan {
                scan_def_name,
                binder,
            } => binder.binder_names().first().map(|proj| IndexingAvailability {
                // 分组编号在加入备忘录时确定
                scan_group: self.groups.len(),
                scan_projection: proj.clone(),
                scan_def_name: scan_def_name.clone(),
            }),
            AbtNode::Filter { .. } | AbtNode::Evaluation { .. } | AbtNode::Sargable { .. } => {
                children.first().and_then(|c| c.indexing.clone())
            }
            _ => None,
        };

        LogicalProps {
            cardinality,
            projections,
            indexing,
        }
    }

    /// 展开物理结果的获胜计划，递归替换所有物理委托节点
    pub fn extract_plan(&self, id: MemoPhysicalNodeId) -> OptimizerResult<Abt> {
        let winner = self.winner(id).ok_or_else(|| {
            OptimizerError::NoPlan(format!("分组 {} 的第 {} 个物理结果没有获胜计划", id.group_id, id.index))
        })?;
        let mut failure = None;
        let plan = winner.node.transform_bottom_up(&mut |n: Abt| match n.node() {
            AbtNode::MemoPhysicalDelegator(child) => match self.extract_plan(*child) {
                Ok(plan) => Ok(plan),
                Err(e) => {
                    failure.get_or_insert(e);
                    Ok(n)
                }
            },
            _ => Ok(n),
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(plan),
        }
    }
}

impl DelegatorResolver for Memo {
    fn resolve_physical(&self, id: MemoPhysicalNodeId) -> Option<Abt> {
        self.winner(id).map(|w| w.node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::abt::expr::{make_bool, make_eval_filter, make_variable};
    use crate::query::abt::node::{make_filter, make_root, make_scan};
    use crate::query::abt::path::{make_path_compare_value, make_path_get};
    use crate::query::abt::Operations;
    use crate::query::optimizer::ce::HeuristicCe;
    use crate::core::Value;

    fn filter_tree() -> Abt {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let path = make_path_get(
            "a",
            make_path_compare_value(Operations::Eq, Value::Int32(1)).expect("构造应该成功"),
        )
        .expect("构造应该成功");
        let filter = make_filter(
            make_eval_filter(path, make_variable("scan_0")).expect("构造应该成功"),
            scan,
        )
        .expect("构造应该成功");
        make_root(vec!["scan_0".into()], filter).expect("构造应该成功")
    }

    #[test]
    fn test_integrate_creates_group_per_node() {
        let mut memo = Memo::new();
        let metadata = Metadata::empty();
        let root = memo
            .integrate(&filter_tree(), &metadata, &HeuristicCe::new())
            .expect("集成应该成功");
        assert_eq!(memo.group_count(), 3);
        assert_eq!(root, 2);

        let scan_group = memo.group(0).expect("分组应该存在");
        assert_eq!(scan_group.logical_props.cardinality, 1000.0);
        assert!(scan_group.logical_props.projections.contains("scan_0"));
        let filter_group = memo.group(1).expect("分组应该存在");
        assert_eq!(filter_group.logical_props.cardinality, 100.0);
        assert_eq!(
            filter_group.logical_props.indexing.as_ref().map(|i| i.scan_group),
            Some(0)
        );
    }

    #[test]
    fn test_integrate_is_deduplicated() {
        let mut memo = Memo::new();
        let metadata = Metadata::empty();
        let ce = HeuristicCe::new();
        let first = memo.integrate(&filter_tree(), &metadata, &ce).expect("集成应该成功");
        let second = memo.integrate(&filter_tree(), &metadata, &ce).expect("集成应该成功");
        assert_eq!(first, second);
        assert_eq!(memo.logical_node_count(), 3);
    }

    #[test]
    fn test_add_to_group_keeps_props() {
        let mut memo = Memo::new();
        let metadata = Metadata::empty();
        let ce = HeuristicCe::new();
        memo.integrate(&filter_tree(), &metadata, &ce).expect("集成应该成功");
        let alternative = make_filter(make_bool(true), make_memo_logical_delegator(0)).expect("构造应该成功");
        let group = memo.add_to_group(1, &alternative, &metadata, &ce).expect("加入应该成功");
        assert_eq!(group, 1);
        assert_eq!(memo.group(1).map(|g| g.logical_nodes.len()), Some(2));
    }

    #[test]
    fn test_extract_plan_without_winner_fails() {
        let memo = Memo::new();
        let result = memo.extract_plan(MemoPhysicalNodeId { group_id: 0, index: 0 });
        assert!(matches!(result, Err(OptimizerError::NoPlan(_))));
    }
}
