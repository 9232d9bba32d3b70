//! 优化阶段管理器
//!
//! 按顺序执行常量折叠、替换改写、备忘录探索和物理实现，
//! 物理实现阶段使用带代价上限的分支限界搜索选出每个分组的最优计划

use std::collections::{BTreeSet, HashMap};

use log::{debug, info, warn};
use serde::Serialize;

use super::ce::CardinalityEstimator;
use super::const_eval::const_eval;
use super::cost::{CostContext, CostModel, CostType};
use super::hints::QueryHints;
use super::implementers::{enforcers, implement, ImplementationContext, PhysicalAlternative};
use super::memo::{Memo, PhysNodeInfo, PhysOptResult, PhysProps};
use super::prefix_id::PrefixId;
use super::rewrites::{ExplorationRule, RewriteContext, RuleSet, SargableSplit};
use crate::core::error::{OptimizerError, OptimizerResult};
use crate::query::abt::node::make_memo_physical_delegator;
use crate::query::abt::{
    Abt, AbtNode, ExplainGenerator, GroupId, MemoPhysicalNodeId, ProjectionName, VariableEnvironment,
};
use crate::query::metadata::Metadata;

/// 默认迭代次数上限
pub const DEFAULT_ITERATION_LIMIT: usize = 10_000;

/// 替换阶段的最大改写遍数
const MAX_REWRITE_PASSES: usize = 100;

/// 优化阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum OptPhase {
    ConstEvalPre,
    MemoSubstitutionPhase,
    MemoExplorationPhase,
    MemoImplementationPhase,
}

impl OptPhase {
    /// 全部阶段
    pub fn all() -> BTreeSet<OptPhase> {
        [
            OptPhase::ConstEvalPre,
            OptPhase::MemoSubstitutionPhase,
            OptPhase::MemoExplorationPhase,
            OptPhase::MemoImplementationPhase,
        ]
        .into_iter()
        .collect()
    }
}

/// 优化阶段管理器
pub struct OptPhaseManager<'a> {
    phases: BTreeSet<OptPhase>,
    prefix_id: PrefixId,
    hints: QueryHints,
    metadata: Metadata,
    ce: Box<dyn CardinalityEstimator + 'a>,
    cost: Box<dyn CostModel + 'a>,
    iteration_limit: usize,
    iterations: usize,
    memo: Memo,
    physical_node_id: Option<MemoPhysicalNodeId>,
    optimized_plan: Option<Abt>,
    last_error: Option<OptimizerError>,
}

impl<'a> OptPhaseManager<'a> {
    pub fn new(
        phases: BTreeSet<OptPhase>,
        prefix_id: PrefixId,
        hints: QueryHints,
        metadata: Metadata,
        ce: Box<dyn CardinalityEstimator + 'a>,
        cost: Box<dyn CostModel + 'a>,
    ) -> Self {
        Self {
            phases,
            prefix_id,
            hints,
            metadata,
            ce,
            cost,
            iteration_limit: DEFAULT_ITERATION_LIMIT,
            iterations: 0,
            memo: Memo::new(),
            physical_node_id: None,
            optimized_plan: None,
            last_error: None,
        }
    }

    pub fn with_iteration_limit(mut self, limit: usize) -> Self {
        self.iteration_limit = limit;
        self
    }

    /// 优化输入树，成功时可通过 `optimized_plan` 取得结果
    pub fn optimize(&mut self, input: &Abt) -> bool {
        info!("开始优化, 阶段: {:?}", self.phases);
        match self.run(input) {
            Ok(plan) => {
                let stats = self.memo.stats();
                info!(
                    "优化完成: 分组 {}, 逻辑节点 {}, 物理计划 {}, 迭代 {}",
                    self.memo.group_count(),
                    self.memo.logical_node_count(),
                    stats.physical_plans_explored,
                    self.iterations
                );
                debug!("优化后的计划:\n{}", ExplainGenerator::explain(&plan));
                self.optimized_plan = Some(plan);
                true
            }
            Err(e) => {
                warn!("优化失败: {}", e);
                self.last_error = Some(e);
                false
            }
        }
    }

    fn run(&mut self, input: &Abt) -> OptimizerResult<Abt> {
        let env = VariableEnvironment::build(input);
        if env.has_free_variables() {
            let names: Vec<&str> = env.free_variables().iter().map(String::as_str).collect();
            return Err(OptimizerError::FreeVariables(names.join(", ")));
        }
        let mut scan_defs = BTreeSet::new();
        collect_scan_defs(input, &mut scan_defs);
        if let Some(missing) = scan_defs.iter().find(|name| self.metadata.scan_def(name).is_none()) {
            return Err(OptimizerError::UnknownScanDefinition(missing.clone()));
        }

        for name in self.metadata.scan_defs().keys() {
            let rid = self.prefix_id.get_next_id("rid");
            self.memo.set_rid_projection(name.clone(), rid);
        }

        let mut tree = input.clone();
        if self.phases.contains(&OptPhase::ConstEvalPre) {
            tree = const_eval(&tree)?.0;
        }
        if self.phases.contains(&OptPhase::MemoSubstitutionPhase) {
            let ctx = RewriteContext {
                metadata: &self.metadata,
                hints: &self.hints,
            };
            let (rewritten, applied) =
                RuleSet::substitution().rewrite_to_fixpoint(&tree, &ctx, MAX_REWRITE_PASSES)?;
            debug!("替换阶段应用了 {} 次改写", applied);
            tree = rewritten;
        }

        let root_group = self.memo.integrate(&tree, &self.metadata, self.ce.as_ref())?;
        if self.phases.contains(&OptPhase::MemoExplorationPhase) {
            self.explore()?;
        }

        // 物理实现阶段总是执行，否则无法得到可执行计划
        let id = self
            .optimize_group(root_group, PhysProps::centralized(), CostType::Infinite)?
            .ok_or_else(|| OptimizerError::NoPlan(format!("根分组 {} 没有可行的物理计划", root_group)))?;
        self.physical_node_id = Some(id);

        let plan = self.memo.extract_plan(id)?;
        let env = VariableEnvironment::build(&plan);
        if env.has_free_variables() {
            let names: Vec<&str> = env.free_variables().iter().map(String::as_str).collect();
            return Err(OptimizerError::NoPlan(format!("物理计划包含自由变量: {}", names.join(", "))));
        }
        Ok(plan)
    }

    fn count_iteration(&mut self) -> OptimizerResult<()> {
        self.iterations += 1;
        if self.iterations > self.iteration_limit {
            return Err(OptimizerError::IterationLimit(self.iteration_limit));
        }
        Ok(())
    }

    fn explore(&mut self) -> OptimizerResult<()> {
        let rules: Vec<Box<dyn ExplorationRule>> = vec![Box::new(SargableSplit)];
        let mut group_id = 0;
        while group_id < self.memo.group_count() {
            let nodes = match self.memo.group(group_id) {
                Some(group) if !group.explored => group.logical_nodes.clone(),
                _ => {
                    group_id += 1;
                    continue;
                }
            };
            for node in &nodes {
                for rule in &rules {
                    let alternatives = {
                        let ctx = RewriteContext {
                            metadata: &self.metadata,
                            hints: &self.hints,
                        };
                        rule.explore(node, &self.memo, &ctx)?
                    };
                    for alternative in alternatives {
                        self.count_iteration()?;
                        debug!("探索规则 {} 为分组 {} 添加替代方案", rule.name(), group_id);
                        self.memo
                            .add_to_group(group_id, &alternative, &self.metadata, self.ce.as_ref())?;
                    }
                }
            }
            if let Some(group) = self.memo.group_mut(group_id) {
                group.explored = true;
            }
            group_id += 1;
        }
        Ok(())
    }

    /// 在物理属性和代价上限下优化分组，返回获胜计划的编号
    fn optimize_group(
        &mut self,
        group_id: GroupId,
        props: PhysProps,
        limit: CostType,
    ) -> OptimizerResult<Option<MemoPhysicalNodeId>> {
        self.count_iteration()?;
        self.memo.stats_mut().physical_memo_checks += 1;
        let group = self
            .memo
            .group(group_id)
            .ok_or_else(|| OptimizerError::NoPlan(format!("分组 {} 不存在", group_id)))?;

        let index = match group.find_physical(&props) {
            Some(index) => {
                let existing = &group.physical[index];
                if !existing.optimized {
                    // 正在优化中，说明出现了环
                    return Ok(None);
                }
                let id = MemoPhysicalNodeId { group_id, index };
                match &existing.winner {
                    Some(winner) => return Ok((winner.cost < limit).then_some(id)),
                    None if existing.cost_limit >= limit => return Ok(None),
                    None => index,
                }
            }
            None => {
                let group = self
                    .memo
                    .group_mut(group_id)
                    .ok_or_else(|| OptimizerError::NoPlan(format!("分组 {} 不存在", group_id)))?;
                group.physical.push(PhysOptResult {
                    props,
                    cost_limit: limit,
                    winner: None,
                    rejected: Vec::new(),
                    optimized: false,
                });
                group.physical.len() - 1
            }
        };
        if let Some(entry) = self.memo.group_mut(group_id).and_then(|g| g.physical.get_mut(index)) {
            entry.optimized = false;
            entry.cost_limit = limit;
        }

        let alternatives = self.alternatives_for(group_id, &props)?;
        let keep_rejected = self.hints.keep_rejected_plans;
        let branch_and_bound = !self.hints.disable_branch_and_bound;
        let mut current_limit = if branch_and_bound { limit } else { CostType::Infinite };
        let mut best: Option<PhysNodeInfo> = None;
        let mut rejected = Vec::new();

        for alternative in alternatives {
            let Some(info) = self.optimize_alternative(alternative, current_limit)? else {
                continue;
            };
            let better = best.as_ref().map_or(true, |b| info.cost < b.cost);
            if better {
                if branch_and_bound {
                    current_limit = info.cost;
                }
                if let Some(previous) = best.replace(info) {
                    if keep_rejected {
                        rejected.push(previous);
                    }
                }
            } else if keep_rejected {
                rejected.push(info);
            }
        }

        let found = best.is_some();
        if let Some(entry) = self.memo.group_mut(group_id).and_then(|g| g.physical.get_mut(index)) {
            entry.winner = best;
            entry.rejected = rejected;
            entry.optimized = true;
        }
        Ok(found.then_some(MemoPhysicalNodeId { group_id, index }))
    }

    fn alternatives_for(&self, group_id: GroupId, props: &PhysProps) -> OptimizerResult<Vec<PhysicalAlternative>> {
        let Some(group) = self.memo.group(group_id) else {
            return Ok(Vec::new());
        };
        let ctx = ImplementationContext {
            metadata: &self.metadata,
            memo: &self.memo,
            hints: &self.hints,
        };
        let is_root_group = group
            .logical_nodes
            .iter()
            .any(|n| matches!(n.node(), AbtNode::Root { .. }));
        let mut alternatives = Vec::new();
        for node in &group.logical_nodes {
            alternatives.extend(implement(node, props, &ctx)?);
        }
        alternatives.extend(enforcers(group_id, is_root_group, props, &ctx)?);
        Ok(alternatives)
    }

    /// 为一个替代方案优化其子分组并计算总代价
    fn optimize_alternative(
        &mut self,
        alternative: PhysicalAlternative,
        limit: CostType,
    ) -> OptimizerResult<Option<PhysNodeInfo>> {
        self.memo.stats_mut().physical_plans_explored += 1;
        let branch_and_bound = !self.hints.disable_branch_and_bound;

        let local = self
            .cost
            .cost(&alternative.node, &CostContext::new(&self.metadata, &self.memo));
        if local.cost.is_infinite() || (branch_and_bound && local.cost >= limit) {
            return Ok(None);
        }

        let mut groups = Vec::new();
        collect_logical_delegators(&alternative.node, &mut groups);
        if groups.len() != alternative.child_props.len() {
            return Err(OptimizerError::RuleApplication(format!(
                "替代方案有 {} 个子分组, 但给出了 {} 个物理属性",
                groups.len(),
                alternative.child_props.len()
            )));
        }

        let mut spent = local.cost;
        let mut child_ids = Vec::with_capacity(groups.len());
        for (child_group, child_props) in groups.into_iter().zip(alternative.child_props) {
            let child_limit = if branch_and_bound { limit - spent } else { CostType::Infinite };
            let Some(id) = self.optimize_group(child_group, child_props, child_limit)? else {
                return Ok(None);
            };
            if let Some(winner) = self.memo.winner(id) {
                spent = spent + winner.cost;
            }
            child_ids.push(id);
        }

        let mut ids = child_ids.into_iter();
        let node = alternative.node.transform_bottom_up(&mut |n: Abt| match n.node() {
            AbtNode::MemoLogicalDelegator(_) => Ok(ids.next().map(make_memo_physical_delegator).unwrap_or(n)),
            _ => Ok(n),
        })?;
        let total = self.cost.cost(&node, &CostContext::new(&self.metadata, &self.memo));
        if total.cost.is_infinite() || (branch_and_bound && total.cost >= limit) {
            return Ok(None);
        }
        Ok(Some(PhysNodeInfo {
            node,
            cost: total.cost,
            local_cost: local.cost,
            ce: total.ce,
        }))
    }

    pub fn physical_node_id(&self) -> Option<MemoPhysicalNodeId> {
        self.physical_node_id
    }

    pub fn optimized_plan(&self) -> Option<&Abt> {
        self.optimized_plan.as_ref()
    }

    /// 获胜计划的总代价
    pub fn plan_cost(&self) -> Option<CostType> {
        self.physical_node_id
            .and_then(|id| self.memo.winner(id))
            .map(|w| w.cost)
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn hints(&self) -> &QueryHints {
        &self.hints
    }

    pub fn rid_projections(&self) -> &HashMap<String, ProjectionName> {
        self.memo.rid_projections()
    }

    pub fn last_error(&self) -> Option<&OptimizerError> {
        self.last_error.as_ref()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

fn collect_scan_defs(abt: &Abt, out: &mut BTreeSet<String>) {
    if let AbtNode::Scan { scan_def_name, .. } | AbtNode::PhysicalScan { scan_def_name, .. } = abt.node() {
        out.insert(scan_def_name.clone());
    }
    for child in abt.children() {
        collect_scan_defs(child, out);
    }
}

/// 按从左到右的顺序收集逻辑委托节点的分组
fn collect_logical_delegators(abt: &Abt, out: &mut Vec<GroupId>) {
    if let AbtNode::MemoLogicalDelegator(group_id) = abt.node() {
        out.push(*group_id);
        return;
    }
    for child in abt.children() {
        collect_logical_delegators(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::query::abt::expr::{make_eval_filter, make_variable};
    use crate::query::abt::node::{make_filter, make_root, make_scan};
    use crate::query::abt::path::{make_path_compare_value, make_path_get};
    use crate::query::abt::{ExplainGenerator, Operations};
    use crate::query::metadata::{DistributionAndPaths, ScanDefinition};
    use crate::query::optimizer::ce::HeuristicCe;
    use crate::query::optimizer::cost::DefaultCosting;
    use std::collections::BTreeMap;

    fn metadata() -> Metadata {
        let mut metadata = Metadata::empty();
        metadata
            .add_scan_definition(
                "coll",
                ScanDefinition::new(BTreeMap::new(), BTreeMap::new(), DistributionAndPaths::centralized(), true, 100.0),
            )
            .expect("添加应该成功");
        metadata
    }

    fn manager(hints: QueryHints) -> OptPhaseManager<'static> {
        OptPhaseManager::new(
            OptPhase::all(),
            PrefixId::new(),
            hints,
            metadata(),
            Box::new(HeuristicCe::new()),
            Box::new(DefaultCosting::default()),
        )
    }

    fn filter_plan() -> Abt {
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
    fn test_optimize_without_indexes_uses_scan() {
        let mut manager = manager(QueryHints::default());
        assert!(manager.optimize(&filter_plan()));
        let plan = manager.optimized_plan().expect("应该有计划");
        let explain = ExplainGenerator::explain(plan);
        assert!(explain.contains("PhysicalScan"));
        assert!(!explain.contains("Sargable"));
        assert!(manager.physical_node_id().is_some());
        assert_eq!(manager.rid_projections().len(), 1);
    }

    #[test]
    fn test_free_variables_are_rejected() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let root = make_root(vec!["missing".into()], scan).expect("构造应该成功");
        let mut manager = manager(QueryHints::default());
        assert!(!manager.optimize(&root));
        assert!(matches!(manager.last_error(), Some(OptimizerError::FreeVariables(_))));
    }

    #[test]
    fn test_disable_scan_without_indexes_has_no_plan() {
        let hints = QueryHints {
            disable_scan: true,
            ..Default::default()
        };
        let mut manager = manager(hints);
        assert!(!manager.optimize(&filter_plan()));
        assert!(matches!(manager.last_error(), Some(OptimizerError::NoPlan(_))));
    }

    #[test]
    fn test_iteration_limit() {
        let mut manager = manager(QueryHints::default()).with_iteration_limit(1);
        assert!(!manager.optimize(&filter_plan()));
        assert_eq!(manager.last_error(), Some(&OptimizerError::IterationLimit(1)));
    }
}
