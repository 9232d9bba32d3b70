//! 逻辑改写规则
//!
//! 替换规则在集成进备忘录之前作用于具体树，自底向上反复应用直到不动点；
//! 探索规则作用于备忘录分组，为分组添加等价的逻辑替代方案

use log::debug;

use super::hints::{DisableIndexOptions, QueryHints};
use super::implementers::index_fully_serves;
use super::memo::Memo;
use crate::core::error::AbtResult;
use crate::query::abt::node::{
    make_evaluation, make_limit_skip, make_memo_logical_delegator, make_rid_intersect, make_sargable,
};
use crate::query::abt::{Abt, AbtNode, GroupId, IndexReqTarget, ProjectionName};
use crate::query::metadata::Metadata;
use crate::query::translate::requirements::convert_to_requirements;

/// 改写规则上下文
#[derive(Clone, Copy)]
pub struct RewriteContext<'a> {
    pub metadata: &'a Metadata,
    pub hints: &'a QueryHints,
}

/// 替换规则：作用于单个节点，不匹配时返回 None
pub trait RewriteRule {
    fn name(&self) -> &'static str;

    fn apply(&self, node: &Abt, ctx: &RewriteContext<'_>) -> AbtResult<Option<Abt>>;
}

/// 探索规则：为分组中的逻辑节点生成替代方案
pub trait ExplorationRule {
    fn name(&self) -> &'static str;

    fn explore(&self, node: &Abt, memo: &Memo, ctx: &RewriteContext<'_>) -> AbtResult<Vec<Abt>>;
}

/// 沿 Filter/Evaluation/Sargable 向下查找产生该投影的集合扫描
fn scan_below(node: &Abt, projection: &str) -> Option<String> {
    match node.node() {
        AbtNode::Scan {
            scan_def_name,
            binder,
        } if binder.binder_names().first().map(String::as_str) == Some(projection) => {
            Some(scan_def_name.clone())
        }
        AbtNode::Filter { child, .. }
        | AbtNode::Evaluation { child, .. }
        | AbtNode::Sargable { child, .. } => scan_below(child, projection),
        _ => None,
    }
}

/// 删除恒真过滤
pub struct FilterTrueElimination;

impl RewriteRule for FilterTrueElimination {
    fn name(&self) -> &'static str {
        "FilterTrueElimination"
    }

    fn apply(&self, node: &Abt, _ctx: &RewriteContext<'_>) -> AbtResult<Option<Abt>> {
        match node.node() {
            AbtNode::Filter { filter, child } if filter.is_constant_bool(true) => Ok(Some(child.clone())),
            _ => Ok(None),
        }
    }
}

/// 把作用于集合文档的简单谓词转换为可下推谓词节点
pub struct FilterToSargable;

impl RewriteRule for FilterToSargable {
    fn name(&self) -> &'static str {
        "FilterToSargable"
    }

    fn apply(&self, node: &Abt, _ctx: &RewriteContext<'_>) -> AbtResult<Option<Abt>> {
        let AbtNode::Filter { filter, child } = node.node() else {
            return Ok(None);
        };
        let AbtNode::EvalFilter { input, .. } = filter.node() else {
            return Ok(None);
        };
        let Some(projection) = input.as_variable() else {
            return Ok(None);
        };
        if scan_below(child, projection).is_none() {
            return Ok(None);
        }
        let conversion = convert_to_requirements(filter);
        if !conversion.success || conversion.has_empty_interval || conversion.requirements.is_empty() {
            return Ok(None);
        }
        make_sargable(
            conversion.requirements,
            projection.to_string(),
            IndexReqTarget::Complete,
            child.clone(),
        )
        .map(Some)
    }
}

/// 合并同一扫描投影上相邻的两个可下推谓词节点
pub struct SargableMerge;

impl RewriteRule for SargableMerge {
    fn name(&self) -> &'static str {
        "SargableMerge"
    }

    fn apply(&self, node: &Abt, _ctx: &RewriteContext<'_>) -> AbtResult<Option<Abt>> {
        let AbtNode::Sargable {
            reqs,
            scan_projection,
            target: IndexReqTarget::Complete,
            child,
            ..
        } = node.node()
        else {
            return Ok(None);
        };
        let AbtNode::Sargable {
            reqs: child_reqs,
            scan_projection: child_projection,
            target: IndexReqTarget::Complete,
            child: grandchild,
            ..
        } = child.node()
        else {
            return Ok(None);
        };
        if scan_projection != child_projection {
            return Ok(None);
        }
        let mut merged = child_reqs.clone();
        merged.conjoin_all_independent(reqs.clone(), 0);
        if merged.has_empty_interval() {
            return Ok(None);
        }
        make_sargable(merged, scan_projection.clone(), IndexReqTarget::Complete, grandchild.clone()).map(Some)
    }
}

/// 把可下推谓词节点移到与之无关的求值节点下方，使其靠近集合扫描
pub struct SargableEvaluationReorder;

impl RewriteRule for SargableEvaluationReorder {
    fn name(&self) -> &'static str {
        "SargableEvaluationReorder"
    }

    fn apply(&self, node: &Abt, _ctx: &RewriteContext<'_>) -> AbtResult<Option<Abt>> {
        let AbtNode::Sargable {
            reqs,
            scan_projection,
            target,
            child,
            ..
        } = node.node()
        else {
            return Ok(None);
        };
        let AbtNode::Evaluation {
            binder,
            child: grandchild,
        } = child.node()
        else {
            return Ok(None);
        };
        let evaluated: &[ProjectionName] = binder.binder_names();
        let depends = evaluated.contains(scan_projection)
            || reqs.iter().any(|(key, _)| evaluated.contains(&key.projection));
        if depends {
            return Ok(None);
        }
        let (Some(name), Some(expr)) = (evaluated.first(), binder.binder_exprs().first()) else {
            return Ok(None);
        };
        let pushed = make_sargable(reqs.clone(), scan_projection.clone(), *target, grandchild.clone())?;
        make_evaluation(name.clone(), expr.clone(), pushed).map(Some)
    }
}

/// 合并相邻的 LimitSkip
pub struct LimitSkipMerge;

impl RewriteRule for LimitSkipMerge {
    fn name(&self) -> &'static str {
        "LimitSkipMerge"
    }

    fn apply(&self, node: &Abt, _ctx: &RewriteContext<'_>) -> AbtResult<Option<Abt>> {
        let AbtNode::LimitSkip { limit, skip, child } = node.node() else {
            return Ok(None);
        };
        let AbtNode::LimitSkip {
            limit: inner_limit,
            skip: inner_skip,
            child: grandchild,
        } = child.node()
        else {
            return Ok(None);
        };
        // 外层先在内层输出上跳过 skip 行
        let remaining = inner_limit.map(|l| l.saturating_sub(*skip));
        let merged_limit = match (*limit, remaining) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        };
        make_limit_skip(merged_limit, inner_skip.saturating_add(*skip), grandchild.clone()).map(Some)
    }
}

/// 替换规则集合
pub struct RuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Box<dyn RewriteRule>>) -> Self {
        Self { rules }
    }

    /// 替换阶段使用的规则
    pub fn substitution() -> Self {
        Self::new(vec![
            Box::new(FilterTrueElimination),
            Box::new(FilterToSargable),
            Box::new(SargableEvaluationReorder),
            Box::new(SargableMerge),
            Box::new(LimitSkipMerge),
        ])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 自底向上应用一遍所有规则，返回新树和应用次数
    fn rewrite_once(&self, tree: &Abt, ctx: &RewriteContext<'_>) -> AbtResult<(Abt, usize)> {
        let mut applied = 0;
        let result = tree.transform_bottom_up(&mut |node: Abt| {
            let mut current = node;
            for rule in &self.rules {
                if let Some(next) = rule.apply(&current, ctx)? {
                    debug!("应用改写规则 {}", rule.name());
                    applied += 1;
                    current = next;
                }
            }
            Ok(current)
        })?;
        Ok((result, applied))
    }

    /// 反复改写直到没有规则可以应用，最多 `max_passes` 遍
    pub fn rewrite_to_fixpoint(
        &self,
        tree: &Abt,
        ctx: &RewriteContext<'_>,
        max_passes: usize,
    ) -> AbtResult<(Abt, usize)> {
        let mut current = tree.clone();
        let mut total = 0;
        for _ in 0..max_passes {
            let (next, applied) = self.rewrite_once(&current, ctx)?;
            current = next;
            total += applied;
            if applied == 0 {
                break;
            }
        }
        Ok((current, total))
    }
}

/// 把多条件的可下推谓词拆成两个只取记录标识的索引访问，再按记录标识求交
pub struct SargableSplit;

impl SargableSplit {
    fn scan_group_of(memo: &Memo, child: &Abt) -> Option<(GroupId, String)> {
        let AbtNode::MemoLogicalDelegator(group_id) = child.node() else {
            return None;
        };
        let indexing = memo.group(*group_id)?.logical_props.indexing.as_ref()?;
        (indexing.scan_group == *group_id).then(|| (*group_id, indexing.scan_def_name.clone()))
    }
}

impl ExplorationRule for SargableSplit {
    fn name(&self) -> &'static str {
        "SargableSplit"
    }

    fn explore(&self, node: &Abt, memo: &Memo, ctx: &RewriteContext<'_>) -> AbtResult<Vec<Abt>> {
        let AbtNode::Sargable {
            reqs,
            scan_projection,
            target: IndexReqTarget::Complete,
            child,
            ..
        } = node.node()
        else {
            return Ok(Vec::new());
        };
        if reqs.len() < 2
            || reqs.has_bound_projections()
            || ctx.hints.all_rid_intersect_disabled()
            || ctx.hints.disable_indexes == DisableIndexOptions::DisableAll
        {
            return Ok(Vec::new());
        }
        let Some((scan_group, scan_def_name)) = Self::scan_group_of(memo, child) else {
            return Ok(Vec::new());
        };
        let Some(scan_def) = ctx.metadata.scan_def(&scan_def_name) else {
            return Ok(Vec::new());
        };

        let mut alternatives = Vec::new();
        for i in 0..reqs.len() {
            let (left, right) = reqs.partition(&[i]);
            if !index_fully_serves(&left, scan_projection, scan_def, ctx.hints)
                || !index_fully_serves(&right, scan_projection, scan_def, ctx.hints)
            {
                continue;
            }
            let left = make_sargable(
                left,
                scan_projection.clone(),
                IndexReqTarget::Index,
                make_memo_logical_delegator(scan_group),
            )?;
            let right = make_sargable(
                right,
                scan_projection.clone(),
                IndexReqTarget::Index,
                make_memo_logical_delegator(scan_group),
            )?;
            alternatives.push(make_rid_intersect(scan_projection.clone(), left, right)?);
        }
        Ok(alternatives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::query::abt::expr::{make_bool, make_eval_filter, make_variable};
    use crate::query::abt::node::{make_filter, make_root, make_scan};
    use crate::query::abt::path::{make_path_compare_value, make_path_get, make_path_traverse};
    use crate::query::abt::{ExplainGenerator, Operations};

    fn eq_filter(field: &str, value: i32, child: Abt) -> Abt {
        let path = make_path_get(
            field,
            make_path_compare_value(Operations::Eq, Value::Int32(value)).expect("构造应该成功"),
        )
        .expect("构造应该成功");
        make_filter(
            make_eval_filter(path, make_variable("scan_0")).expect("构造应该成功"),
            child,
        )
        .expect("构造应该成功")
    }

    fn rewrite(tree: &Abt) -> Abt {
        let metadata = Metadata::empty();
        let hints = QueryHints::default();
        let ctx = RewriteContext {
            metadata: &metadata,
            hints: &hints,
        };
        RuleSet::substitution()
            .rewrite_to_fixpoint(tree, &ctx, 10)
            .expect("改写应该成功")
            .0
    }

    #[test]
    fn test_two_filters_become_one_sargable() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let tree = eq_filter("b", 2, eq_filter("a", 1, scan));
        let tree = make_root(vec!["scan_0".into()], tree).expect("构造应该成功");
        let result = rewrite(&tree);
        let AbtNode::Root { child, .. } = result.node() else {
            panic!("根节点应该保留");
        };
        match child.node() {
            AbtNode::Sargable { reqs, child, .. } => {
                assert_eq!(reqs.len(), 2);
                assert!(matches!(child.node(), AbtNode::Scan { .. }));
            }
            other => panic!("应该得到可下推谓词节点, 实际为 {}", other.kind_name()),
        }
    }

    #[test]
    fn test_filter_true_is_removed() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let tree = make_filter(make_bool(true), scan.clone()).expect("构造应该成功");
        assert_eq!(rewrite(&tree), scan);
    }

    #[test]
    fn test_filter_on_other_projection_is_kept() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let path = make_path_get(
            "a",
            make_path_compare_value(Operations::Eq, Value::Int32(1)).expect("构造应该成功"),
        )
        .expect("构造应该成功");
        let filter = make_filter(
            make_eval_filter(path, make_variable("other")).expect("构造应该成功"),
            scan,
        )
        .expect("构造应该成功");
        let result = rewrite(&filter);
        assert!(ExplainGenerator::explain(&result).starts_with("Filter"));
    }

    #[test]
    fn test_limit_skip_merge() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let inner = make_limit_skip(Some(10), 2, scan).expect("构造应该成功");
        let outer = make_limit_skip(Some(5), 3, inner).expect("构造应该成功");
        let result = rewrite(&outer);
        match result.node() {
            AbtNode::LimitSkip { limit, skip, .. } => {
                assert_eq!(*limit, Some(5));
                assert_eq!(*skip, 5);
            }
            other => panic!("应该得到 LimitSkip, 实际为 {}", other.kind_name()),
        }
    }

    fn array_filter(field: &str, op: Operations, value: i32, child: Abt) -> Abt {
        let compare = make_path_compare_value(op, Value::Int32(value)).expect("构造应该成功");
        let path = make_path_get(field, make_path_traverse(compare).expect("构造应该成功")).expect("构造应该成功");
        make_filter(
            make_eval_filter(path, make_variable("scan_0")).expect("构造应该成功"),
            child,
        )
        .expect("构造应该成功")
    }

    #[test]
    fn test_sargable_merge_keeps_array_predicates_apart() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        // 两个过滤器可能由同一数组中的不同元素满足，即使区间不相交
        let tree = array_filter("a", Operations::Lt, 5, array_filter("a", Operations::Gt, 10, scan));
        let result = rewrite(&tree);
        match result.node() {
            AbtNode::Sargable { reqs, .. } => {
                assert_eq!(reqs.len(), 2);
                assert!(!reqs.has_empty_interval());
            }
            other => panic!("应该得到可下推谓词节点, 实际为 {}", other.kind_name()),
        }
    }

    #[test]
    fn test_limit_skip_merge_saturates() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let inner = make_limit_skip(None, u64::MAX, scan).expect("构造应该成功");
        let outer = make_limit_skip(Some(u64::MAX), 1, inner).expect("构造应该成功");
        let result = rewrite(&outer);
        match result.node() {
            AbtNode::LimitSkip { limit, skip, .. } => {
                assert_eq!(*limit, Some(u64::MAX));
                assert_eq!(*skip, u64::MAX);
            }
            other => panic!("应该得到 LimitSkip, 实际为 {}", other.kind_name()),
        }
    }
}
