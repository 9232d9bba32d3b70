//! 物理实现规则
//!
//! 为分组中的每个逻辑节点生成物理替代方案。替代方案的叶子可以是逻辑委托节点，
//! 每个委托节点附带对子分组的物理属性要求，由阶段管理器递归优化后替换为物理委托节点

use std::collections::BTreeSet;

use log::trace;

use super::hints::{DisableIndexOptions, QueryHints};
use super::memo::{DistributionRequirement, Memo, PhysProps};
use crate::core::error::AbtResult;
use crate::core::Value;
use crate::query::abt::expr::{
    make_binary, make_bool, make_constant, make_eval_path, make_function_call, make_variable,
};
use crate::query::abt::node::{
    make_binary_join, make_evaluation, make_exchange, make_filter, make_group_by, make_hash_join,
    make_index_scan, make_memo_logical_delegator, make_merge_join, make_physical_scan, make_seek,
    make_union, make_unique,
};
use crate::query::abt::path::index_path_matches;
use crate::query::abt::{
    Abt, AbtNode, CollationOp, DistributionType, FieldProjectionMap, GroupId, GroupNodeType,
    IndexReqTarget, JoinType, Operations, ProjectionName,
};
use crate::query::metadata::index_bounds::{
    intersect_disjunctions, IndexSpecification, IntervalRequirement, PartialSchemaRequirement,
    PartialSchemaRequirements,
};
use crate::query::metadata::{DistributionAndPaths, IndexDefinition, Metadata, ScanDefinition};
use crate::query::translate::requirements::requirements_to_filter;

/// 复合索引区间展开后的最大区间数
const MAX_INDEX_INTERVALS: usize = 32;

/// 一个物理替代方案
#[derive(Debug, Clone)]
pub struct PhysicalAlternative {
    /// 叶子为逻辑委托节点的计划片段
    pub node: Abt,
    /// 按深度优先顺序，每个逻辑委托节点要求的物理属性
    pub child_props: Vec<PhysProps>,
}

impl PhysicalAlternative {
    fn new(node: Abt, child_props: Vec<PhysProps>) -> Self {
        Self { node, child_props }
    }

    fn leaf(node: Abt) -> Self {
        Self::new(node, Vec::new())
    }
}

/// 实现规则上下文
#[derive(Clone, Copy)]
pub struct ImplementationContext<'a> {
    pub metadata: &'a Metadata,
    pub memo: &'a Memo,
    pub hints: &'a QueryHints,
}

/// 索引对需求的覆盖情况
#[derive(Debug, Clone)]
pub(crate) struct IndexAccess {
    /// 每个索引字段上的区间析取
    pub field_intervals: Vec<Vec<IntervalRequirement>>,
    /// 参与构造索引区间的需求下标
    pub satisfied: Vec<usize>,
    /// 其中只含等值区间、取回文档后无需再检查的需求下标
    pub exact: Vec<usize>,
}

impl IndexAccess {
    /// 展开为复合区间的笛卡尔积
    fn compound_intervals(&self) -> Vec<Vec<IntervalRequirement>> {
        let mut result: Vec<Vec<IntervalRequirement>> = vec![Vec::new()];
        for choices in &self.field_intervals {
            result = result
                .into_iter()
                .flat_map(|prefix| {
                    choices.iter().map(move |interval| {
                        let mut next = prefix.clone();
                        next.push(interval.clone());
                        next
                    })
                })
                .collect();
        }
        result
    }

    /// 取回文档后仍需过滤的需求
    ///
    /// 范围区间按跨类型全序比较，可能包含与比较值类型不同的值，因此总是保留
    fn residual(&self, reqs: &PartialSchemaRequirements) -> PartialSchemaRequirements {
        let keep: Vec<usize> = (0..reqs.len()).filter(|i| !self.exact.contains(i)).collect();
        reqs.select(&keep)
    }
}

/// 计算索引对需求的覆盖
///
/// 按排序规格的顺序匹配字段：只要前面的字段都是等值条件就继续匹配，
/// 遇到范围条件或未匹配的字段后，剩余字段使用完全开区间。
///
/// 同一路径上可能有多条独立需求。非多键索引的字段从不是数组，这些需求的区间可以求交；
/// 多键索引的一个字段只使用其中一条，其余留作残余过滤
pub(crate) fn index_access(
    reqs: &PartialSchemaRequirements,
    scan_projection: &str,
    index: &IndexDefinition,
) -> Option<IndexAccess> {
    let mut field_intervals = Vec::new();
    let mut satisfied = Vec::new();
    let mut exact = Vec::new();
    let mut prefix_open = true;
    let mut combinations = 1usize;

    for entry in index.collation_spec() {
        let candidates: Vec<(usize, &PartialSchemaRequirement)> = if prefix_open {
            reqs.iter()
                .enumerate()
                .filter(|(i, (key, req))| {
                    key.projection == scan_projection
                        && !satisfied.contains(i)
                        && !req.is_fully_open()
                        && !req.is_unsatisfiable()
                        && index_path_matches(&key.path, &entry.path)
                })
                .map(|(i, (_, req))| (i, req))
                .collect()
        } else {
            Vec::new()
        };

        let mut used = Vec::new();
        let mut intervals: Option<Vec<IntervalRequirement>> = None;
        for (i, req) in candidates {
            let next = match &intervals {
                None => req.intervals.clone(),
                Some(_) if index.is_multikey() => break,
                Some(current) => intersect_disjunctions(current, &req.intervals),
            };
            if next.is_empty() {
                continue;
            }
            intervals = Some(next);
            used.push((i, req.is_equality_only()));
        }

        match intervals {
            Some(intervals) if combinations * intervals.len() <= MAX_INDEX_INTERVALS => {
                combinations *= intervals.len();
                let equality = intervals.iter().all(IntervalRequirement::is_equality);
                field_intervals.push(intervals);
                for (i, exact_req) in used {
                    satisfied.push(i);
                    if exact_req {
                        exact.push(i);
                    }
                }
                if !equality {
                    prefix_open = false;
                }
            }
            _ => {
                field_intervals.push(vec![IntervalRequirement::fully_open()]);
                prefix_open = false;
            }
        }
    }

    if satisfied.is_empty() {
        return None;
    }
    Some(IndexAccess {
        field_intervals,
        satisfied,
        exact,
    })
}

/// 索引是否可用于当前提示
fn index_allowed(index: &IndexDefinition, reqs: &PartialSchemaRequirements, hints: &QueryHints) -> bool {
    match hints.disable_indexes {
        DisableIndexOptions::DisableAll => false,
        DisableIndexOptions::DisablePartialOnly if index.is_partial() => false,
        // 部分索引只在查询谓词蕴含其部分过滤条件时可用
        _ => !index.is_partial() || reqs.implies(index.partial_requirements()),
    }
}

/// 是否存在一个索引能完全表达全部需求，即取回文档后不需要残余过滤
pub(crate) fn index_fully_serves(
    reqs: &PartialSchemaRequirements,
    scan_projection: &str,
    scan_def: &ScanDefinition,
    hints: &QueryHints,
) -> bool {
    scan_def.index_defs().values().any(|index| {
        index_allowed(index, reqs, hints)
            && index_access(reqs, scan_projection, index)
                .is_some_and(|access| access.exact.len() == reqs.len())
    })
}

/// 扫描定义的数据分布能否满足分布要求
fn delivers(required: &PhysProps, scan_def: Option<&ScanDefinition>) -> bool {
    match required.distribution {
        DistributionRequirement::Any => true,
        DistributionRequirement::Centralized => scan_def.map_or(true, |def| {
            def.distribution_and_paths().kind() == DistributionType::Centralized
        }),
    }
}

fn single_child_group(node: &Abt) -> Option<GroupId> {
    match node.node_children().first().map(|c| c.node()) {
        Some(AbtNode::MemoLogicalDelegator(group_id)) => Some(*group_id),
        _ => None,
    }
}

/// 在计划上叠加残余过滤和绑定投影的求值
fn finish_sargable(
    plan: Abt,
    residual: &PartialSchemaRequirements,
    all_reqs: &PartialSchemaRequirements,
) -> AbtResult<Abt> {
    let mut plan = match requirements_to_filter(residual)? {
        Some(filter) => make_filter(filter, plan)?,
        None => plan,
    };
    for (key, req) in all_reqs.iter() {
        if let Some(bound) = &req.bound_projection {
            let expr = make_eval_path(key.path.clone(), make_variable(key.projection.clone()))?;
            plan = make_evaluation(bound.clone(), expr, plan)?;
        }
    }
    Ok(plan)
}

/// 生成逻辑节点在给定物理属性下的全部物理替代方案
pub fn implement(
    node: &Abt,
    required: &PhysProps,
    ctx: &ImplementationContext<'_>,
) -> AbtResult<Vec<PhysicalAlternative>> {
    let centralized = PhysProps::centralized();
    let alternatives = match node.node() {
        AbtNode::Root { .. } => vec![PhysicalAlternative::new(node.clone(), vec![centralized])],

        AbtNode::Scan {
            scan_def_name,
            binder,
        } => {
            let scan_def = ctx.metadata.scan_def(scan_def_name);
            match binder.binder_names().first() {
                Some(projection) if !ctx.hints.disable_scan && delivers(required, scan_def) => {
                    vec![PhysicalAlternative::leaf(make_physical_scan(
                        FieldProjectionMap::with_root(projection.clone()),
                        scan_def_name.clone(),
                    )?)]
                }
                _ => Vec::new(),
            }
        }
        AbtNode::ValueScan { .. } | AbtNode::CoScan => vec![PhysicalAlternative::leaf(node.clone())],

        // 这些节点对子节点的分布没有额外要求
        AbtNode::Filter { .. }
        | AbtNode::Evaluation { .. }
        | AbtNode::Unwind { .. }
        | AbtNode::Unique { .. }
        | AbtNode::Union { .. }
        | AbtNode::BinaryJoin { .. }
        | AbtNode::HashJoin { .. }
        | AbtNode::MergeJoin { .. } => {
            let arity = node.node_children().len();
            vec![PhysicalAlternative::new(node.clone(), vec![*required; arity])]
        }

        // 需要看到全部行的节点要求子节点集中
        AbtNode::LimitSkip { .. } | AbtNode::Collation { .. } | AbtNode::GroupBy { .. } => {
            vec![PhysicalAlternative::new(node.clone(), vec![centralized])]
        }

        AbtNode::Sargable {
            reqs,
            scan_projection,
            target,
            ..
        } => implement_sargable(node, reqs, scan_projection, *target, required, ctx)?,

        AbtNode::RidIntersect {
            scan_projection,
            left,
            right,
        } => implement_rid_intersect(scan_projection, left, right, required, ctx)?,

        _ => Vec::new(),
    };
    trace!(
        "{} 生成了 {} 个物理替代方案",
        node.node().kind_name(),
        alternatives.len()
    );
    Ok(alternatives)
}

/// 分组无法在集中分布下直接实现时，通过交换节点收集任意分布的结果
pub fn enforcers(
    group_id: GroupId,
    is_root_group: bool,
    required: &PhysProps,
    ctx: &ImplementationContext<'_>,
) -> AbtResult<Vec<PhysicalAlternative>> {
    if !ctx.metadata.is_parallel_execution()
        || is_root_group
        || required.distribution != DistributionRequirement::Centralized
    {
        return Ok(Vec::new());
    }
    let exchange = make_exchange(
        DistributionAndPaths::centralized(),
        false,
        make_memo_logical_delegator(group_id),
    )?;
    Ok(vec![PhysicalAlternative::new(exchange, vec![PhysProps::any()])])
}

/// 索引侧计划：只产生记录标识
fn index_side(
    access: &IndexAccess,
    rid: &ProjectionName,
    scan_def_name: &str,
    index_name: &str,
    index: &IndexDefinition,
) -> AbtResult<Abt> {
    let compounds = access.compound_intervals();
    let disjunctive = compounds.len() > 1;
    let mut scans = Vec::with_capacity(compounds.len());
    for intervals in compounds {
        let spec = IndexSpecification {
            scan_def_name: scan_def_name.to_string(),
            index_def_name: index_name.to_string(),
            intervals,
            reverse_order: false,
        };
        scans.push(make_index_scan(FieldProjectionMap::with_rid(rid.clone()), spec)?);
    }
    let mut side = if scans.len() == 1 {
        scans.remove(0)
    } else {
        make_union(vec![rid.clone()], scans)?
    };
    // 多键索引或多个区间可能产生重复的记录标识
    if index.is_multikey() || disjunctive {
        side = make_unique(vec![rid.clone()], side)?;
    }
    Ok(side)
}

/// 按记录标识取回文档
fn seek_join(side: Abt, rid: &ProjectionName, scan_projection: &str, scan_def_name: &str) -> AbtResult<Abt> {
    let seek = make_seek(
        rid.clone(),
        FieldProjectionMap::with_root(scan_projection),
        scan_def_name,
    )?;
    let correlated: BTreeSet<ProjectionName> = [rid.clone()].into_iter().collect();
    make_binary_join(JoinType::Inner, correlated, make_bool(true), side, seek)
}

fn implement_sargable(
    node: &Abt,
    reqs: &PartialSchemaRequirements,
    scan_projection: &ProjectionName,
    target: IndexReqTarget,
    required: &PhysProps,
    ctx: &ImplementationContext<'_>,
) -> AbtResult<Vec<PhysicalAlternative>> {
    let Some(child_group) = single_child_group(node) else {
        return Ok(Vec::new());
    };
    let indexing = ctx
        .memo
        .group(child_group)
        .and_then(|g| g.logical_props.indexing.clone())
        .filter(|i| i.scan_group == child_group && &i.scan_projection == scan_projection);

    let Some(indexing) = indexing else {
        // 子节点不是集合扫描，退化为过滤
        if target != IndexReqTarget::Complete {
            return Ok(Vec::new());
        }
        let plan = finish_sargable(make_memo_logical_delegator(child_group), reqs, reqs)?;
        return Ok(vec![PhysicalAlternative::new(plan, vec![*required])]);
    };

    let scan_def_name = indexing.scan_def_name.as_str();
    let scan_def = ctx.metadata.scan_def(scan_def_name);
    if !delivers(required, scan_def) {
        return Ok(Vec::new());
    }
    let mut alternatives = Vec::new();

    if target == IndexReqTarget::Complete && !ctx.hints.disable_scan {
        let scan = make_physical_scan(FieldProjectionMap::with_root(scan_projection.clone()), scan_def_name)?;
        alternatives.push(PhysicalAlternative::leaf(finish_sargable(scan, reqs, reqs)?));
    }

    let (Some(scan_def), Some(rid)) = (scan_def, ctx.memo.rid_projection(scan_def_name)) else {
        return Ok(alternatives);
    };
    for (index_name, index) in scan_def.index_defs() {
        if !index_allowed(index, reqs, ctx.hints) {
            continue;
        }
        let Some(access) = index_access(reqs, scan_projection, index) else {
            continue;
        };
        let residual = access.residual(reqs);
        let side = index_side(&access, rid, scan_def_name, index_name, index)?;

        match target {
            IndexReqTarget::Index => {
                if residual.is_empty() && !reqs.has_bound_projections() {
                    alternatives.push(PhysicalAlternative::leaf(side));
                }
            }
            IndexReqTarget::Complete | IndexReqTarget::Seek => {
                let plan = seek_join(side, rid, scan_projection, scan_def_name)?;
                alternatives.push(PhysicalAlternative::leaf(finish_sargable(plan, &residual, reqs)?));
            }
        }
    }
    Ok(alternatives)
}

fn sargable_reqs_of(ctx: &ImplementationContext<'_>, group_id: GroupId) -> Option<PartialSchemaRequirements> {
    ctx.memo.group(group_id)?.logical_nodes.iter().find_map(|n| match n.node() {
        AbtNode::Sargable { reqs, .. } => Some(reqs.clone()),
        _ => None,
    })
}

fn delegator_group(abt: &Abt) -> Option<GroupId> {
    match abt.node() {
        AbtNode::MemoLogicalDelegator(group_id) => Some(*group_id),
        _ => None,
    }
}

fn implement_rid_intersect(
    scan_projection: &ProjectionName,
    left: &Abt,
    right: &Abt,
    required: &PhysProps,
    ctx: &ImplementationContext<'_>,
) -> AbtResult<Vec<PhysicalAlternative>> {
    let (Some(left_group), Some(right_group)) = (delegator_group(left), delegator_group(right)) else {
        return Ok(Vec::new());
    };
    let Some(indexing) = ctx
        .memo
        .group(left_group)
        .and_then(|g| g.logical_props.indexing.clone())
    else {
        return Ok(Vec::new());
    };
    let scan_def_name = indexing.scan_def_name.as_str();
    let Some(rid) = ctx.memo.rid_projection(scan_def_name) else {
        return Ok(Vec::new());
    };
    let hints = ctx.hints;
    let centralized = PhysProps::centralized();
    let mut alternatives = Vec::new();

    if !hints.disable_hash_join_rid_intersect {
        let join = make_hash_join(
            JoinType::Inner,
            vec![rid.clone()],
            vec![rid.clone()],
            left.clone(),
            right.clone(),
        )?;
        let plan = seek_join(join, rid, scan_projection, scan_def_name)?;
        alternatives.push(PhysicalAlternative::new(plan, vec![*required, *required]));
    }

    let equality_only = |group: GroupId| {
        sargable_reqs_of(ctx, group)
            .is_some_and(|reqs| reqs.iter().all(|(_, r)| r.is_equality_only()))
    };
    // 等值条件下索引按记录标识有序输出
    if !hints.disable_merge_join_rid_intersect && equality_only(left_group) && equality_only(right_group) {
        let join = make_merge_join(
            vec![rid.clone()],
            vec![rid.clone()],
            vec![CollationOp::Ascending],
            left.clone(),
            right.clone(),
        )?;
        let plan = seek_join(join, rid, scan_projection, scan_def_name)?;
        alternatives.push(PhysicalAlternative::new(plan, vec![*required, *required]));
    }

    if !hints.disable_group_by_and_union_rid_intersect {
        let count = format!("{}_count", rid);
        let union = make_union(vec![rid.clone()], vec![left.clone(), right.clone()])?;
        let group_by = make_group_by(
            GroupNodeType::Complete,
            vec![rid.clone()],
            vec![count.clone()],
            vec![make_function_call("$sum", vec![make_constant(Value::Int32(1))])?],
            union,
        )?;
        let both_sides = make_binary(
            Operations::Eq,
            make_variable(count),
            make_constant(Value::Int32(2)),
        )?;
        let filtered = make_filter(both_sides, group_by)?;
        let plan = seek_join(filtered, rid, scan_projection, scan_def_name)?;
        alternatives.push(PhysicalAlternative::new(plan, vec![centralized, centralized]));
    }
    Ok(alternatives)
}
