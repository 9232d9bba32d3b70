//! 关系节点工厂函数
//!
//! 引入新名称的节点统一通过 `ExpressionBinder` 绑定，
//! 隐式使用投影的节点（分组键、排序键等）统一通过 `References` 引用

use std::collections::BTreeSet;

use super::expr::{make_eval_path, make_source, make_variable};
use super::syntax::{
    CollationOp, FieldProjectionMap, GroupId, GroupNodeType, IndexReqTarget, JoinType,
    MemoPhysicalNodeId, ProjectionName,
};
use super::tree::{Abt, AbtNode};
use crate::core::error::AbtResult;
use crate::core::Value;
use crate::query::metadata::index_bounds::{IndexSpecification, PartialSchemaRequirements};
use crate::query::metadata::DistributionAndPaths;

pub fn make_binder(names: Vec<ProjectionName>, exprs: Vec<Abt>) -> AbtResult<Abt> {
    Abt::make(AbtNode::ExpressionBinder { names, exprs })
}

/// 每个名称都绑定到 `Source` 的绑定器
pub fn make_source_binder(names: Vec<ProjectionName>) -> AbtResult<Abt> {
    let exprs = names.iter().map(|_| make_source()).collect();
    make_binder(names, exprs)
}

pub fn make_references(refs: Vec<Abt>) -> AbtResult<Abt> {
    Abt::make(AbtNode::References(refs))
}

/// 引用一组投影名称
pub fn make_references_to<'a, I>(names: I) -> AbtResult<Abt>
where
    I: IntoIterator<Item = &'a ProjectionName>,
{
    make_references(names.into_iter().map(|n| make_variable(n.clone())).collect())
}

pub fn make_scan(projection: impl Into<ProjectionName>, scan_def_name: impl Into<String>) -> AbtResult<Abt> {
    Abt::make(AbtNode::Scan {
        scan_def_name: scan_def_name.into(),
        binder: make_source_binder(vec![projection.into()])?,
    })
}

pub fn make_physical_scan(
    field_projections: FieldProjectionMap,
    scan_def_name: impl Into<String>,
) -> AbtResult<Abt> {
    let binder = make_source_binder(field_projections.projections())?;
    Abt::make(AbtNode::PhysicalScan {
        field_projections,
        scan_def_name: scan_def_name.into(),
        binder,
    })
}

pub fn make_value_scan(names: Vec<ProjectionName>, rows: Vec<Value>) -> AbtResult<Abt> {
    Abt::make(AbtNode::ValueScan {
        rows,
        binder: make_source_binder(names)?,
    })
}

pub fn make_co_scan() -> Abt {
    Abt::leaf(AbtNode::CoScan)
}

pub fn make_index_scan(field_projections: FieldProjectionMap, spec: IndexSpecification) -> AbtResult<Abt> {
    let binder = make_source_binder(field_projections.projections())?;
    Abt::make(AbtNode::IndexScan {
        field_projections,
        spec,
        binder,
    })
}

pub fn make_seek(
    rid_projection: impl Into<ProjectionName>,
    field_projections: FieldProjectionMap,
    scan_def_name: impl Into<String>,
) -> AbtResult<Abt> {
    let rid_projection = rid_projection.into();
    let binder = make_source_binder(field_projections.projections())?;
    let refs = make_references(vec![make_variable(rid_projection.clone())])?;
    Abt::make(AbtNode::Seek {
        rid_projection,
        field_projections,
        scan_def_name: scan_def_name.into(),
        binder,
        refs,
    })
}

pub fn make_memo_logical_delegator(group_id: GroupId) -> Abt {
    Abt::leaf(AbtNode::MemoLogicalDelegator(group_id))
}

pub fn make_memo_physical_delegator(id: MemoPhysicalNodeId) -> Abt {
    Abt::leaf(AbtNode::MemoPhysicalDelegator(id))
}

pub fn make_filter(filter: Abt, child: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::Filter { filter, child })
}

pub fn make_evaluation(projection: impl Into<ProjectionName>, expr: Abt, child: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::Evaluation {
        binder: make_binder(vec![projection.into()], vec![expr])?,
        child,
    })
}

/// 构造可下推谓词节点
///
/// 需求中带绑定投影的条目会生成对应的绑定表达式
pub fn make_sargable(
    reqs: PartialSchemaRequirements,
    scan_projection: impl Into<ProjectionName>,
    target: IndexReqTarget,
    child: Abt,
) -> AbtResult<Abt> {
    let scan_projection = scan_projection.into();
    let mut names = Vec::new();
    let mut exprs = Vec::new();
    for (key, req) in reqs.iter() {
        if let Some(bound) = &req.bound_projection {
            names.push(bound.clone());
            exprs.push(make_eval_path(
                key.path.clone(),
                make_variable(key.projection.clone()),
            )?);
        }
    }
    let binder = make_binder(names, exprs)?;
    let refs = make_references(vec![make_variable(scan_projection.clone())])?;
    Abt::make(AbtNode::Sargable {
        reqs,
        scan_projection,
        target,
        binder,
        refs,
        child,
    })
}

pub fn make_rid_intersect(scan_projection: impl Into<ProjectionName>, left: Abt, right: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::RidIntersect {
        scan_projection: scan_projection.into(),
        left,
        right,
    })
}

pub fn make_binary_join(
    join_type: JoinType,
    correlated: BTreeSet<ProjectionName>,
    filter: Abt,
    left: Abt,
    right: Abt,
) -> AbtResult<Abt> {
    Abt::make(AbtNode::BinaryJoin {
        join_type,
        correlated,
        filter,
        left,
        right,
    })
}

pub fn make_hash_join(
    join_type: JoinType,
    left_keys: Vec<ProjectionName>,
    right_keys: Vec<ProjectionName>,
    left: Abt,
    right: Abt,
) -> AbtResult<Abt> {
    let refs = make_references_to(left_keys.iter().chain(right_keys.iter()))?;
    Abt::make(AbtNode::HashJoin {
        join_type,
        left_keys,
        right_keys,
        refs,
        left,
        right,
    })
}

pub fn make_merge_join(
    left_keys: Vec<ProjectionName>,
    right_keys: Vec<ProjectionName>,
    collation: Vec<CollationOp>,
    left: Abt,
    right: Abt,
) -> AbtResult<Abt> {
    let refs = make_references_to(left_keys.iter().chain(right_keys.iter()))?;
    Abt::make(AbtNode::MergeJoin {
        left_keys,
        right_keys,
        collation,
        refs,
        left,
        right,
    })
}

pub fn make_union(names: Vec<ProjectionName>, children: Vec<Abt>) -> AbtResult<Abt> {
    Abt::make(AbtNode::Union {
        binder: make_source_binder(names)?,
        children,
    })
}

pub fn make_group_by(
    kind: GroupNodeType,
    group_keys: Vec<ProjectionName>,
    agg_names: Vec<ProjectionName>,
    agg_exprs: Vec<Abt>,
    child: Abt,
) -> AbtResult<Abt> {
    let refs = make_references_to(group_keys.iter())?;
    Abt::make(AbtNode::GroupBy {
        kind,
        group_keys,
        agg_binder: make_binder(agg_names, agg_exprs)?,
        refs,
        child,
    })
}

/// 展开 `projection` 中的数组，`pid_projection` 绑定元素下标
pub fn make_unwind(
    projection: impl Into<ProjectionName>,
    pid_projection: impl Into<ProjectionName>,
    retain_non_arrays: bool,
    child: Abt,
) -> AbtResult<Abt> {
    Abt::make(AbtNode::Unwind {
        retain_non_arrays,
        binder: make_source_binder(vec![projection.into(), pid_projection.into()])?,
        child,
    })
}

pub fn make_unique(keys: Vec<ProjectionName>, child: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::Unique {
        refs: make_references_to(keys.iter())?,
        child,
    })
}

pub fn make_collation(spec: Vec<(ProjectionName, CollationOp)>, child: Abt) -> AbtResult<Abt> {
    let refs = make_references_to(spec.iter().map(|(name, _)| name))?;
    Abt::make(AbtNode::Collation { spec, refs, child })
}

pub fn make_limit_skip(limit: Option<u64>, skip: u64, child: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::LimitSkip { limit, skip, child })
}

pub fn make_exchange(distribution: DistributionAndPaths, preserve_sort: bool, child: Abt) -> AbtResult<Abt> {
    let refs = make_references(distribution.paths().to_vec())?;
    Abt::make(AbtNode::Exchange {
        distribution,
        preserve_sort,
        refs,
        child,
    })
}

pub fn make_root(projections: Vec<ProjectionName>, child: Abt) -> AbtResult<Abt> {
    let refs = make_references_to(projections.iter())?;
    Abt::make(AbtNode::Root {
        projections,
        refs,
        child,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AbtError;
    use crate::query::abt::expr::make_bool;
    use crate::query::abt::path::make_path_identity;

    #[test]
    fn test_filter_requires_expression_and_node() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        assert!(make_filter(make_bool(true), scan.clone()).is_ok());
        assert!(matches!(
            make_filter(make_path_identity(), scan.clone()),
            Err(AbtError::SortMismatch { position: 0, .. })
        ));
        assert!(matches!(
            make_filter(make_bool(true), make_bool(false)),
            Err(AbtError::SortMismatch { position: 1, .. })
        ));
    }

    #[test]
    fn test_binder_arity_checked() {
        let result = make_binder(vec!["a".into(), "b".into()], vec![make_source()]);
        assert_eq!(result.err(), Some(AbtError::BinderArity { names: 2, exprs: 1 }));
        let dup = make_binder(vec!["a".into(), "a".into()], vec![make_source(), make_source()]);
        assert_eq!(dup.err(), Some(AbtError::DuplicateBinding("a".into())));
    }

    #[test]
    fn test_references_reject_paths() {
        assert!(make_references(vec![make_path_identity()]).is_err());
    }

    #[test]
    fn test_value_scan_row_width() {
        let ok = make_value_scan(vec!["x".into()], vec![Value::Array(vec![Value::Int32(1)])]);
        assert!(ok.is_ok());
        let bad = make_value_scan(vec!["x".into()], vec![Value::Int32(1)]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_take_leaves_blackhole() {
        let mut tree = make_scan("scan_0", "coll").expect("构造应该成功");
        let original = tree.clone();
        let taken = tree.take();
        assert_eq!(taken, original);
        assert_eq!(tree.sort(), crate::query::abt::SyntaxSort::Blackhole);
    }

    #[test]
    fn test_structural_equality() {
        let a = make_root(vec!["scan_0".into()], make_scan("scan_0", "coll").expect("构造应该成功"))
            .expect("构造应该成功");
        let b = make_root(vec!["scan_0".into()], make_scan("scan_0", "coll").expect("构造应该成功"))
            .expect("构造应该成功");
        let c = make_root(vec!["scan_0".into()], make_scan("scan_0", "other").expect("构造应该成功"))
            .expect("构造应该成功");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_with_node_children_replaces_only_nodes() {
        let filter = make_filter(make_bool(true), make_scan("scan_0", "coll").expect("构造应该成功"))
            .expect("构造应该成功");
        let replaced = filter
            .with_node_children(vec![make_memo_logical_delegator(3)])
            .expect("替换应该成功");
        match replaced.node() {
            AbtNode::Filter { filter, child } => {
                assert!(filter.is_constant_bool(true));
                assert!(matches!(child.node(), AbtNode::MemoLogicalDelegator(3)));
            }
            other => panic!("意外的节点: {:?}", other),
        }
        assert!(filter.with_node_children(vec![]).is_err());
    }
}
