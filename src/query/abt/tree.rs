//! ABT 节点定义
//!
//! `AbtNode` 是一个封闭的和类型，覆盖表达式、路径、绑定器和关系节点。
//! `Abt` 是节点的不可变共享句柄，只能通过 `Abt::make` 构造，
//! 构造时检查每个子节点的语法类别

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use super::syntax::{
    CollationOp, FieldProjectionMap, GroupId, GroupNodeType, IndexReqTarget, JoinType,
    MemoPhysicalNodeId, Operations, ProjectionName, SyntaxSort,
};
use crate::core::error::{AbtError, AbtResult};
use crate::core::Value;
use crate::query::metadata::index_bounds::{IndexSpecification, PartialSchemaRequirements};
use crate::query::metadata::DistributionAndPaths;

/// ABT 节点
#[derive(Debug, Clone, PartialEq)]
pub enum AbtNode {
    // ==================== 表达式 ====================
    Constant(Value),
    Variable(ProjectionName),
    Source,
    UnaryOp {
        op: Operations,
        arg: Abt,
    },
    BinaryOp {
        op: Operations,
        left: Abt,
        right: Abt,
    },
    If {
        cond: Abt,
        then_branch: Abt,
        else_branch: Abt,
    },
    Let {
        var: ProjectionName,
        bind: Abt,
        body: Abt,
    },
    LambdaAbstraction {
        var: ProjectionName,
        body: Abt,
    },
    LambdaApplication {
        lambda: Abt,
        arg: Abt,
    },
    FunctionCall {
        name: String,
        args: Vec<Abt>,
    },
    /// 把路径作用在输入值上，得到新值
    EvalPath {
        path: Abt,
        input: Abt,
    },
    /// 把路径作为谓词作用在输入值上，得到布尔值
    EvalFilter {
        path: Abt,
        input: Abt,
    },

    // ==================== 路径 ====================
    PathIdentity,
    PathConstant(Abt),
    PathLambda(Abt),
    PathDefault(Abt),
    PathCompare {
        op: Operations,
        value: Abt,
    },
    PathDrop(BTreeSet<String>),
    PathKeep(BTreeSet<String>),
    PathObj,
    PathArr,
    /// 数组展开
    PathTraverse(Abt),
    PathField {
        name: String,
        inner: Abt,
    },
    PathGet {
        name: String,
        inner: Abt,
    },
    /// 合取组合
    PathComposeM(Abt, Abt),
    /// 析取组合
    PathComposeA(Abt, Abt),

    // ==================== 绑定器 ====================
    ExpressionBinder {
        names: Vec<ProjectionName>,
        exprs: Vec<Abt>,
    },
    References(Vec<Abt>),

    // ==================== 关系节点 ====================
    Scan {
        scan_def_name: String,
        binder: Abt,
    },
    PhysicalScan {
        field_projections: FieldProjectionMap,
        scan_def_name: String,
        binder: Abt,
    },
    /// 每一行都是长度等于绑定名称数的数组
    ValueScan {
        rows: Vec<Value>,
        binder: Abt,
    },
    CoScan,
    IndexScan {
        field_projections: FieldProjectionMap,
        spec: IndexSpecification,
        binder: Abt,
    },
    Seek {
        rid_projection: ProjectionName,
        field_projections: FieldProjectionMap,
        scan_def_name: String,
        binder: Abt,
        refs: Abt,
    },
    MemoLogicalDelegator(GroupId),
    MemoPhysicalDelegator(MemoPhysicalNodeId),
    Filter {
        filter: Abt,
        child: Abt,
    },
    Evaluation {
        binder: Abt,
        child: Abt,
    },
    Sargable {
        reqs: PartialSchemaRequirements,
        scan_projection: ProjectionName,
        target: IndexReqTarget,
        binder: Abt,
        refs: Abt,
        child: Abt,
    },
    RidIntersect {
        scan_projection: ProjectionName,
        left: Abt,
        right: Abt,
    },
    BinaryJoin {
        join_type: JoinType,
        correlated: BTreeSet<ProjectionName>,
        filter: Abt,
        left: Abt,
        right: Abt,
    },
    HashJoin {
        join_type: JoinType,
        left_keys: Vec<ProjectionName>,
        right_keys: Vec<ProjectionName>,
        refs: Abt,
        left: Abt,
        right: Abt,
    },
    MergeJoin {
        left_keys: Vec<ProjectionName>,
        right_keys: Vec<ProjectionName>,
        collation: Vec<CollationOp>,
        refs: Abt,
        left: Abt,
        right: Abt,
    },
    Union {
        binder: Abt,
        children: Vec<Abt>,
    },
    GroupBy {
        kind: GroupNodeType,
        group_keys: Vec<ProjectionName>,
        agg_binder: Abt,
        refs: Abt,
        child: Abt,
    },
    Unwind {
        retain_non_arrays: bool,
        binder: Abt,
        child: Abt,
    },
    Unique {
        refs: Abt,
        child: Abt,
    },
    Collation {
        spec: Vec<(ProjectionName, CollationOp)>,
        refs: Abt,
        child: Abt,
    },
    LimitSkip {
        limit: Option<u64>,
        skip: u64,
        child: Abt,
    },
    Exchange {
        distribution: DistributionAndPaths,
        preserve_sort: bool,
        refs: Abt,
        child: Abt,
    },
    Root {
        projections: Vec<ProjectionName>,
        refs: Abt,
        child: Abt,
    },

    /// 占位节点，保留结构位置但擦除内容
    Blackhole,
}

/// ABT 共享句柄
#[derive(Clone)]
pub struct Abt(Arc<AbtNode>);

impl PartialEq for Abt {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl fmt::Debug for Abt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Abt {
    /// 构造节点，先检查子节点的语法类别
    pub fn make(node: AbtNode) -> AbtResult<Abt> {
        node.validate()?;
        Ok(Abt(Arc::new(node)))
    }

    /// 无子节点的节点不需要校验
    pub(crate) fn leaf(node: AbtNode) -> Abt {
        debug_assert!(node.children().is_empty());
        Abt(Arc::new(node))
    }

    pub fn blackhole() -> Abt {
        Abt(Arc::new(AbtNode::Blackhole))
    }

    pub fn node(&self) -> &AbtNode {
        &self.0
    }

    pub fn sort(&self) -> SyntaxSort {
        self.0.sort()
    }

    pub fn is_expression(&self) -> bool {
        self.sort() == SyntaxSort::Expression
    }

    pub fn is_path(&self) -> bool {
        self.sort() == SyntaxSort::Path
    }

    pub fn is_node(&self) -> bool {
        self.sort() == SyntaxSort::Node
    }

    /// 取出子树并在原位置留下占位节点
    pub fn take(&mut self) -> Abt {
        std::mem::replace(self, Abt::blackhole())
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self.node() {
            AbtNode::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self.node() {
            AbtNode::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_constant_bool(&self, expected: bool) -> bool {
        matches!(self.node(), AbtNode::Constant(Value::Bool(b)) if *b == expected)
    }

    /// 绑定器节点的名称列表
    pub fn binder_names(&self) -> &[ProjectionName] {
        match self.node() {
            AbtNode::ExpressionBinder { names, .. } => names,
            _ => &[],
        }
    }

    /// 绑定器节点的表达式列表
    pub fn binder_exprs(&self) -> &[Abt] {
        match self.node() {
            AbtNode::ExpressionBinder { exprs, .. } => exprs,
            _ => &[],
        }
    }

    /// 关系节点引用的所有变量名
    pub fn reference_names(&self) -> Vec<&str> {
        match self.node() {
            AbtNode::References(refs) => refs.iter().filter_map(|r| r.as_variable()).collect(),
            _ => Vec::new(),
        }
    }

    /// 所有子节点，顺序与打印顺序一致
    pub fn children(&self) -> Vec<&Abt> {
        self.0.children()
    }

    /// 关系子节点
    pub fn node_children(&self) -> Vec<&Abt> {
        self.children().into_iter().filter(|c| c.is_node()).collect()
    }

    /// 替换关系子节点，其它子节点保持不变
    pub fn with_node_children(&self, new_children: Vec<Abt>) -> AbtResult<Abt> {
        let mut iter = new_children.into_iter();
        let node = self.0.map_children(&mut |child: &Abt| {
            if child.is_node() {
                iter.next().ok_or_else(|| {
                    AbtError::IllegalConstruction("替换的关系子节点数量不足".to_string())
                })
            } else {
                Ok(child.clone())
            }
        })?;
        if iter.next().is_some() {
            return Err(AbtError::IllegalConstruction(
                "替换的关系子节点数量过多".to_string(),
            ));
        }
        Abt::make(node)
    }

    /// 自底向上重建整棵树
    pub fn transform_bottom_up<F>(&self, f: &mut F) -> AbtResult<Abt>
    where
        F: FnMut(Abt) -> AbtResult<Abt>,
    {
        if self.children().is_empty() {
            return f(self.clone());
        }
        let rebuilt = self
            .0
            .map_children(&mut |child: &Abt| child.transform_bottom_up(f))?;
        let rebuilt = if rebuilt == *self.0 {
            self.clone()
        } else {
            Abt::make(rebuilt)?
        };
        f(rebuilt)
    }
}

fn expect_sort(node: &'static str, position: usize, child: &Abt, expected: SyntaxSort) -> AbtResult<()> {
    let actual = child.sort();
    if actual != expected {
        return Err(AbtError::sort_mismatch(node, position, expected, actual));
    }
    Ok(())
}

fn expect_binder_arity(node: &'static str, binder: &Abt, arity: usize) -> AbtResult<()> {
    let actual = binder.binder_names().len();
    if actual != arity {
        return Err(AbtError::IllegalConstruction(format!(
            "{} 的绑定器应包含 {} 个名称, 实际为 {}",
            node, arity, actual
        )));
    }
    Ok(())
}

impl AbtNode {
    /// 节点名称，用于错误消息和打印
    pub fn kind_name(&self) -> &'static str {
        match self {
            AbtNode::Constant(_) => "Const",
            AbtNode::Variable(_) => "Variable",
            AbtNode::Source => "Source",
            AbtNode::UnaryOp { .. } => "UnaryOp",
            AbtNode::BinaryOp { .. } => "BinaryOp",
            AbtNode::If { .. } => "If",
            AbtNode::Let { .. } => "Let",
            AbtNode::LambdaAbstraction { .. } => "LambdaAbstraction",
            AbtNode::LambdaApplication { .. } => "LambdaApplication",
            AbtNode::FunctionCall { .. } => "FunctionCall",
            AbtNode::EvalPath { .. } => "EvalPath",
            AbtNode::EvalFilter { .. } => "EvalFilter",
            AbtNode::PathIdentity => "PathIdentity",
            AbtNode::PathConstant(_) => "PathConstant",
            AbtNode::PathLambda(_) => "PathLambda",
            AbtNode::PathDefault(_) => "PathDefault",
            AbtNode::PathCompare { .. } => "PathCompare",
            AbtNode::PathDrop(_) => "PathDrop",
            AbtNode::PathKeep(_) => "PathKeep",
            AbtNode::PathObj => "PathObj",
            AbtNode::PathArr => "PathArr",
            AbtNode::PathTraverse(_) => "PathTraverse",
            AbtNode::PathField { .. } => "PathField",
            AbtNode::PathGet { .. } => "PathGet",
            AbtNode::PathComposeM(_, _) => "PathComposeM",
            AbtNode::PathComposeA(_, _) => "PathComposeA",
            AbtNode::ExpressionBinder { .. } => "Binder",
            AbtNode::References(_) => "References",
            AbtNode::Scan { .. } => "Scan",
            AbtNode::PhysicalScan { .. } => "PhysicalScan",
            AbtNode::ValueScan { .. } => "ValueScan",
            AbtNode::CoScan => "CoScan",
            AbtNode::IndexScan { .. } => "IndexScan",
            AbtNode::Seek { .. } => "Seek",
            AbtNode::MemoLogicalDelegator(_) => "MemoLogicalDelegator",
            AbtNode::MemoPhysicalDelegator(_) => "MemoPhysicalDelegator",
            AbtNode::Filter { .. } => "Filter",
            AbtNode::Evaluation { .. } => "Evaluation",
            AbtNode::Sargable { .. } => "Sargable",
            AbtNode::RidIntersect { .. } => "RidIntersect",
            AbtNode::BinaryJoin { .. } => "BinaryJoin",
            AbtNode::HashJoin { .. } => "HashJoin",
            AbtNode::MergeJoin { .. } => "MergeJoin",
            AbtNode::Union { .. } => "Union",
            AbtNode::GroupBy { .. } => "GroupBy",
            AbtNode::Unwind { .. } => "Unwind",
            AbtNode::Unique { .. } => "Unique",
            AbtNode::Collation { .. } => "Collation",
            AbtNode::LimitSkip { .. } => "LimitSkip",
            AbtNode::Exchange { .. } => "Exchange",
            AbtNode::Root { .. } => "Root",
            AbtNode::Blackhole => "Blackhole",
        }
    }

    pub fn sort(&self) -> SyntaxSort {
        match self {
            AbtNode::Constant(_)
            | AbtNode::Variable(_)
            | AbtNode::Source
            | AbtNode::UnaryOp { .. }
            | AbtNode::BinaryOp { .. }
            | AbtNode::If { .. }
            | AbtNode::Let { .. }
            | AbtNode::LambdaAbstraction { .. }
            | AbtNode::LambdaApplication { .. }
            | AbtNode::FunctionCall { .. }
            | AbtNode::EvalPath { .. }
            | AbtNode::EvalFilter { .. } => SyntaxSort::Expression,

            AbtNode::PathIdentity
            | AbtNode::PathConstant(_)
            | AbtNode::PathLambda(_)
            | AbtNode::PathDefault(_)
            | AbtNode::PathCompare { .. }
            | AbtNode::PathDrop(_)
            | AbtNode::PathKeep(_)
            | AbtNode::PathObj
            | AbtNode::PathArr
            | AbtNode::PathTraverse(_)
            | AbtNode::PathField { .. }
            | AbtNode::PathGet { .. }
            | AbtNode::PathComposeM(_, _)
            | AbtNode::PathComposeA(_, _) => SyntaxSort::Path,

            AbtNode::ExpressionBinder { .. } => SyntaxSort::Binder,
            AbtNode::References(_) => SyntaxSort::References,
            AbtNode::Blackhole => SyntaxSort::Blackhole,
            _ => SyntaxSort::Node,
        }
    }

    /// 检查子节点的语法类别与结构约束
    fn validate(&self) -> AbtResult<()> {
        use SyntaxSort::{Binder, Expression, Node, Path, References};
        let name = self.kind_name();
        match self {
            AbtNode::Constant(_)
            | AbtNode::Variable(_)
            | AbtNode::Source
            | AbtNode::PathIdentity
            | AbtNode::PathDrop(_)
            | AbtNode::PathKeep(_)
            | AbtNode::PathObj
            | AbtNode::PathArr
            | AbtNode::CoScan
            | AbtNode::MemoLogicalDelegator(_)
            | AbtNode::MemoPhysicalDelegator(_)
            | AbtNode::Blackhole => Ok(()),

            AbtNode::UnaryOp { op, arg } => {
                if !op.is_unary() {
                    return Err(AbtError::IllegalConstruction(format!("{} 不是一元操作符", op)));
                }
                expect_sort(name, 0, arg, Expression)
            }
            AbtNode::BinaryOp { op, left, right } => {
                if op.is_unary() {
                    return Err(AbtError::IllegalConstruction(format!("{} 不是二元操作符", op)));
                }
                expect_sort(name, 0, left, Expression)?;
                expect_sort(name, 1, right, Expression)
            }
            AbtNode::If {
                cond,
                then_branch,
                else_branch,
            } => {
                expect_sort(name, 0, cond, Expression)?;
                expect_sort(name, 1, then_branch, Expression)?;
                expect_sort(name, 2, else_branch, Expression)
            }
            AbtNode::Let { bind, body, .. } => {
                expect_sort(name, 0, bind, Expression)?;
                expect_sort(name, 1, body, Expression)
            }
            AbtNode::LambdaAbstraction { body, .. } => expect_sort(name, 0, body, Expression),
            AbtNode::LambdaApplication { lambda, arg } => {
                expect_sort(name, 0, lambda, Expression)?;
                expect_sort(name, 1, arg, Expression)
            }
            AbtNode::FunctionCall { args, .. } => args
                .iter()
                .enumerate()
                .try_for_each(|(i, arg)| expect_sort(name, i, arg, Expression)),
            AbtNode::EvalPath { path, input } | AbtNode::EvalFilter { path, input } => {
                expect_sort(name, 0, path, Path)?;
                expect_sort(name, 1, input, Expression)
            }

            AbtNode::PathConstant(expr) | AbtNode::PathDefault(expr) => {
                expect_sort(name, 0, expr, Expression)
            }
            AbtNode::PathLambda(lambda) => {
                expect_sort(name, 0, lambda, Expression)?;
                if !matches!(lambda.node(), AbtNode::LambdaAbstraction { .. }) {
                    return Err(AbtError::IllegalConstruction(
                        "PathLambda 需要一个 LambdaAbstraction".to_string(),
                    ));
                }
                Ok(())
            }
            AbtNode::PathCompare { op, value } => {
                if !op.is_comparison() {
                    return Err(AbtError::IllegalConstruction(format!("{} 不是比较操作符", op)));
                }
                expect_sort(name, 0, value, Expression)
            }
            AbtNode::PathTraverse(inner)
            | AbtNode::PathField { inner, .. }
            | AbtNode::PathGet { inner, .. } => expect_sort(name, 0, inner, Path),
            AbtNode::PathComposeM(left, right) | AbtNode::PathComposeA(left, right) => {
                expect_sort(name, 0, left, Path)?;
                expect_sort(name, 1, right, Path)
            }

            AbtNode::ExpressionBinder { names, exprs } => {
                if names.len() != exprs.len() {
                    return Err(AbtError::BinderArity {
                        names: names.len(),
                        exprs: exprs.len(),
                    });
                }
                let mut seen = HashSet::new();
                for n in names {
                    if !seen.insert(n) {
                        return Err(AbtError::DuplicateBinding(n.clone()));
                    }
                }
                exprs
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, e)| expect_sort(name, i, e, Expression))
            }
            AbtNode::References(refs) => refs
                .iter()
                .enumerate()
                .try_for_each(|(i, r)| expect_sort(name, i, r, Expression)),

            AbtNode::Scan { binder, .. } => {
                expect_sort(name, 0, binder, Binder)?;
                expect_binder_arity(name, binder, 1)
            }
            AbtNode::PhysicalScan { binder, .. } | AbtNode::IndexScan { binder, .. } => {
                expect_sort(name, 0, binder, Binder)
            }
            AbtNode::ValueScan { rows, binder } => {
                expect_sort(name, 0, binder, Binder)?;
                let width = binder.binder_names().len();
                for row in rows {
                    match row {
                        Value::Array(values) if values.len() == width => {}
                        _ => {
                            return Err(AbtError::IllegalConstruction(format!(
                                "ValueScan 的每一行必须是长度为 {} 的数组",
                                width
                            )))
                        }
                    }
                }
                Ok(())
            }
            AbtNode::Seek { binder, refs, .. } => {
                expect_sort(name, 0, binder, Binder)?;
                expect_sort(name, 1, refs, References)
            }
            AbtNode::Filter { filter, child } => {
                expect_sort(name, 0, filter, Expression)?;
                expect_sort(name, 1, child, Node)
            }
            AbtNode::Evaluation { binder, child } => {
                expect_sort(name, 0, binder, Binder)?;
                expect_binder_arity(name, binder, 1)?;
                expect_sort(name, 1, child, Node)
            }
            AbtNode::Sargable {
                binder, refs, child, ..
            } => {
                expect_sort(name, 0, binder, Binder)?;
                expect_sort(name, 1, refs, References)?;
                expect_sort(name, 2, child, Node)
            }
            AbtNode::RidIntersect { left, right, .. } => {
                expect_sort(name, 0, left, Node)?;
                expect_sort(name, 1, right, Node)
            }
            AbtNode::BinaryJoin {
                filter, left, right, ..
            } => {
                expect_sort(name, 0, filter, Expression)?;
                expect_sort(name, 1, left, Node)?;
                expect_sort(name, 2, right, Node)
            }
            AbtNode::HashJoin {
                left_keys,
                right_keys,
                refs,
                left,
                right,
                ..
            } => {
                if left_keys.is_empty() || left_keys.len() != right_keys.len() {
                    return Err(AbtError::IllegalConstruction(
                        "HashJoin 的左右连接键数量必须相同且非空".to_string(),
                    ));
                }
                expect_sort(name, 0, refs, References)?;
                expect_sort(name, 1, left, Node)?;
                expect_sort(name, 2, right, Node)
            }
            AbtNode::MergeJoin {
                left_keys,
                right_keys,
                collation,
                refs,
                left,
                right,
            } => {
                if left_keys.is_empty()
                    || left_keys.len() != right_keys.len()
                    || collation.len() != left_keys.len()
                {
                    return Err(AbtError::IllegalConstruction(
                        "MergeJoin 的连接键与排序方向数量必须一致且非空".to_string(),
                    ));
                }
                expect_sort(name, 0, refs, References)?;
                expect_sort(name, 1, left, Node)?;
                expect_sort(name, 2, right, Node)
            }
            AbtNode::Union { binder, children } => {
                if children.is_empty() {
                    return Err(AbtError::IllegalConstruction(
                        "Union 至少需要一个子节点".to_string(),
                    ));
                }
                expect_sort(name, 0, binder, Binder)?;
                children
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, c)| expect_sort(name, i + 1, c, Node))
            }
            AbtNode::GroupBy {
                agg_binder,
                refs,
                child,
                ..
            } => {
                expect_sort(name, 0, agg_binder, Binder)?;
                expect_sort(name, 1, refs, References)?;
                expect_sort(name, 2, child, Node)
            }
            AbtNode::Unwind { binder, child, .. } => {
                expect_sort(name, 0, binder, Binder)?;
                expect_binder_arity(name, binder, 2)?;
                expect_sort(name, 1, child, Node)
            }
            AbtNode::Unique { refs, child }
            | AbtNode::Collation { refs, child, .. }
            | AbtNode::Exchange { refs, child, .. }
            | AbtNode::Root { refs, child, .. } => {
                expect_sort(name, 0, refs, References)?;
                expect_sort(name, 1, child, Node)
            }
            AbtNode::LimitSkip { child, .. } => expect_sort(name, 0, child, Node),
        }
    }

    /// 所有子节点
    pub fn children(&self) -> Vec<&Abt> {
        match self {
            AbtNode::Constant(_)
            | AbtNode::Variable(_)
            | AbtNode::Source
            | AbtNode::PathIdentity
            | AbtNode::PathDrop(_)
            | AbtNode::PathKeep(_)
            | AbtNode::PathObj
            | AbtNode::PathArr
            | AbtNode::CoScan
            | AbtNode::MemoLogicalDelegator(_)
            | AbtNode::MemoPhysicalDelegator(_)
            | AbtNode::Blackhole => Vec::new(),

            AbtNode::UnaryOp { arg, .. } => vec![arg],
            AbtNode::BinaryOp { left, right, .. } => vec![left, right],
            AbtNode::If {
                cond,
                then_branch,
                else_branch,
            } => vec![cond, then_branch, else_branch],
            AbtNode::Let { bind, body, .. } => vec![bind, body],
            AbtNode::LambdaAbstraction { body, .. } => vec![body],
            AbtNode::LambdaApplication { lambda, arg } => vec![lambda, arg],
            AbtNode::FunctionCall { args, .. } => args.iter().collect(),
            AbtNode::EvalPath { path, input } | AbtNode::EvalFilter { path, input } => {
                vec![path, input]
            }

            AbtNode::PathConstant(e) | AbtNode::PathLambda(e) | AbtNode::PathDefault(e) => {
                vec![e]
            }
            AbtNode::PathCompare { value, .. } => vec![value],
            AbtNode::PathTraverse(inner)
            | AbtNode::PathField { inner, .. }
            | AbtNode::PathGet { inner, .. } => vec![inner],
            AbtNode::PathComposeM(l, r) | AbtNode::PathComposeA(l, r) => vec![l, r],

            AbtNode::ExpressionBinder { exprs, .. } => exprs.iter().collect(),
            AbtNode::References(refs) => refs.iter().collect(),

            AbtNode::Scan { binder, .. }
            | AbtNode::PhysicalScan { binder, .. }
            | AbtNode::ValueScan { binder, .. }
            | AbtNode::IndexScan { binder, .. } => vec![binder],
            AbtNode::Seek { binder, refs, .. } => vec![binder, refs],
            AbtNode::Filter { filter, child } => vec![filter, child],
            AbtNode::Evaluation { binder, child } => vec![binder, child],
            AbtNode::Sargable {
                binder, refs, child, ..
            } => vec![binder, refs, child],
            AbtNode::RidIntersect { left, right, .. } => vec![left, right],
            AbtNode::BinaryJoin {
                filter, left, right, ..
            } => vec![filter, left, right],
            AbtNode::HashJoin {
                refs, left, right, ..
            }
            | AbtNode::MergeJoin {
                refs, left, right, ..
            } => vec![refs, left, right],
            AbtNode::Union { binder, children } => {
                let mut all = vec![binder];
                all.extend(children.iter());
                all
            }
            AbtNode::GroupBy {
                agg_binder,
                refs,
                child,
                ..
            } => vec![agg_binder, refs, child],
            AbtNode::Unwind { binder, child, .. } => vec![binder, child],
            AbtNode::Unique { refs, child }
            | AbtNode::Collation { refs, child, .. }
            | AbtNode::Exchange { refs, child, .. }
            | AbtNode::Root { refs, child, .. } => vec![refs, child],
            AbtNode::LimitSkip { child, .. } => vec![child],
        }
    }

    /// 按 `children` 的顺序映射所有子节点，返回未校验的新节点
    pub fn map_children<F>(&self, f: &mut F) -> AbtResult<AbtNode>
    where
        F: FnMut(&Abt) -> AbtResult<Abt>,
    {
        let node = match self {
            AbtNode::Constant(_)
            | AbtNode::Variable(_)
            | AbtNode::Source
            | AbtNode::PathIdentity
            | AbtNode::PathDrop(_)
            | AbtNode::PathKeep(_)
            | AbtNode::PathObj
            | AbtNode::PathArr
            | AbtNode::CoScan
            | AbtNode::MemoLogicalDelegator(_)
            | AbtNode::MemoPhysicalDelegator(_)
            | AbtNode::Blackhole => self.clone(),

            AbtNode::UnaryOp { op, arg } => AbtNode::UnaryOp { op: *op, arg: f(arg)? },
            AbtNode::BinaryOp { op, left, right } => AbtNode::BinaryOp {
                op: *op,
                left: f(left)?,
                right: f(right)?,
            },
            AbtNode::If {
                cond,
                then_branch,
                else_branch,
            } => AbtNode::If {
                cond: f(cond)?,
                then_branch: f(then_branch)?,
                else_branch: f(else_branch)?,
            },
            AbtNode::Let { var, bind, body } => AbtNode::Let {
                var: var.clone(),
                bind: f(bind)?,
                body: f(body)?,
            },
            AbtNode::LambdaAbstraction { var, body } => AbtNode::LambdaAbstraction {
                var: var.clone(),
                body: f(body)?,
            },
            AbtNode::LambdaApplication { lambda, arg } => AbtNode::LambdaApplication {
                lambda: f(lambda)?,
                arg: f(arg)?,
            },
            AbtNode::FunctionCall { name, args } => AbtNode::FunctionCall {
                name: name.clone(),
                args: args.iter().map(|a| f(a)).collect::<AbtResult<_>>()?,
            },
            AbtNode::EvalPath { path, input } => AbtNode::EvalPath {
                path: f(path)?,
                input: f(input)?,
            },
            AbtNode::EvalFilter { path, input } => AbtNode::EvalFilter {
                path: f(path)?,
                input: f(input)?,
            },

            AbtNode::PathConstant(e) => AbtNode::PathConstant(f(e)?),
            AbtNode::PathLambda(e) => AbtNode::PathLambda(f(e)?),
            AbtNode::PathDefault(e) => AbtNode::PathDefault(f(e)?),
            AbtNode::PathCompare { op, value } => AbtNode::PathCompare {
                op: *op,
                value: f(value)?,
            },
            AbtNode::PathTraverse(inner) => AbtNode::PathTraverse(f(inner)?),
            AbtNode::PathField { name, inner } => AbtNode::PathField {
                name: name.clone(),
                inner: f(inner)?,
            },
            AbtNode::PathGet { name, inner } => AbtNode::PathGet {
                name: name.clone(),
                inner: f(inner)?,
            },
            AbtNode::PathComposeM(l, r) => AbtNode::PathComposeM(f(l)?, f(r)?),
            AbtNode::PathComposeA(l, r) => AbtNode::PathComposeA(f(l)?, f(r)?),

            AbtNode::ExpressionBinder { names, exprs } => AbtNode::ExpressionBinder {
                names: names.clone(),
                exprs: exprs.iter().map(|e| f(e)).collect::<AbtResult<_>>()?,
            },
            AbtNode::References(refs) => {
                AbtNode::References(refs.iter().map(|r| f(r)).collect::<AbtResult<_>>()?)
            }

            AbtNode::Scan {
                scan_def_name,
                binder,
            } => AbtNode::Scan {
                scan_def_name: scan_def_name.clone(),
                binder: f(binder)?,
            },
            AbtNode::PhysicalScan {
                field_projections,
                scan_def_name,
                binder,
            } => AbtNode::PhysicalScan {
                field_projections: field_projections.clone(),
                scan_def_name: scan_def_name.clone(),
                binder: f(binder)?,
            },
            AbtNode::ValueScan { rows, binder } => AbtNode::ValueScan {
                rows: rows.clone(),
                binder: f(binder)?,
            },
            AbtNode::IndexScan {
                field_projections,
                spec,
                binder,
            } => AbtNode::IndexScan {
                field_projections: field_projections.clone(),
                spec: spec.clone(),
                binder: f(binder)?,
            },
            AbtNode::Seek {
                rid_projection,
                field_projections,
                scan_def_name,
                binder,
                refs,
            } => AbtNode::Seek {
                rid_projection: rid_projection.clone(),
                field_projections: field_projections.clone(),
                scan_def_name: scan_def_name.clone(),
                binder: f(binder)?,
                refs: f(refs)?,
            },
            AbtNode::Filter { filter, child } => AbtNode::Filter {
                filter: f(filter)?,
                child: f(child)?,
            },
            AbtNode::Evaluation { binder, child } => AbtNode::Evaluation {
                binder: f(binder)?,
                child: f(child)?,
            },
            AbtNode::Sargable {
                reqs,
                scan_projection,
                target,
                binder,
                refs,
                child,
            } => AbtNode::Sargable {
                reqs: reqs.clone(),
                scan_projection: scan_projection.clone(),
                target: *target,
                binder: f(binder)?,
                refs: f(refs)?,
                child: f(child)?,
            },
            AbtNode::RidIntersect {
                scan_projection,
                left,
                right,
            } => AbtNode::RidIntersect {
                scan_projection: scan_projection.clone(),
                left: f(left)?,
                right: f(right)?,
            },
            AbtNode::BinaryJoin {
                join_type,
                correlated,
                filter,
                left,
                right,
            } => AbtNode::BinaryJoin {
                join_type: *join_type,
                correlated: correlated.clone(),
                filter: f(filter)?,
                left: f(left)?,
                right: f(right)?,
            },
            AbtNode::HashJoin {
                join_type,
                left_keys,
                right_keys,
                refs,
                left,
                right,
            } => AbtNode::HashJoin {
                join_type: *join_type,
                left_keys: left_keys.clone(),
                right_keys: right_keys.clone(),
                refs: f(refs)?,
                left: f(left)?,
                right: f(right)?,
            },
            AbtNode::MergeJoin {
                left_keys,
                right_keys,
                collation,
                refs,
                left,
                right,
            } => AbtNode::MergeJoin {
                left_keys: left_keys.clone(),
                right_keys: right_keys.clone(),
                collation: collation.clone(),
                refs: f(refs)?,
                left: f(left)?,
                right: f(right)?,
            },
            AbtNode::Union { binder, children } => AbtNode::Union {
                binder: f(binder)?,
                children: children.iter().map(|c| f(c)).collect::<AbtResult<_>>()?,
            },
            AbtNode::GroupBy {
                kind,
                group_keys,
                agg_binder,
                refs,
                child,
            } => AbtNode::GroupBy {
                kind: *kind,
                group_keys: group_keys.clone(),
                agg_binder: f(agg_binder)?,
                refs: f(refs)?,
                child: f(child)?,
            },
            AbtNode::Unwind {
                retain_non_arrays,
                binder,
                child,
            } => AbtNode::Unwind {
                retain_non_arrays: *retain_non_arrays,
                binder: f(binder)?,
                child: f(child)?,
            },
            AbtNode::Unique { refs, child } => AbtNode::Unique {
                refs: f(refs)?,
                child: f(child)?,
            },
            AbtNode::Collation { spec, refs, child } => AbtNode::Collation {
                spec: spec.clone(),
                refs: f(refs)?,
                child: f(child)?,
            },
            AbtNode::LimitSkip { limit, skip, child } => AbtNode::LimitSkip {
                limit: *limit,
                skip: *skip,
                child: f(child)?,
            },
            AbtNode::Exchange {
                distribution,
                preserve_sort,
                refs,
                child,
            } => AbtNode::Exchange {
                distribution: distribution.clone(),
                preserve_sort: *preserve_sort,
                refs: f(refs)?,
                child: f(child)?,
            },
            AbtNode::Root {
                projections,
                refs,
                child,
            } => AbtNode::Root {
                projections: projections.clone(),
                refs: f(refs)?,
                child: f(child)?,
            },
        };
        Ok(node)
    }
}
