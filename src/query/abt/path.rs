//! 路径工厂函数与路径辅助操作

use std::collections::BTreeSet;

use super::expr::{make_bool, make_constant};
use super::syntax::Operations;
use super::tree::{Abt, AbtNode};
use crate::core::error::AbtResult;
use crate::core::Value;

pub fn make_path_identity() -> Abt {
    Abt::leaf(AbtNode::PathIdentity)
}

pub fn make_path_obj() -> Abt {
    Abt::leaf(AbtNode::PathObj)
}

pub fn make_path_arr() -> Abt {
    Abt::leaf(AbtNode::PathArr)
}

pub fn make_path_constant(expr: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathConstant(expr))
}

/// 恒真或恒假的路径
pub fn make_path_bool(b: bool) -> AbtResult<Abt> {
    make_path_constant(make_bool(b))
}

pub fn make_path_lambda(lambda: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathLambda(lambda))
}

pub fn make_path_default(expr: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathDefault(expr))
}

pub fn make_path_compare(op: Operations, value: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathCompare { op, value })
}

pub fn make_path_compare_value(op: Operations, value: Value) -> AbtResult<Abt> {
    make_path_compare(op, make_constant(value))
}

pub fn make_path_drop(names: BTreeSet<String>) -> Abt {
    Abt::leaf(AbtNode::PathDrop(names))
}

pub fn make_path_keep(names: BTreeSet<String>) -> Abt {
    Abt::leaf(AbtNode::PathKeep(names))
}

pub fn make_path_traverse(inner: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathTraverse(inner))
}

pub fn make_path_field(name: impl Into<String>, inner: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathField {
        name: name.into(),
        inner,
    })
}

pub fn make_path_get(name: impl Into<String>, inner: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathGet {
        name: name.into(),
        inner,
    })
}

pub fn make_path_compose_m(left: Abt, right: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathComposeM(left, right))
}

pub fn make_path_compose_a(left: Abt, right: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::PathComposeA(left, right))
}

/// 路径中的单步导航
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Get(String),
    Traverse,
}

/// 把只由 Get/Traverse 组成、以 Identity 结尾的路径分解为导航步骤
///
/// 其它形状返回 None
pub fn path_steps(path: &Abt) -> Option<Vec<PathStep>> {
    let mut steps = Vec::new();
    let mut current = path;
    loop {
        match current.node() {
            AbtNode::PathGet { name, inner } => {
                steps.push(PathStep::Get(name.clone()));
                current = inner;
            }
            AbtNode::PathTraverse(inner) => {
                steps.push(PathStep::Traverse);
                current = inner;
            }
            AbtNode::PathIdentity => return Some(steps),
            _ => return None,
        }
    }
}

/// 由导航步骤重建路径，末尾为 `leaf`
pub fn path_from_steps(steps: &[PathStep], leaf: Abt) -> AbtResult<Abt> {
    steps.iter().rev().try_fold(leaf, |inner, step| match step {
        PathStep::Get(name) => make_path_get(name.clone(), inner),
        PathStep::Traverse => make_path_traverse(inner),
    })
}

/// 把导航路径末尾的 Identity 替换为 `leaf`
pub fn path_with_leaf(path: &Abt, leaf: Abt) -> AbtResult<Abt> {
    match path.node() {
        AbtNode::PathIdentity => Ok(leaf),
        AbtNode::PathGet { name, inner } => make_path_get(name.clone(), path_with_leaf(inner, leaf)?),
        AbtNode::PathTraverse(inner) => make_path_traverse(path_with_leaf(inner, leaf)?),
        AbtNode::PathField { name, inner } => {
            make_path_field(name.clone(), path_with_leaf(inner, leaf)?)
        }
        _ => make_path_compose_m(path.clone(), leaf),
    }
}

/// 查询路径是否匹配索引路径
///
/// 索引在某一层没有遍历时说明该字段从不是数组，此时查询路径在该层的遍历可以跳过
pub fn index_path_matches(query_path: &Abt, index_path: &Abt) -> bool {
    let (Some(query), Some(index)) = (path_steps(query_path), path_steps(index_path)) else {
        return false;
    };
    let (mut qi, mut ii) = (0, 0);
    while qi < query.len() {
        match (&query[qi], index.get(ii)) {
            (q, Some(i)) if q == i => {
                qi += 1;
                ii += 1;
            }
            (PathStep::Traverse, _) => qi += 1,
            _ => return false,
        }
    }
    ii == index.len()
}
