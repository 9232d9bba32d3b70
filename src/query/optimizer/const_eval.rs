//! 常量折叠
//!
//! 在集成进备忘录之前化简表达式和路径：常量布尔运算、常量比较、
//! 条件表达式以及作用在常量路径上的求值

use log::debug;

use crate::core::error::AbtResult;
use crate::core::Value;
use crate::query::abt::expr::{make_bool, make_constant};
use crate::query::abt::{Abt, AbtNode, Operations};

/// 折叠整棵树，返回新树和是否发生了变化
pub fn const_eval(tree: &Abt) -> AbtResult<(Abt, bool)> {
    let mut changed = false;
    let result = tree.transform_bottom_up(&mut |node: Abt| {
        let folded = fold_node(&node);
        match folded {
            Some(replacement) => {
                changed = true;
                Ok(replacement)
            }
            None => Ok(node),
        }
    })?;
    if changed {
        debug!("常量折叠改写了输入树");
    }
    Ok((result, changed))
}

fn path_constant_bool(path: &Abt, expected: bool) -> bool {
    matches!(path.node(), AbtNode::PathConstant(c) if c.is_constant_bool(expected))
}

fn fold_comparison(op: Operations, left: &Value, right: &Value) -> Option<Value> {
    let ord = left.cmp(right);
    let result = match op {
        Operations::Eq => ord.is_eq(),
        Operations::Neq => ord.is_ne(),
        Operations::Lt => ord.is_lt(),
        Operations::Lte => ord.is_le(),
        Operations::Gt => ord.is_gt(),
        Operations::Gte => ord.is_ge(),
        Operations::Cmp3w => return Some(Value::Int32(left.compare3w(right))),
        _ => return None,
    };
    Some(Value::Bool(result))
}

fn fold_node(node: &Abt) -> Option<Abt> {
    match node.node() {
        // 常量路径忽略输入
        AbtNode::EvalFilter { path, .. } | AbtNode::EvalPath { path, .. } => match path.node() {
            AbtNode::PathConstant(c) if c.as_constant().is_some() => Some(c.clone()),
            _ => None,
        },

        AbtNode::UnaryOp {
            op: Operations::Not,
            arg,
        } => arg.as_constant().and_then(Value::as_bool).map(|b| make_bool(!b)),

        AbtNode::BinaryOp {
            op: Operations::And,
            left,
            right,
        } => {
            if left.is_constant_bool(false) || right.is_constant_bool(false) {
                Some(make_bool(false))
            } else if left.is_constant_bool(true) {
                Some(right.clone())
            } else if right.is_constant_bool(true) {
                Some(left.clone())
            } else {
                None
            }
        }
        AbtNode::BinaryOp {
            op: Operations::Or,
            left,
            right,
        } => {
            if left.is_constant_bool(true) || right.is_constant_bool(true) {
                Some(make_bool(true))
            } else if left.is_constant_bool(false) {
                Some(right.clone())
            } else if right.is_constant_bool(false) {
                Some(left.clone())
            } else {
                None
            }
        }
        AbtNode::BinaryOp { op, left, right } if op.is_comparison() => {
            let (l, r) = (left.as_constant()?, right.as_constant()?);
            fold_comparison(*op, l, r).map(make_constant)
        }

        AbtNode::If {
            cond,
            then_branch,
            else_branch,
        } => {
            if cond.is_constant_bool(true) {
                Some(then_branch.clone())
            } else if cond.is_constant_bool(false) {
                Some(else_branch.clone())
            } else {
                None
            }
        }

        AbtNode::PathComposeM(left, right) => {
            if path_constant_bool(left, true) {
                Some(right.clone())
            } else if path_constant_bool(right, true) {
                Some(left.clone())
            } else {
                None
            }
        }
        AbtNode::PathComposeA(left, right) => {
            if path_constant_bool(left, false) {
                Some(right.clone())
            } else if path_constant_bool(right, false) {
                Some(left.clone())
            } else {
                None
            }
        }
        _ => None,
    }
}
