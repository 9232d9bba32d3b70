//! 表达式工厂函数

use super::syntax::{Operations, ProjectionName};
use super::tree::{Abt, AbtNode};
use crate::core::error::AbtResult;
use crate::core::Value;

pub fn make_constant(value: Value) -> Abt {
    Abt::leaf(AbtNode::Constant(value))
}

pub fn make_bool(b: bool) -> Abt {
    make_constant(Value::Bool(b))
}

pub fn make_variable(name: impl Into<ProjectionName>) -> Abt {
    Abt::leaf(AbtNode::Variable(name.into()))
}

pub fn make_source() -> Abt {
    Abt::leaf(AbtNode::Source)
}

pub fn make_unary(op: Operations, arg: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::UnaryOp { op, arg })
}

pub fn make_binary(op: Operations, left: Abt, right: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::BinaryOp { op, left, right })
}

pub fn make_if(cond: Abt, then_branch: Abt, else_branch: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::If {
        cond,
        then_branch,
        else_branch,
    })
}

pub fn make_let(var: impl Into<ProjectionName>, bind: Abt, body: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::Let {
        var: var.into(),
        bind,
        body,
    })
}

pub fn make_lambda(var: impl Into<ProjectionName>, body: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::LambdaAbstraction {
        var: var.into(),
        body,
    })
}

pub fn make_lambda_application(lambda: Abt, arg: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::LambdaApplication { lambda, arg })
}

pub fn make_function_call(name: impl Into<String>, args: Vec<Abt>) -> AbtResult<Abt> {
    Abt::make(AbtNode::FunctionCall {
        name: name.into(),
        args,
    })
}

pub fn make_eval_path(path: Abt, input: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::EvalPath { path, input })
}

pub fn make_eval_filter(path: Abt, input: Abt) -> AbtResult<Abt> {
    Abt::make(AbtNode::EvalFilter { path, input })
}

/// 把多个布尔表达式用 And 连接，空列表得到 true
pub fn make_conjunction(exprs: Vec<Abt>) -> AbtResult<Abt> {
    let mut iter = exprs.into_iter();
    match iter.next() {
        None => Ok(make_bool(true)),
        Some(first) => iter.try_fold(first, |acc, e| make_binary(Operations::And, acc, e)),
    }
}
