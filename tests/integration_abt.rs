//! ABT 表示集成测试
//!
//! 测试范围:
//! - 工厂函数的语法类别检查
//! - 绑定器约束
//! - 变量环境与自由变量
//! - 打印器的确定性
//! - 常量折叠的幂等性

mod common;

use common::assertions::{assert_err_with, assert_explain_contains, assert_ok};
use docplan::core::{AbtError, Value};
use docplan::query::abt::expr::{make_binary, make_bool, make_constant, make_eval_filter, make_eval_path, make_variable};
use docplan::query::abt::node::{
    make_binder, make_evaluation, make_filter, make_limit_skip, make_root, make_scan, make_union,
};
use docplan::query::abt::path::{
    make_path_compare_value, make_path_compose_m, make_path_constant, make_path_get, make_path_identity,
    make_path_traverse,
};
use docplan::query::abt::{Abt, ExplainGenerator, Operations, SyntaxSort, VariableEnvironment};
use docplan::query::optimizer::const_eval;

fn a_equals(value: i32) -> Abt {
    assert_ok(make_path_get(
        "a",
        assert_ok(make_path_traverse(assert_ok(make_path_compare_value(
            Operations::Eq,
            Value::Int32(value),
        )))),
    ))
}

fn filter_tree() -> Abt {
    let filter = assert_ok(make_eval_filter(a_equals(1), make_variable("scan_0")));
    let scan = assert_ok(make_scan("scan_0", "coll"));
    assert_ok(make_root(vec!["scan_0".to_string()], assert_ok(make_filter(filter, scan))))
}

// ==================== 语法类别 ====================

#[test]
fn test_filter_rejects_path_as_predicate() {
    let scan = assert_ok(make_scan("scan_0", "coll"));
    let result = make_filter(a_equals(1), scan);
    assert!(matches!(result, Err(AbtError::SortMismatch { .. })));
}

#[test]
fn test_eval_path_rejects_expression_as_path() {
    let result = make_eval_path(make_bool(true), make_variable("x"));
    assert_err_with(result, "EvalPath");
}

#[test]
fn test_relational_child_must_be_node() {
    let result = make_limit_skip(Some(1), 0, make_constant(Value::Int32(1)));
    assert!(matches!(result, Err(AbtError::SortMismatch { .. })));
}

#[test]
fn test_sorts_of_constructed_trees() {
    assert_eq!(filter_tree().sort(), SyntaxSort::Node);
    assert_eq!(a_equals(1).sort(), SyntaxSort::Path);
    assert_eq!(make_variable("x").sort(), SyntaxSort::Expression);
}

// ==================== 绑定器 ====================

#[test]
fn test_binder_arity_mismatch() {
    let result = make_binder(vec!["a".to_string(), "b".to_string()], vec![make_bool(true)]);
    assert!(matches!(result, Err(AbtError::BinderArity { names: 2, exprs: 1 })));
}

#[test]
fn test_union_binds_common_projection() {
    let left = assert_ok(make_scan("scan_0", "coll"));
    let right = assert_ok(make_scan("scan_0", "other"));
    let union = assert_ok(make_union(vec!["scan_0".to_string()], vec![left, right]));
    let env = VariableEnvironment::build(&union);
    assert!(env.is_defined("scan_0"));
    assert!(!env.has_free_variables());
}

// ==================== 变量环境 ====================

#[test]
fn test_free_variable_detected() {
    let filter = assert_ok(make_eval_filter(a_equals(1), make_variable("missing")));
    let tree = assert_ok(make_filter(filter, assert_ok(make_scan("scan_0", "coll"))));
    let env = VariableEnvironment::build(&tree);
    assert!(env.has_free_variables());
    assert!(env.free_variables().contains("missing"));
}

#[test]
fn test_evaluation_defines_projection() {
    let expr = assert_ok(make_eval_path(
        assert_ok(make_path_get("a", make_path_identity())),
        make_variable("scan_0"),
    ));
    let tree = assert_ok(make_evaluation("p_a", expr, assert_ok(make_scan("scan_0", "coll"))));
    let root = assert_ok(make_root(vec!["p_a".to_string()], tree));
    let env = VariableEnvironment::build(&root);
    assert!(!env.has_free_variables());
    assert!(env.is_defined("p_a"));
}

// ==================== 打印 ====================

#[test]
fn test_explain_is_stable() {
    let first = ExplainGenerator::explain(&filter_tree());
    let second = ExplainGenerator::explain(&filter_tree());
    assert_eq!(first, second);
    assert_explain_contains(&first, "Root [scan_0]");
    assert_explain_contains(&first, "Scan [scanDef: coll]");
    assert!(first.lines().next().is_some_and(|l| l.starts_with("Root")));
}

// ==================== 常量折叠 ====================

#[test]
fn test_const_eval_folds_and_is_idempotent() {
    let always = assert_ok(make_path_compose_m(
        assert_ok(make_path_constant(make_bool(true))),
        a_equals(1),
    ));
    let filter = assert_ok(make_eval_filter(always, make_variable("scan_0")));
    let cmp = assert_ok(make_binary(
        Operations::And,
        filter,
        assert_ok(make_binary(
            Operations::Lt,
            make_constant(Value::Int32(1)),
            make_constant(Value::Int32(2)),
        )),
    ));
    let tree = assert_ok(make_filter(cmp, assert_ok(make_scan("scan_0", "coll"))));

    let (once, changed) = assert_ok(const_eval(&tree));
    assert!(changed);
    let (twice, changed_again) = assert_ok(const_eval(&once));
    assert!(!changed_again);
    assert_eq!(once, twice);

    let text = ExplainGenerator::explain(&once);
    assert!(!text.contains("BinaryOp [Lt]"));
}
