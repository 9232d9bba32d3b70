//! 变量环境
//!
//! 收集绑定器定义的投影和表达式引用的变量。
//! 引用命名值的唯一方式是引用某个绑定器绑定的变量，未绑定的引用即为自由变量

use std::collections::BTreeSet;

use super::syntax::ProjectionName;
use super::tree::{Abt, AbtNode};

/// 变量环境
#[derive(Debug, Default, Clone)]
pub struct VariableEnvironment {
    defined: BTreeSet<ProjectionName>,
    referenced: BTreeSet<ProjectionName>,
    free: BTreeSet<ProjectionName>,
    /// 树中包含委托节点时无法得知其输出，不报告自由变量
    opaque: bool,
}

impl VariableEnvironment {
    pub fn build(abt: &Abt) -> Self {
        let mut env = VariableEnvironment::default();
        if abt.is_node() {
            env.visit_node(abt, &BTreeSet::new());
        } else {
            env.visit_expr(abt, &BTreeSet::new(), &mut Vec::new());
        }
        env
    }

    pub fn has_free_variables(&self) -> bool {
        !self.opaque && !self.free.is_empty()
    }

    pub fn free_variables(&self) -> &BTreeSet<ProjectionName> {
        &self.free
    }

    pub fn defined_projections(&self) -> &BTreeSet<ProjectionName> {
        &self.defined
    }

    pub fn referenced_variables(&self) -> &BTreeSet<ProjectionName> {
        &self.referenced
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defined.contains(name)
    }

    fn define_all(&mut self, names: &[ProjectionName]) {
        self.defined.extend(names.iter().cloned());
    }

    /// 检查若干表达式，`available` 为可见的投影
    fn check_exprs(&mut self, exprs: &[&Abt], available: &BTreeSet<ProjectionName>) {
        for expr in exprs {
            self.visit_expr(expr, available, &mut Vec::new());
        }
    }

    /// 访问关系节点，返回其输出的投影集合
    fn visit_node(&mut self, abt: &Abt, outer: &BTreeSet<ProjectionName>) -> BTreeSet<ProjectionName> {
        let union = |a: &BTreeSet<ProjectionName>, b: &BTreeSet<ProjectionName>| {
            a.union(b).cloned().collect::<BTreeSet<_>>()
        };

        match abt.node() {
            AbtNode::Scan { binder, .. }
            | AbtNode::PhysicalScan { binder, .. }
            | AbtNode::ValueScan { binder, .. }
            | AbtNode::IndexScan { binder, .. } => {
                self.define_all(binder.binder_names());
                binder.binder_names().iter().cloned().collect()
            }
            AbtNode::Seek { binder, refs, .. } => {
                self.check_exprs(&refs.children(), outer);
                self.define_all(binder.binder_names());
                binder.binder_names().iter().cloned().collect()
            }
            AbtNode::CoScan => BTreeSet::new(),
            AbtNode::MemoLogicalDelegator(_) | AbtNode::MemoPhysicalDelegator(_) => {
                self.opaque = true;
                BTreeSet::new()
            }
            AbtNode::Filter { filter, child } => {
                let below = self.visit_node(child, outer);
                self.check_exprs(&[filter], &union(&below, outer));
                below
            }
            AbtNode::Evaluation { binder, child } | AbtNode::Unwind { binder, child, .. } => {
                let below = self.visit_node(child, outer);
                let available = union(&below, outer);
                if let AbtNode::Unwind { .. } = abt.node() {
                    // 被展开的投影必须来自子节点
                    if let Some(first) = binder.binder_names().first() {
                        self.referenced.insert(first.clone());
                        if !available.contains(first) {
                            self.free.insert(first.clone());
                        }
                    }
                } else {
                    self.check_exprs(&binder.children(), &available);
                }
                self.define_all(binder.binder_names());
                let mut out = below;
                out.extend(binder.binder_names().iter().cloned());
                out
            }
            AbtNode::Sargable {
                binder, refs, child, ..
            } => {
                let below = self.visit_node(child, outer);
                let available = union(&below, outer);
                self.check_exprs(&refs.children(), &available);
                self.check_exprs(&binder.children(), &available);
                self.define_all(binder.binder_names());
                let mut out = below;
                out.extend(binder.binder_names().iter().cloned());
                out
            }
            AbtNode::RidIntersect { left, right, .. } => {
                let l = self.visit_node(left, outer);
                let r = self.visit_node(right, outer);
                union(&l, &r)
            }
            AbtNode::BinaryJoin {
                filter, left, right, ..
            } => {
                let l = self.visit_node(left, outer);
                // 右侧可以引用左侧的相关投影
                let r = self.visit_node(right, &union(&l, outer));
                let both = union(&l, &r);
                self.check_exprs(&[filter], &union(&both, outer));
                both
            }
            AbtNode::HashJoin {
                refs, left, right, ..
            }
            | AbtNode::MergeJoin {
                refs, left, right, ..
            } => {
                let l = self.visit_node(left, outer);
                let r = self.visit_node(right, outer);
                let both = union(&l, &r);
                self.check_exprs(&refs.children(), &union(&both, outer));
                both
            }
            AbtNode::Union { binder, children } => {
                for child in children {
                    self.visit_node(child, outer);
                }
                self.define_all(binder.binder_names());
                binder.binder_names().iter().cloned().collect()
            }
            AbtNode::GroupBy {
                group_keys,
                agg_binder,
                refs,
                child,
                ..
            } => {
                let below = self.visit_node(child, outer);
                let available = union(&below, outer);
                self.check_exprs(&refs.children(), &available);
                self.check_exprs(&agg_binder.children(), &available);
                self.define_all(agg_binder.binder_names());
                group_keys
                    .iter()
                    .chain(agg_binder.binder_names().iter())
                    .cloned()
                    .collect()
            }
            AbtNode::Unique { refs, child }
            | AbtNode::Collation { refs, child, .. }
            | AbtNode::Exchange { refs, child, .. } => {
                let below = self.visit_node(child, outer);
                self.check_exprs(&refs.children(), &union(&below, outer));
                below
            }
            AbtNode::Root {
                projections,
                refs,
                child,
            } => {
                let below = self.visit_node(child, outer);
                self.check_exprs(&refs.children(), &union(&below, outer));
                projections.iter().cloned().collect()
            }
            AbtNode::LimitSkip { child, .. } => self.visit_node(child, outer),
            _ => BTreeSet::new(),
        }
    }

    fn visit_expr(&mut self, abt: &Abt, available: &BTreeSet<ProjectionName>, scope: &mut Vec<ProjectionName>) {
        match abt.node() {
            AbtNode::Variable(name) => {
                self.referenced.insert(name.clone());
                if !available.contains(name) && !scope.contains(name) {
                    self.free.insert(name.clone());
                }
            }
            AbtNode::Let { var, bind, body } => {
                self.visit_expr(bind, available, scope);
                self.defined.insert(var.clone());
                scope.push(var.clone());
                self.visit_expr(body, available, scope);
                scope.pop();
            }
            AbtNode::LambdaAbstraction { var, body } => {
                self.defined.insert(var.clone());
                scope.push(var.clone());
                self.visit_expr(body, available, scope);
                scope.pop();
            }
            _ => {
                for child in abt.children() {
                    self.visit_expr(child, available, scope);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::query::abt::expr::{make_constant, make_eval_filter, make_lambda, make_let, make_variable};
    use crate::query::abt::node::{make_evaluation, make_filter, make_memo_logical_delegator, make_root, make_scan};
    use crate::query::abt::path::{make_path_compare_value, make_path_get};
    use crate::query::abt::syntax::Operations;

    fn filter_on(var: &str) -> Abt {
        let path = make_path_get(
            "a",
            make_path_compare_value(Operations::Eq, Value::Int32(1)).expect("构造应该成功"),
        )
        .expect("构造应该成功");
        make_eval_filter(path, make_variable(var)).expect("构造应该成功")
    }

    #[test]
    fn test_bound_tree_has_no_free_variables() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let filter = make_filter(filter_on("scan_0"), scan).expect("构造应该成功");
        let root = make_root(vec!["scan_0".into()], filter).expect("构造应该成功");
        let env = VariableEnvironment::build(&root);
        assert!(!env.has_free_variables());
        assert!(env.is_defined("scan_0"));
    }

    #[test]
    fn test_unbound_reference_is_free() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let filter = make_filter(filter_on("other"), scan).expect("构造应该成功");
        let env = VariableEnvironment::build(&filter);
        assert!(env.has_free_variables());
        assert!(env.free_variables().contains("other"));
    }

    #[test]
    fn test_projection_defined_above_is_not_visible_below() {
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        let filter = make_filter(filter_on("p"), scan).expect("构造应该成功");
        let eval = make_evaluation("p", make_variable("scan_0"), filter).expect("构造应该成功");
        assert!(VariableEnvironment::build(&eval).has_free_variables());
    }

    #[test]
    fn test_let_and_lambda_scopes() {
        let body = make_variable("x");
        let let_expr = make_let("x", make_constant(Value::Int32(1)), body).expect("构造应该成功");
        assert!(!VariableEnvironment::build(&let_expr).has_free_variables());

        let lambda = make_lambda("y", make_variable("z")).expect("构造应该成功");
        let env = VariableEnvironment::build(&lambda);
        assert!(env.free_variables().contains("z"));
    }

    #[test]
    fn test_delegators_make_environment_opaque() {
        let filter = make_filter(filter_on("scan_0"), make_memo_logical_delegator(0))
            .expect("构造应该成功");
        assert!(!VariableEnvironment::build(&filter).has_free_variables());
    }
}
