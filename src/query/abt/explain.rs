//! ABT 打印器
//!
//! 输出确定性的缩进文本，用于调试日志和执行计划解释。
//! 单行紧凑形式同时用作备忘录中逻辑节点的去重键

use super::syntax::MemoPhysicalNodeId;
use super::tree::{Abt, AbtNode};

/// 解析物理委托节点的回调，备忘录实现此 trait 以展开获胜计划
pub trait DelegatorResolver {
    fn resolve_physical(&self, id: MemoPhysicalNodeId) -> Option<Abt>;
}

const INDENT: &str = "    ";

/// ABT 打印器
#[derive(Default)]
pub struct ExplainGenerator<'a> {
    resolver: Option<&'a dyn DelegatorResolver>,
}

impl<'a> ExplainGenerator<'a> {
    /// 打印一棵树，委托节点原样输出
    pub fn explain(abt: &Abt) -> String {
        ExplainGenerator::default().generate(abt)
    }

    /// 单行紧凑形式
    pub fn explain_compact(abt: &Abt) -> String {
        let node = abt.node();
        let mut out = label(node);
        let children = node.children();
        if !children.is_empty() {
            out.push('(');
            let parts: Vec<String> = children.into_iter().map(Self::explain_compact).collect();
            out.push_str(&parts.join(", "));
            out.push(')');
        }
        out
    }

    /// 展开物理委托节点的打印器
    pub fn with_resolver(resolver: &'a dyn DelegatorResolver) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    pub fn generate(&self, abt: &Abt) -> String {
        let mut lines = Vec::new();
        self.print(abt, 0, &mut lines);
        lines.join("\n")
    }

    fn print(&self, abt: &Abt, depth: usize, lines: &mut Vec<String>) {
        let node = abt.node();
        if let (AbtNode::MemoPhysicalDelegator(id), Some(resolver)) = (node, self.resolver) {
            if let Some(resolved) = resolver.resolve_physical(*id) {
                self.print(&resolved, depth, lines);
                return;
            }
        }

        lines.push(format!("{}{}", INDENT.repeat(depth), label(node)));
        if let AbtNode::Sargable { reqs, .. } = node {
            for (key, req) in reqs.iter() {
                lines.push(format!(
                    "{}requirement: {{{}, {}}} => {}",
                    INDENT.repeat(depth + 1),
                    key.projection,
                    Self::explain_compact(&key.path),
                    req
                ));
            }
        }
        for child in node.children() {
            self.print(child, depth + 1, lines);
        }
    }
}

fn join_names<'a, I: IntoIterator<Item = &'a String>>(names: I) -> String {
    names.into_iter().cloned().collect::<Vec<_>>().join(", ")
}

/// 节点标签：名称加方括号中的属性
fn label(node: &AbtNode) -> String {
    let name = node.kind_name();
    match node {
        AbtNode::Constant(v) => format!("{} [{}]", name, v),
        AbtNode::Variable(v) => format!("{} [{}]", name, v),
        AbtNode::UnaryOp { op, .. } | AbtNode::BinaryOp { op, .. } => format!("{} [{}]", name, op),
        AbtNode::Let { var, .. } | AbtNode::LambdaAbstraction { var, .. } => {
            format!("{} [{}]", name, var)
        }
        AbtNode::FunctionCall { name: fn_name, .. } => format!("{} [{}]", name, fn_name),
        AbtNode::PathCompare { op, .. } => format!("{} [{}]", name, op),
        AbtNode::PathDrop(names) | AbtNode::PathKeep(names) => {
            format!("{} [{}]", name, join_names(names))
        }
        AbtNode::PathField { name: field, .. } | AbtNode::PathGet { name: field, .. } => {
            format!("{} [{}]", name, field)
        }
        AbtNode::ExpressionBinder { names, .. } => format!("{} [{}]", name, join_names(names)),
        AbtNode::Scan { scan_def_name, .. } => format!("{} [scanDef: {}]", name, scan_def_name),
        AbtNode::PhysicalScan {
            field_projections,
            scan_def_name,
            ..
        } => format!(
            "{} [scanDef: {}, fields: {}]",
            name, scan_def_name, field_projections
        ),
        AbtNode::ValueScan { rows, .. } => {
            let rows: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
            format!("{} [rows: {}, values: [{}]]", name, rows.len(), rows.join(", "))
        }
        AbtNode::IndexScan {
            field_projections,
            spec,
            ..
        } => format!("{} [{}, fields: {}]", name, spec, field_projections),
        AbtNode::Seek {
            rid_projection,
            field_projections,
            scan_def_name,
            ..
        } => format!(
            "{} [scanDef: {}, rid: {}, fields: {}]",
            name, scan_def_name, rid_projection, field_projections
        ),
        AbtNode::MemoLogicalDelegator(group_id) => format!("{} [groupId: {}]", name, group_id),
        AbtNode::MemoPhysicalDelegator(id) => format!("{} [{}]", name, id),
        AbtNode::Sargable {
            scan_projection,
            target,
            ..
        } => format!("{} [{}, scan: {}]", name, target, scan_projection),
        AbtNode::RidIntersect {
            scan_projection, ..
        } => format!("{} [scan: {}]", name, scan_projection),
        AbtNode::BinaryJoin {
            join_type,
            correlated,
            ..
        } => format!(
            "{} [{}, correlated: {{{}}}]",
            name,
            join_type,
            join_names(correlated)
        ),
        AbtNode::HashJoin {
            join_type,
            left_keys,
            right_keys,
            ..
        } => format!(
            "{} [{}, keys: [{}] = [{}]]",
            name,
            join_type,
            join_names(left_keys),
            join_names(right_keys)
        ),
        AbtNode::MergeJoin {
            left_keys,
            right_keys,
            collation,
            ..
        } => {
            let ops: Vec<String> = collation.iter().map(|c| c.to_string()).collect();
            format!(
                "{} [keys: [{}] = [{}], collation: [{}]]",
                name,
                join_names(left_keys),
                join_names(right_keys),
                ops.join(", ")
            )
        }
        AbtNode::GroupBy {
            kind, group_keys, ..
        } => format!("{} [{}, keys: [{}]]", name, kind, join_names(group_keys)),
        AbtNode::Unwind {
            retain_non_arrays, ..
        } => format!("{} [retainNonArrays: {}]", name, retain_non_arrays),
        AbtNode::Collation { spec, .. } => {
            let parts: Vec<String> = spec.iter().map(|(p, op)| format!("{}: {}", p, op)).collect();
            format!("{} [{}]", name, parts.join(", "))
        }
        AbtNode::LimitSkip { limit, skip, .. } => match limit {
            Some(limit) => format!("{} [limit: {}, skip: {}]", name, limit, skip),
            None => format!("{} [limit: (none), skip: {}]", name, skip),
        },
        AbtNode::Exchange {
            distribution,
            preserve_sort,
            ..
        } => format!(
            "{} [{}, preserveSort: {}]",
            name, distribution, preserve_sort
        ),
        AbtNode::Root { projections, .. } => format!("{} [{}]", name, join_names(projections)),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::query::abt::expr::{make_eval_filter, make_variable};
    use crate::query::abt::node::{make_filter, make_memo_physical_delegator, make_root, make_scan};
    use crate::query::abt::path::{make_path_compare_value, make_path_get, make_path_traverse};
    use crate::query::abt::syntax::Operations;

    fn sample_tree() -> Abt {
        let path = make_path_get(
            "a",
            make_path_traverse(
                make_path_compare_value(Operations::Eq, Value::Int32(5)).expect("构造应该成功"),
            )
            .expect("构造应该成功"),
        )
        .expect("构造应该成功");
        let filter = make_eval_filter(path, make_variable("scan_0")).expect("构造应该成功");
        let scan = make_scan("scan_0", "coll").expect("构造应该成功");
        make_root(
            vec!["scan_0".into()],
            make_filter(filter, scan).expect("构造应该成功"),
        )
        .expect("构造应该成功")
    }

    #[test]
    fn test_explain_is_deterministic_and_indented() {
        let tree = sample_tree();
        let text = ExplainGenerator::explain(&tree);
        assert_eq!(text, ExplainGenerator::explain(&tree.clone()));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Root [scan_0]");
        assert!(lines.contains(&"    Filter"));
        assert!(lines.iter().any(|l| l.trim() == "PathCompare [Eq]"));
        assert!(lines.iter().any(|l| l.trim() == "Scan [scanDef: coll]"));
    }

    #[test]
    fn test_compact_form_distinguishes_trees() {
        let a = make_scan("scan_0", "coll").expect("构造应该成功");
        let b = make_scan("scan_0", "other").expect("构造应该成功");
        assert_eq!(
            ExplainGenerator::explain_compact(&a),
            "Scan [scanDef: coll](Binder [scan_0](Source))"
        );
        assert_ne!(
            ExplainGenerator::explain_compact(&a),
            ExplainGenerator::explain_compact(&b)
        );
    }

    struct FixedResolver(Abt);

    impl DelegatorResolver for FixedResolver {
        fn resolve_physical(&self, _id: MemoPhysicalNodeId) -> Option<Abt> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_resolver_expands_physical_delegators() {
        let delegator = make_memo_physical_delegator(MemoPhysicalNodeId {
            group_id: 1,
            index: 0,
        });
        let plain = ExplainGenerator::explain(&delegator);
        assert_eq!(plain, "MemoPhysicalDelegator [groupId: 1, index: 0]");

        let resolver = FixedResolver(make_scan("scan_0", "coll").expect("构造应该成功"));
        let expanded = ExplainGenerator::with_resolver(&resolver).generate(&delegator);
        assert!(expanded.starts_with("Scan [scanDef: coll]"));
    }
}
