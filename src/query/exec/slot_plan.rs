//! 槽位计划
//!
//! 执行引擎消费的计划形式：每个阶段把值写入编号槽位，表达式通过槽位读取输入

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::core::Value;
use crate::query::abt::{CollationOp, Operations, ProjectionName};
use crate::query::metadata::index_bounds::IntervalRequirement;

/// 槽位编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// 槽位编号生成器
#[derive(Debug, Default)]
pub struct SlotIdGenerator {
    next: u32,
}

impl SlotIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self) -> SlotId {
        let id = SlotId(self.next);
        self.next += 1;
        id
    }

    /// 已分配的槽位数
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

/// 投影名到槽位的映射
pub type SlotVarMap = BTreeMap<ProjectionName, SlotId>;

/// 槽位表达式
#[derive(Debug, Clone, PartialEq)]
pub enum SlotExpr {
    Constant(Value),
    Slot(SlotId),
    /// Lambda 或 Let 引入的局部变量
    Local(String),
    Unary {
        op: Operations,
        arg: Box<SlotExpr>,
    },
    Binary {
        op: Operations,
        left: Box<SlotExpr>,
        right: Box<SlotExpr>,
    },
    If {
        cond: Box<SlotExpr>,
        then_branch: Box<SlotExpr>,
        else_branch: Box<SlotExpr>,
    },
    Let {
        name: String,
        bind: Box<SlotExpr>,
        body: Box<SlotExpr>,
    },
    Lambda {
        param: String,
        body: Box<SlotExpr>,
    },
    FunctionCall {
        name: String,
        args: Vec<SlotExpr>,
    },
}

impl SlotExpr {
    pub fn call(name: &str, args: Vec<SlotExpr>) -> Self {
        SlotExpr::FunctionCall {
            name: name.to_string(),
            args,
        }
    }

    pub fn binary(op: Operations, left: SlotExpr, right: SlotExpr) -> Self {
        SlotExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn string(s: &str) -> Self {
        SlotExpr::Constant(Value::str(s))
    }
}

impl fmt::Display for SlotExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotExpr::Constant(v) => write!(f, "{}", v),
            SlotExpr::Slot(id) => write!(f, "{}", id),
            SlotExpr::Local(name) => write!(f, "{}", name),
            SlotExpr::Unary { op, arg } => write!(f, "{}({})", op, arg),
            SlotExpr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            SlotExpr::If {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "if({}, {}, {})", cond, then_branch, else_branch),
            SlotExpr::Let { name, bind, body } => write!(f, "let {} = {} in {}", name, bind, body),
            SlotExpr::Lambda { param, body } => write!(f, "\\{}. {}", param, body),
            SlotExpr::FunctionCall { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
        }
    }
}

/// 扫描的数据源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSource {
    pub scan_def_name: String,
    pub database: Option<String>,
    pub collection: Option<String>,
    pub uuid: Option<String>,
}

impl fmt::Display for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.database, &self.collection) {
            (Some(db), Some(coll)) => write!(f, "{}.{}", db, coll),
            _ => write!(f, "{}", self.scan_def_name),
        }
    }
}

/// 槽位计划阶段
#[derive(Debug, Clone, PartialEq)]
pub enum SlotStage {
    Scan {
        source: ScanSource,
        record: SlotId,
        rid: Option<SlotId>,
    },
    IndexScan {
        source: ScanSource,
        index_name: String,
        /// 每个索引字段一个区间
        intervals: Vec<IntervalRequirement>,
        reverse: bool,
        rid: SlotId,
    },
    /// 按记录标识取回文档
    Seek {
        source: ScanSource,
        rid_input: SlotId,
        record: SlotId,
    },
    Values {
        slots: Vec<SlotId>,
        rows: Vec<Vec<Value>>,
    },
    CoScan,
    Filter {
        predicate: SlotExpr,
        child: Box<SlotStage>,
    },
    Project {
        bindings: Vec<(SlotId, SlotExpr)>,
        child: Box<SlotStage>,
    },
    /// 嵌套循环连接，内侧可以读取外侧的相关槽位
    LoopJoin {
        outer: Box<SlotStage>,
        inner: Box<SlotStage>,
        correlated: Vec<SlotId>,
        predicate: Option<SlotExpr>,
    },
    HashJoin {
        outer: Box<SlotStage>,
        inner: Box<SlotStage>,
        outer_keys: Vec<SlotId>,
        inner_keys: Vec<SlotId>,
    },
    MergeJoin {
        outer: Box<SlotStage>,
        inner: Box<SlotStage>,
        outer_keys: Vec<SlotId>,
        inner_keys: Vec<SlotId>,
        directions: Vec<CollationOp>,
    },
    Union {
        inputs: Vec<(SlotStage, Vec<SlotId>)>,
        outputs: Vec<SlotId>,
    },
    HashAgg {
        group_by: Vec<SlotId>,
        aggregates: Vec<(SlotId, SlotExpr)>,
        child: Box<SlotStage>,
    },
    Unwind {
        input: SlotId,
        output: SlotId,
        index: SlotId,
        preserve_non_arrays: bool,
        child: Box<SlotStage>,
    },
    Unique {
        keys: Vec<SlotId>,
        child: Box<SlotStage>,
    },
    Sort {
        keys: Vec<(SlotId, CollationOp)>,
        child: Box<SlotStage>,
    },
    Limit {
        limit: Option<u64>,
        skip: u64,
        child: Box<SlotStage>,
    },
    /// 把分区的结果汇集到一处
    Exchange {
        child: Box<SlotStage>,
    },
}

fn slots(ids: &[SlotId]) -> String {
    ids.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

impl SlotStage {
    /// 阶段名称
    pub fn name(&self) -> &'static str {
        match self {
            SlotStage::Scan { .. } => "scan",
            SlotStage::IndexScan { .. } => "ixscan",
            SlotStage::Seek { .. } => "seek",
            SlotStage::Values { .. } => "values",
            SlotStage::CoScan => "coscan",
            SlotStage::Filter { .. } => "filter",
            SlotStage::Project { .. } => "project",
            SlotStage::LoopJoin { .. } => "nlj",
            SlotStage::HashJoin { .. } => "hj",
            SlotStage::MergeJoin { .. } => "mj",
            SlotStage::Union { .. } => "union",
            SlotStage::HashAgg { .. } => "group",
            SlotStage::Unwind { .. } => "unwind",
            SlotStage::Unique { .. } => "unique",
            SlotStage::Sort { .. } => "sort",
            SlotStage::Limit { .. } => "limit",
            SlotStage::Exchange { .. } => "exchange",
        }
    }

    /// 子阶段，按打印顺序
    pub fn children(&self) -> Vec<&SlotStage> {
        match self {
            SlotStage::Scan { .. }
            | SlotStage::IndexScan { .. }
            | SlotStage::Seek { .. }
            | SlotStage::Values { .. }
            | SlotStage::CoScan => Vec::new(),
            SlotStage::Filter { child, .. }
            | SlotStage::Project { child, .. }
            | SlotStage::HashAgg { child, .. }
            | SlotStage::Unwind { child, .. }
            | SlotStage::Unique { child, .. }
            | SlotStage::Sort { child, .. }
            | SlotStage::Limit { child, .. }
            | SlotStage::Exchange { child } => vec![child.as_ref()],
            SlotStage::LoopJoin { outer, inner, .. }
            | SlotStage::HashJoin { outer, inner, .. }
            | SlotStage::MergeJoin { outer, inner, .. } => vec![outer.as_ref(), inner.as_ref()],
            SlotStage::Union { inputs, .. } => inputs.iter().map(|(stage, _)| stage).collect(),
        }
    }

    fn describe(&self) -> String {
        match self {
            SlotStage::Scan { source, record, rid } => match rid {
                Some(rid) => format!("scan {} record: {}, rid: {}", source, record, rid),
                None => format!("scan {} record: {}", source, record),
            },
            SlotStage::IndexScan {
                source,
                index_name,
                intervals,
                reverse,
                rid,
            } => {
                let intervals: Vec<String> = intervals.iter().map(|i| i.to_string()).collect();
                format!(
                    "ixscan {} index: {}, bounds: [{}], reverse: {}, rid: {}",
                    source,
                    index_name,
                    intervals.join(", "),
                    reverse,
                    rid
                )
            }
            SlotStage::Seek {
                source,
                rid_input,
                record,
            } => format!("seek {} rid: {}, record: {}", source, rid_input, record),
            SlotStage::Values { slots: ids, rows } => {
                format!("values [{}] rows: {}", slots(ids), rows.len())
            }
            SlotStage::CoScan => "coscan".to_string(),
            SlotStage::Filter { predicate, .. } => format!("filter {}", predicate),
            SlotStage::Project { bindings, .. } => {
                let parts: Vec<String> = bindings.iter().map(|(s, e)| format!("{} = {}", s, e)).collect();
                format!("project [{}]", parts.join(", "))
            }
            SlotStage::LoopJoin {
                correlated,
                predicate,
                ..
            } => match predicate {
                Some(p) => format!("nlj correlated: [{}], predicate: {}", slots(correlated), p),
                None => format!("nlj correlated: [{}]", slots(correlated)),
            },
            SlotStage::HashJoin {
                outer_keys,
                inner_keys,
                ..
            } => format!("hj outer: [{}], inner: [{}]", slots(outer_keys), slots(inner_keys)),
            SlotStage::MergeJoin {
                outer_keys,
                inner_keys,
                directions,
                ..
            } => {
                let dirs: Vec<String> = directions.iter().map(|d| d.to_string()).collect();
                format!(
                    "mj outer: [{}], inner: [{}], directions: [{}]",
                    slots(outer_keys),
                    slots(inner_keys),
                    dirs.join(", ")
                )
            }
            SlotStage::Union { inputs, outputs } => {
                let ins: Vec<String> = inputs.iter().map(|(_, s)| format!("[{}]", slots(s))).collect();
                format!("union [{}] <- {}", slots(outputs), ins.join(" "))
            }
            SlotStage::HashAgg {
                group_by,
                aggregates,
                ..
            } => {
                let aggs: Vec<String> = aggregates.iter().map(|(s, e)| format!("{} = {}", s, e)).collect();
                format!("group [{}] [{}]", slots(group_by), aggs.join(", "))
            }
            SlotStage::Unwind {
                input,
                output,
                index,
                preserve_non_arrays,
                ..
            } => format!(
                "unwind {} -> {}, index: {}, preserve: {}",
                input, output, index, preserve_non_arrays
            ),
            SlotStage::Unique { keys, .. } => format!("unique [{}]", slots(keys)),
            SlotStage::Sort { keys, .. } => {
                let parts: Vec<String> = keys.iter().map(|(s, op)| format!("{} {}", s, op)).collect();
                format!("sort [{}]", parts.join(", "))
            }
            SlotStage::Limit { limit, skip, .. } => match limit {
                Some(limit) => format!("limit {} skip {}", limit, skip),
                None => format!("limit (none) skip {}", skip),
            },
            SlotStage::Exchange { .. } => "exchange".to_string(),
        }
    }

    /// 确定性的缩进打印
    pub fn explain(&self) -> String {
        let mut lines = Vec::new();
        self.print(0, &mut lines);
        lines.join("\n")
    }

    fn print(&self, depth: usize, lines: &mut Vec<String>) {
        lines.push(format!("{}[{}] {}", "  ".repeat(depth), depth, self.describe()));
        for child in self.children() {
            child.print(depth + 1, lines);
        }
    }
}

/// 降级结果
#[derive(Debug, Clone, PartialEq)]
pub struct LoweredPlan {
    pub root: SlotStage,
    /// 所有输出投影的槽位，不会为空
    pub slot_map: SlotVarMap,
    /// 根投影所在的结果槽位
    pub result_slot: SlotId,
}

impl LoweredPlan {
    pub fn explain(&self) -> String {
        format!("{}\nresult: {}", self.root.explain(), self.result_slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_ids_are_sequential() {
        let mut ids = SlotIdGenerator::new();
        assert_eq!(ids.generate(), SlotId(0));
        assert_eq!(ids.generate(), SlotId(1));
        assert_eq!(ids.allocated(), 2);
    }

    #[test]
    fn test_explain_is_indented() {
        let source = ScanSource {
            scan_def_name: "coll".to_string(),
            database: Some("test".to_string()),
            collection: Some("coll".to_string()),
            uuid: None,
        };
        let stage = SlotStage::Limit {
            limit: Some(5),
            skip: 0,
            child: Box::new(SlotStage::Scan {
                source,
                record: SlotId(0),
                rid: None,
            }),
        };
        assert_eq!(stage.explain(), "[0] limit 5 skip 0\n  [1] scan test.coll record: s0");
    }

    #[test]
    fn test_expr_display() {
        let expr = SlotExpr::binary(
            Operations::Eq,
            SlotExpr::call("getField", vec![SlotExpr::Slot(SlotId(1)), SlotExpr::string("a")]),
            SlotExpr::Constant(Value::Int32(1)),
        );
        assert_eq!(expr.to_string(), "(getField(s1, \"a\") Eq 1)");
    }
}
