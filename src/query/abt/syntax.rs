//! ABT 基础语法定义
//!
//! 语法类别、操作符以及关系节点共用的小型枚举

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// 投影名称
pub type ProjectionName = String;

/// 备忘录分组编号
pub type GroupId = usize;

/// 语法类别
///
/// 表达式与路径两类节点永远不能互换，工厂函数在构造时检查
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxSort {
    Expression,
    Path,
    Node,
    Binder,
    References,
    Blackhole,
}

impl fmt::Display for SyntaxSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyntaxSort::Expression => "Expression",
            SyntaxSort::Path => "Path",
            SyntaxSort::Node => "Node",
            SyntaxSort::Binder => "Binder",
            SyntaxSort::References => "References",
            SyntaxSort::Blackhole => "Blackhole",
        };
        write!(f, "{}", name)
    }
}

/// 一元与二元操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operations {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Cmp3w,
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    And,
    Or,
    Not,
    Neg,
}

impl Operations {
    pub fn is_unary(&self) -> bool {
        matches!(self, Operations::Not | Operations::Neg)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operations::Eq
                | Operations::Neq
                | Operations::Lt
                | Operations::Lte
                | Operations::Gt
                | Operations::Gte
                | Operations::Cmp3w
        )
    }
}

impl fmt::Display for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CollationOp {
    Ascending,
    Descending,
    Clustered,
}

impl fmt::Display for CollationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 数据分布类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DistributionType {
    Centralized,
    Replicated,
    RoundRobin,
    HashPartitioning,
    RangePartitioning,
    UnknownPartitioning,
}

impl DistributionType {
    /// 只有哈希分区和范围分区可以携带分区路径
    pub fn allows_paths(&self) -> bool {
        matches!(
            self,
            DistributionType::HashPartitioning | DistributionType::RangePartitioning
        )
    }
}

impl fmt::Display for DistributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 分组聚合的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupNodeType {
    Complete,
    Local,
    Global,
}

impl fmt::Display for GroupNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 可下推谓词节点的目标
///
/// `Index` 只产出记录标识，`Seek` 只按记录标识取文档，`Complete` 产出完整结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexReqTarget {
    Index,
    Seek,
    Complete,
}

impl fmt::Display for IndexReqTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 物理扫描的字段投影映射
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldProjectionMap {
    pub rid_projection: Option<ProjectionName>,
    pub root_projection: Option<ProjectionName>,
    /// 字段名 -> 投影名
    pub field_projections: BTreeMap<String, ProjectionName>,
}

impl FieldProjectionMap {
    pub fn with_root(root: impl Into<ProjectionName>) -> Self {
        Self {
            root_projection: Some(root.into()),
            ..Default::default()
        }
    }

    pub fn with_rid(rid: impl Into<ProjectionName>) -> Self {
        Self {
            rid_projection: Some(rid.into()),
            ..Default::default()
        }
    }

    /// 按 rid、root、字段的顺序列出所有投影
    pub fn projections(&self) -> Vec<ProjectionName> {
        let mut result = Vec::new();
        if let Some(rid) = &self.rid_projection {
            result.push(rid.clone());
        }
        if let Some(root) = &self.root_projection {
            result.push(root.clone());
        }
        result.extend(self.field_projections.values().cloned());
        result
    }

    pub fn is_empty(&self) -> bool {
        self.rid_projection.is_none()
            && self.root_projection.is_none()
            && self.field_projections.is_empty()
    }
}

impl fmt::Display for FieldProjectionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(rid) = &self.rid_projection {
            parts.push(format!("<rid>: {}", rid));
        }
        if let Some(root) = &self.root_projection {
            parts.push(format!("<root>: {}", root));
        }
        for (field, proj) in &self.field_projections {
            parts.push(format!("{}: {}", field, proj));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// 备忘录中物理节点的编号：分组编号加该分组内物理结果的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MemoPhysicalNodeId {
    pub group_id: GroupId,
    pub index: usize,
}

impl fmt::Display for MemoPhysicalNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "groupId: {}, index: {}", self.group_id, self.index)
    }
}
