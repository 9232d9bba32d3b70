//! 索引边界与部分模式需求
//!
//! 区间以常量值为边界，使用值的规范全序比较；
//! 需求中的区间列表表示析取，空列表表示不可满足

use std::fmt;

use crate::core::Value;
use crate::query::abt::path::{path_steps, PathStep};
use crate::query::abt::{Abt, ExplainGenerator, Operations, ProjectionName};

/// 区间的一端
#[derive(Debug, Clone, PartialEq)]
pub struct BoundRequirement {
    inclusive: bool,
    bound: Value,
}

impl BoundRequirement {
    pub fn new(inclusive: bool, bound: Value) -> Self {
        Self { inclusive, bound }
    }

    pub fn minus_inf() -> Self {
        Self::new(true, Value::MinKey)
    }

    pub fn plus_inf() -> Self {
        Self::new(true, Value::MaxKey)
    }

    pub fn is_minus_inf(&self) -> bool {
        self.inclusive && matches!(self.bound, Value::MinKey)
    }

    pub fn is_plus_inf(&self) -> bool {
        self.inclusive && matches!(self.bound, Value::MaxKey)
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }

    pub fn bound(&self) -> &Value {
        &self.bound
    }
}

/// 单个区间
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRequirement {
    low: BoundRequirement,
    high: BoundRequirement,
}

impl IntervalRequirement {
    pub fn new(low: BoundRequirement, high: BoundRequirement) -> Self {
        Self { low, high }
    }

    pub fn fully_open() -> Self {
        Self::new(BoundRequirement::minus_inf(), BoundRequirement::plus_inf())
    }

    /// 点区间 [v, v]
    pub fn equals(value: Value) -> Self {
        Self::new(
            BoundRequirement::new(true, value.clone()),
            BoundRequirement::new(true, value),
        )
    }

    /// 比较操作对应的区间，`Neq` 与 `Cmp3w` 没有单区间形式
    pub fn from_comparison(op: Operations, value: Value) -> Option<Self> {
        let interval = match op {
            Operations::Eq => Self::equals(value),
            Operations::Lt => Self::new(BoundRequirement::minus_inf(), BoundRequirement::new(false, value)),
            Operations::Lte => Self::new(BoundRequirement::minus_inf(), BoundRequirement::new(true, value)),
            Operations::Gt => Self::new(BoundRequirement::new(false, value), BoundRequirement::plus_inf()),
            Operations::Gte => Self::new(BoundRequirement::new(true, value), BoundRequirement::plus_inf()),
            _ => return None,
        };
        Some(interval)
    }

    pub fn low(&self) -> &BoundRequirement {
        &self.low
    }

    pub fn high(&self) -> &BoundRequirement {
        &self.high
    }

    pub fn is_fully_open(&self) -> bool {
        self.low.is_minus_inf() && self.high.is_plus_inf()
    }

    pub fn is_equality(&self) -> bool {
        self.low.inclusive && self.high.inclusive && self.low.bound == self.high.bound
    }

    pub fn is_empty(&self) -> bool {
        match self.low.bound.cmp(&self.high.bound) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => !(self.low.inclusive && self.high.inclusive),
            std::cmp::Ordering::Less => false,
        }
    }

    /// 区间交，结果为空时返回 None
    pub fn intersect(&self, other: &IntervalRequirement) -> Option<IntervalRequirement> {
        let low = match self.low.bound.cmp(&other.low.bound) {
            std::cmp::Ordering::Greater => self.low.clone(),
            std::cmp::Ordering::Less => other.low.clone(),
            std::cmp::Ordering::Equal => {
                BoundRequirement::new(self.low.inclusive && other.low.inclusive, self.low.bound.clone())
            }
        };
        let high = match self.high.bound.cmp(&other.high.bound) {
            std::cmp::Ordering::Less => self.high.clone(),
            std::cmp::Ordering::Greater => other.high.clone(),
            std::cmp::Ordering::Equal => {
                BoundRequirement::new(self.high.inclusive && other.high.inclusive, self.high.bound.clone())
            }
        };
        let result = IntervalRequirement::new(low, high);
        (!result.is_empty()).then_some(result)
    }

    /// `other` 是否完全落在本区间内
    pub fn contains(&self, other: &IntervalRequirement) -> bool {
        let low_ok = match self.low.bound.cmp(&other.low.bound) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.low.inclusive || !other.low.inclusive,
            std::cmp::Ordering::Greater => false,
        };
        let high_ok = match self.high.bound.cmp(&other.high.bound) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.high.inclusive || !other.high.inclusive,
            std::cmp::Ordering::Less => false,
        };
        low_ok && high_ok
    }
}

impl fmt::Display for IntervalRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}, {}{}",
            if self.low.inclusive { "[" } else { "(" },
            self.low.bound,
            self.high.bound,
            if self.high.inclusive { "]" } else { ")" }
        )
    }
}

/// 两个析取区间列表的交
pub fn intersect_disjunctions(
    left: &[IntervalRequirement],
    right: &[IntervalRequirement],
) -> Vec<IntervalRequirement> {
    let mut result: Vec<IntervalRequirement> = Vec::new();
    for l in left {
        for r in right {
            if let Some(i) = l.intersect(r) {
                if !result.contains(&i) {
                    result.push(i);
                }
            }
        }
    }
    result
}

/// 两个析取区间列表的并
pub fn union_disjunctions(
    left: &[IntervalRequirement],
    right: &[IntervalRequirement],
) -> Vec<IntervalRequirement> {
    let mut result = left.to_vec();
    for r in right {
        if !result.contains(r) {
            result.push(r.clone());
        }
    }
    result
}

/// 需求键：投影加上作用于其上的导航路径
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSchemaKey {
    pub projection: ProjectionName,
    pub path: Abt,
}

impl PartialSchemaKey {
    pub fn new(projection: impl Into<ProjectionName>, path: Abt) -> Self {
        Self {
            projection: projection.into(),
            path,
        }
    }
}

/// 单个键上的需求
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSchemaRequirement {
    /// 需要时把路径的值绑定到这个投影
    pub bound_projection: Option<ProjectionName>,
    pub intervals: Vec<IntervalRequirement>,
}

impl PartialSchemaRequirement {
    pub fn new(bound_projection: Option<ProjectionName>, intervals: Vec<IntervalRequirement>) -> Self {
        Self {
            bound_projection,
            intervals,
        }
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn is_fully_open(&self) -> bool {
        self.intervals.iter().any(IntervalRequirement::is_fully_open)
    }

    pub fn is_equality_only(&self) -> bool {
        !self.intervals.is_empty() && self.intervals.iter().all(IntervalRequirement::is_equality)
    }
}

impl fmt::Display for PartialSchemaRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.intervals.iter().map(|i| i.to_string()).collect();
        write!(f, "{{{}}}", parts.join(" U "))?;
        if let Some(bound) = &self.bound_projection {
            write!(f, " bound: {}", bound)?;
        }
        Ok(())
    }
}

/// 部分模式需求集合，条目之间是合取关系
///
/// 以结构相等为键，保持插入顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialSchemaRequirements {
    entries: Vec<(PartialSchemaKey, PartialSchemaRequirement)>,
}

impl PartialSchemaRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartialSchemaKey, &PartialSchemaRequirement)> {
        self.entries.iter().map(|(k, r)| (k, r))
    }

    pub fn get(&self, key: &PartialSchemaKey) -> Option<&PartialSchemaRequirement> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    /// 合取一个需求，与已有的同键需求求交
    pub fn conjoin(&mut self, key: PartialSchemaKey, req: PartialSchemaRequirement) {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.intervals = intersect_disjunctions(&existing.intervals, &req.intervals);
            if existing.bound_projection.is_none() {
                existing.bound_projection = req.bound_projection;
            }
        } else {
            self.entries.push((key, req));
        }
    }

    /// 合取来自另一个独立谓词的需求
    ///
    /// 两个谓词只共享键路径的前 `shared_depth` 个导航步骤。之后的路径上如果还有遍历，
    /// 两侧可能由数组中的不同元素满足，此时同键需求保留为独立条目而不求交
    pub fn conjoin_all_independent(&mut self, other: PartialSchemaRequirements, shared_depth: usize) {
        for (key, req) in other.entries {
            if !traverses_beyond(&key.path, shared_depth) {
                self.conjoin(key, req);
            } else if !self.entries.iter().any(|(k, r)| *k == key && *r == req) {
                self.entries.push((key, req));
            }
        }
    }

    pub fn has_empty_interval(&self) -> bool {
        self.entries.iter().any(|(_, r)| r.is_unsatisfiable())
    }

    pub fn has_bound_projections(&self) -> bool {
        self.entries.iter().any(|(_, r)| r.bound_projection.is_some())
    }

    /// 按下标把条目拆成两组
    pub fn partition(&self, left_indexes: &[usize]) -> (PartialSchemaRequirements, PartialSchemaRequirements) {
        let mut left = PartialSchemaRequirements::new();
        let mut right = PartialSchemaRequirements::new();
        for (i, (key, req)) in self.entries.iter().enumerate() {
            if left_indexes.contains(&i) {
                left.entries.push((key.clone(), req.clone()));
            } else {
                right.entries.push((key.clone(), req.clone()));
            }
        }
        (left, right)
    }

    /// 只保留指定下标的条目
    pub fn select(&self, indexes: &[usize]) -> PartialSchemaRequirements {
        self.partition(indexes).0
    }

    /// 本需求集合是否蕴含 `other`
    ///
    /// 按路径比较，忽略投影名；`other` 的每个条目都必须有一个同路径条目，
    /// 其每个区间都落在 `other` 的某个区间内
    pub fn implies(&self, other: &PartialSchemaRequirements) -> bool {
        other.iter().all(|(other_key, other_req)| {
            self.entries.iter().any(|(key, req)| {
                key.path == other_key.path
                    && !req.intervals.is_empty()
                    && req
                        .intervals
                        .iter()
                        .all(|i| other_req.intervals.iter().any(|o| o.contains(i)))
            })
        })
    }
}

impl fmt::Display for PartialSchemaRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, r)| {
                format!(
                    "{{{}, {}}} => {}",
                    k.projection,
                    ExplainGenerator::explain_compact(&k.path),
                    r
                )
            })
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// 路径在前 `depth` 个导航步骤之后是否还有遍历，无法分解的路径按有遍历处理
fn traverses_beyond(path: &Abt, depth: usize) -> bool {
    match path_steps(path) {
        Some(steps) => steps.iter().skip(depth).any(|s| *s == PathStep::Traverse),
        None => true,
    }
}

/// 索引扫描规格：复合区间的每一项对应排序规格中的一个字段
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpecification {
    pub scan_def_name: String,
    pub index_def_name: String,
    pub intervals: Vec<IntervalRequirement>,
    pub reverse_order: bool,
}

impl fmt::Display for IndexSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.intervals.iter().map(|i| i.to_string()).collect();
        write!(
            f,
            "scanDef: {}, index: {}, interval: {{{}}}, reverse: {}",
            self.scan_def_name,
            self.index_def_name,
            parts.join(", "),
            self.reverse_order
        )
    }
}
