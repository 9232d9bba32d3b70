//! 过滤路径与部分模式需求之间的转换
//!
//! `EvalFilter(path, Variable(p))` 形式的谓词如果只由取字段、遍历、常量比较
//! 以及它们的合取/析取组成，就可以转换为按路径组织的区间需求

use crate::core::error::AbtResult;
use crate::query::abt::expr::{make_conjunction, make_eval_filter, make_variable};
use crate::query::abt::path::{
    make_path_bool, make_path_compare_value, make_path_compose_a, make_path_compose_m,
    make_path_identity, path_from_steps, path_with_leaf, PathStep,
};
use crate::query::abt::{Abt, AbtNode, Operations};
use crate::query::metadata::index_bounds::{
    union_disjunctions, IntervalRequirement, PartialSchemaKey, PartialSchemaRequirement,
    PartialSchemaRequirements,
};

/// 转换结果
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSchemaReqConversion {
    /// 谓词是否完全由需求表达
    pub success: bool,
    /// 需求中存在空区间，即谓词不可满足
    pub has_empty_interval: bool,
    pub requirements: PartialSchemaRequirements,
}

impl PartialSchemaReqConversion {
    fn unsupported() -> Self {
        Self {
            success: false,
            has_empty_interval: false,
            requirements: PartialSchemaRequirements::new(),
        }
    }

    fn always_true() -> Self {
        Self {
            success: true,
            has_empty_interval: false,
            requirements: PartialSchemaRequirements::new(),
        }
    }

    fn always_false() -> Self {
        Self {
            success: true,
            has_empty_interval: true,
            requirements: PartialSchemaRequirements::new(),
        }
    }

    fn is_trivially_true(&self) -> bool {
        self.success && !self.has_empty_interval && self.requirements.is_empty()
    }
}

/// 把过滤表达式转换为部分模式需求
pub fn convert_to_requirements(expr: &Abt) -> PartialSchemaReqConversion {
    let AbtNode::EvalFilter { path, input } = expr.node() else {
        return PartialSchemaReqConversion::unsupported();
    };
    let Some(projection) = input.as_variable() else {
        return PartialSchemaReqConversion::unsupported();
    };
    match convert_path(path, &mut Vec::new(), projection) {
        Some(mut conversion) => {
            conversion.has_empty_interval |= conversion.requirements.has_empty_interval();
            conversion
        }
        None => PartialSchemaReqConversion::unsupported(),
    }
}

fn convert_path(path: &Abt, prefix: &mut Vec<PathStep>, projection: &str) -> Option<PartialSchemaReqConversion> {
    match path.node() {
        AbtNode::PathGet { name, inner } => {
            prefix.push(PathStep::Get(name.clone()));
            let result = convert_path(inner, prefix, projection);
            prefix.pop();
            result
        }
        AbtNode::PathTraverse(inner) => {
            prefix.push(PathStep::Traverse);
            let result = convert_path(inner, prefix, projection);
            prefix.pop();
            result
        }
        AbtNode::PathCompare { op, value } => {
            let interval = IntervalRequirement::from_comparison(*op, value.as_constant()?.clone())?;
            let key_path = path_from_steps(prefix, make_path_identity()).ok()?;
            let mut requirements = PartialSchemaRequirements::new();
            requirements.conjoin(
                PartialSchemaKey::new(projection, key_path),
                PartialSchemaRequirement::new(None, vec![interval]),
            );
            Some(PartialSchemaReqConversion {
                success: true,
                has_empty_interval: false,
                requirements,
            })
        }
        AbtNode::PathConstant(expr) => match expr.as_constant().and_then(|v| v.as_bool()) {
            Some(true) => Some(PartialSchemaReqConversion::always_true()),
            Some(false) => Some(PartialSchemaReqConversion::always_false()),
            None => None,
        },
        AbtNode::PathComposeM(left, right) => {
            let mut left = convert_path(left, prefix, projection)?;
            let right = convert_path(right, prefix, projection)?;
            left.has_empty_interval |= right.has_empty_interval;
            // 两侧只共享当前前缀，前缀之后的遍历可能落在不同元素上
            left.requirements.conjoin_all_independent(right.requirements, prefix.len());
            left.has_empty_interval |= left.requirements.has_empty_interval();
            Some(left)
        }
        AbtNode::PathComposeA(left, right) => {
            let left = convert_path(left, prefix, projection)?;
            let right = convert_path(right, prefix, projection)?;
            if left.is_trivially_true() || right.is_trivially_true() {
                return Some(PartialSchemaReqConversion::always_true());
            }
            if left.has_empty_interval {
                return Some(right);
            }
            if right.has_empty_interval {
                return Some(left);
            }
            disjoin_single_entries(&left.requirements, &right.requirements)
        }
        _ => None,
    }
}

/// 只有两侧都是同一键上的单条需求时，析取才能表示为区间的并
fn disjoin_single_entries(
    left: &PartialSchemaRequirements,
    right: &PartialSchemaRequirements,
) -> Option<PartialSchemaReqConversion> {
    if left.len() != 1 || right.len() != 1 {
        return None;
    }
    let (left_key, left_req) = left.iter().next()?;
    let (right_key, right_req) = right.iter().next()?;
    if left_key != right_key || left_req.bound_projection.is_some() || right_req.bound_projection.is_some() {
        return None;
    }
    let mut requirements = PartialSchemaRequirements::new();
    requirements.conjoin(
        left_key.clone(),
        PartialSchemaRequirement::new(None, union_disjunctions(&left_req.intervals, &right_req.intervals)),
    );
    Some(PartialSchemaReqConversion {
        success: true,
        has_empty_interval: false,
        requirements,
    })
}

/// 单个区间对应的谓词路径，完全开区间返回 None
pub fn interval_to_path(interval: &IntervalRequirement) -> AbtResult<Option<Abt>> {
    if interval.is_fully_open() {
        return Ok(None);
    }
    if interval.is_equality() {
        return Ok(Some(make_path_compare_value(
            Operations::Eq,
            interval.low().bound().clone(),
        )?));
    }
    let mut parts = Vec::new();
    if !interval.low().is_minus_inf() {
        let op = if interval.low().inclusive() { Operations::Gte } else { Operations::Gt };
        parts.push(make_path_compare_value(op, interval.low().bound().clone())?);
    }
    if !interval.high().is_plus_inf() {
        let op = if interval.high().inclusive() { Operations::Lte } else { Operations::Lt };
        parts.push(make_path_compare_value(op, interval.high().bound().clone())?);
    }
    let mut iter = parts.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    Ok(Some(iter.try_fold(first, make_path_compose_m)?))
}

/// 单个需求的区间析取对应的谓词路径，需求恒为真时返回 None
pub fn requirement_to_path(req: &PartialSchemaRequirement) -> AbtResult<Option<Abt>> {
    if req.is_unsatisfiable() {
        return Ok(Some(make_path_bool(false)?));
    }
    let mut result: Option<Abt> = None;
    for interval in &req.intervals {
        let Some(path) = interval_to_path(interval)? else {
            return Ok(None);
        };
        result = Some(match result {
            Some(acc) => make_path_compose_a(acc, path)?,
            None => path,
        });
    }
    Ok(result)
}

/// 把需求集合还原为过滤表达式，所有需求都恒为真时返回 None
pub fn requirements_to_filter(reqs: &PartialSchemaRequirements) -> AbtResult<Option<Abt>> {
    let mut conjuncts = Vec::new();
    for (key, req) in reqs.iter() {
        if let Some(leaf) = requirement_to_path(req)? {
            let path = path_with_leaf(&key.path, leaf)?;
            conjuncts.push(make_eval_filter(path, make_variable(key.projection.clone()))?);
        }
    }
    if conjuncts.is_empty() {
        return Ok(None);
    }
    Ok(Some(make_conjunction(conjuncts)?))
}
