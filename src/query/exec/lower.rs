//! 物理计划降级
//!
//! 把获胜的物理 ABT 翻译为槽位计划：每个绑定的投影分配一个槽位，
//! 表达式与路径被改写为读取槽位的函数调用

use std::collections::BTreeSet;

use log::debug;

use super::slot_plan::{LoweredPlan, ScanSource, SlotExpr, SlotId, SlotIdGenerator, SlotStage, SlotVarMap};
use crate::core::error::{LoweringError, LoweringResult};
use crate::core::Value;
use crate::query::abt::{Abt, AbtNode, DelegatorResolver, FieldProjectionMap, JoinType, Operations, ProjectionName};
use crate::query::metadata::Metadata;

/// 路径的求值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathMode {
    /// `EvalPath`：路径产出新值
    Project,
    /// `EvalFilter`：路径产出布尔值
    Filter,
}

#[derive(Default)]
struct LoweringState {
    ids: SlotIdGenerator,
    next_local: usize,
}

impl LoweringState {
    fn fresh_local(&mut self) -> String {
        let name = format!("l{}", self.next_local);
        self.next_local += 1;
        name
    }
}

/// 槽位降级器
pub struct SlotLowering<'a> {
    metadata: &'a Metadata,
    resolver: Option<&'a dyn DelegatorResolver>,
}

impl<'a> SlotLowering<'a> {
    pub fn new(metadata: &'a Metadata) -> Self {
        Self {
            metadata,
            resolver: None,
        }
    }

    /// 使用备忘录解析物理委托节点
    pub fn with_resolver(mut self, resolver: &'a dyn DelegatorResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 降级一棵物理计划树
    ///
    /// 根节点为 `Root` 时结果槽位是第一个根投影，否则取任一输出槽位
    pub fn lower(&self, plan: &Abt) -> LoweringResult<LoweredPlan> {
        if matches!(plan.node(), AbtNode::Blackhole) {
            return Err(LoweringError::NullPlan);
        }
        let mut state = LoweringState::default();
        let mut slots = SlotVarMap::new();
        let root = self.lower_node(plan, &mut slots, &mut state)?;
        if slots.is_empty() {
            return Err(LoweringError::NoOutputSlots);
        }

        let result_slot = match plan.node() {
            AbtNode::Root { projections, .. } => match projections.first() {
                Some(first) => lookup(&slots, first)?,
                None => return Err(LoweringError::NoOutputSlots),
            },
            _ => match slots.values().next() {
                Some(slot) => *slot,
                None => return Err(LoweringError::NoOutputSlots),
            },
        };
        debug!("降级完成: 分配槽位 {} 个, 结果槽位 {}", state.ids.allocated(), result_slot);
        Ok(LoweredPlan {
            root,
            slot_map: slots,
            result_slot,
        })
    }

    fn source(&self, scan_def_name: &str) -> ScanSource {
        let def = self.metadata.scan_def(scan_def_name);
        let option = |key: &str| def.and_then(|d| d.option(key)).map(str::to_string);
        ScanSource {
            scan_def_name: scan_def_name.to_string(),
            database: option("database"),
            collection: option("collection"),
            uuid: option("uuid"),
        }
    }

    fn lower_node(&self, node: &Abt, slots: &mut SlotVarMap, state: &mut LoweringState) -> LoweringResult<SlotStage> {
        match node.node() {
            AbtNode::PhysicalScan {
                field_projections,
                scan_def_name,
                ..
            } => {
                let record = state.ids.generate();
                let rid = field_projections.rid_projection.as_ref().map(|name| {
                    let slot = state.ids.generate();
                    slots.insert(name.clone(), slot);
                    slot
                });
                let stage = SlotStage::Scan {
                    source: self.source(scan_def_name),
                    record,
                    rid,
                };
                Ok(project_fields(stage, record, field_projections, slots, state))
            }
            AbtNode::Seek {
                rid_projection,
                field_projections,
                scan_def_name,
                ..
            } => {
                let rid_input = lookup(slots, rid_projection)?;
                let record = state.ids.generate();
                let stage = SlotStage::Seek {
                    source: self.source(scan_def_name),
                    rid_input,
                    record,
                };
                Ok(project_fields(stage, record, field_projections, slots, state))
            }
            AbtNode::IndexScan {
                field_projections,
                spec,
                ..
            } => {
                if field_projections.root_projection.is_some() || !field_projections.field_projections.is_empty() {
                    return Err(LoweringError::UnsupportedNode("IndexScan 键字段投影".to_string()));
                }
                let rid = state.ids.generate();
                if let Some(name) = &field_projections.rid_projection {
                    slots.insert(name.clone(), rid);
                }
                Ok(SlotStage::IndexScan {
                    source: self.source(&spec.scan_def_name),
                    index_name: spec.index_def_name.clone(),
                    intervals: spec.intervals.clone(),
                    reverse: spec.reverse_order,
                    rid,
                })
            }
            AbtNode::ValueScan { rows, binder } => {
                let names = binder.binder_names();
                let ids: Vec<SlotId> = names
                    .iter()
                    .map(|name| {
                        let slot = state.ids.generate();
                        slots.insert(name.clone(), slot);
                        slot
                    })
                    .collect();
                let rows = rows
                    .iter()
                    .map(|row| match row {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    })
                    .collect();
                Ok(SlotStage::Values { slots: ids, rows })
            }
            AbtNode::CoScan => Ok(SlotStage::CoScan),
            AbtNode::MemoPhysicalDelegator(id) => {
                let resolved = self
                    .resolver
                    .and_then(|r| r.resolve_physical(*id))
                    .ok_or_else(|| LoweringError::InvalidMemoReference(id.to_string()))?;
                self.lower_node(&resolved, slots, state)
            }
            AbtNode::Scan { .. }
            | AbtNode::MemoLogicalDelegator(_)
            | AbtNode::Sargable { .. }
            | AbtNode::RidIntersect { .. } => Err(LoweringError::LogicalNode(node.node().kind_name().to_string())),
            AbtNode::Filter { filter, child } => {
                let child = self.lower_node(child, slots, state)?;
                let predicate = lower_expr(filter, slots, &mut Vec::new(), state)?;
                Ok(SlotStage::Filter {
                    predicate,
                    child: Box::new(child),
                })
            }
            AbtNode::Evaluation { binder, child } => {
                let child = self.lower_node(child, slots, state)?;
                let mut bindings = Vec::new();
                for (name, expr) in binder.binder_names().iter().zip(binder.binder_exprs()) {
                    // 纯变量重命名直接复用槽位
                    if let Some(source) = expr.as_variable() {
                        let slot = lookup(slots, source)?;
                        slots.insert(name.clone(), slot);
                        continue;
                    }
                    let lowered = lower_expr(expr, slots, &mut Vec::new(), state)?;
                    let slot = state.ids.generate();
                    bindings.push((slot, lowered));
                    slots.insert(name.clone(), slot);
                }
                if bindings.is_empty() {
                    return Ok(child);
                }
                Ok(SlotStage::Project {
                    bindings,
                    child: Box::new(child),
                })
            }
            AbtNode::BinaryJoin {
                join_type,
                correlated,
                filter,
                left,
                right,
            } => {
                if *join_type != JoinType::Inner {
                    return Err(LoweringError::UnsupportedNode(format!("BinaryJoin {}", join_type)));
                }
                let outer = self.lower_node(left, slots, state)?;
                let correlated = correlated
                    .iter()
                    .map(|name| lookup(slots, name))
                    .collect::<LoweringResult<Vec<_>>>()?;
                // 内侧可以看到外侧的全部投影
                let mut inner_slots = slots.clone();
                let inner = self.lower_node(right, &mut inner_slots, state)?;
                let predicate = if filter.is_constant_bool(true) {
                    None
                } else {
                    Some(lower_expr(filter, &inner_slots, &mut Vec::new(), state)?)
                };
                *slots = inner_slots;
                Ok(SlotStage::LoopJoin {
                    outer: Box::new(outer),
                    inner: Box::new(inner),
                    correlated,
                    predicate,
                })
            }
            AbtNode::HashJoin {
                join_type,
                left_keys,
                right_keys,
                left,
                right,
                ..
            } => {
                if *join_type != JoinType::Inner {
                    return Err(LoweringError::UnsupportedNode(format!("HashJoin {}", join_type)));
                }
                let (outer, inner, outer_keys, inner_keys) =
                    self.lower_join_sides(left, right, left_keys, right_keys, slots, state)?;
                Ok(SlotStage::HashJoin {
                    outer: Box::new(outer),
                    inner: Box::new(inner),
                    outer_keys,
                    inner_keys,
                })
            }
            AbtNode::MergeJoin {
                left_keys,
                right_keys,
                collation,
                left,
                right,
                ..
            } => {
                let (outer, inner, outer_keys, inner_keys) =
                    self.lower_join_sides(left, right, left_keys, right_keys, slots, state)?;
                Ok(SlotStage::MergeJoin {
                    outer: Box::new(outer),
                    inner: Box::new(inner),
                    outer_keys,
                    inner_keys,
                    directions: collation.clone(),
                })
            }
            AbtNode::Union { binder, children } => {
                let names = binder.binder_names();
                let mut inputs = Vec::with_capacity(children.len());
                for child in children {
                    let mut child_slots = slots.clone();
                    let stage = self.lower_node(child, &mut child_slots, state)?;
                    let input_slots = names
                        .iter()
                        .map(|name| lookup(&child_slots, name))
                        .collect::<LoweringResult<Vec<_>>>()?;
                    inputs.push((stage, input_slots));
                }
                let outputs: Vec<SlotId> = names.iter().map(|_| state.ids.generate()).collect();
                for (name, slot) in names.iter().zip(&outputs) {
                    slots.insert(name.clone(), *slot);
                }
                Ok(SlotStage::Union { inputs, outputs })
            }
            AbtNode::GroupBy {
                group_keys,
                agg_binder,
                child,
                ..
            } => {
                let child = self.lower_node(child, slots, state)?;
                let group_by = group_keys
                    .iter()
                    .map(|name| lookup(slots, name))
                    .collect::<LoweringResult<Vec<_>>>()?;
                let mut visible = SlotVarMap::new();
                for (name, slot) in group_keys.iter().zip(&group_by) {
                    visible.insert(name.clone(), *slot);
                }
                let mut aggregates = Vec::new();
                for (name, expr) in agg_binder.binder_names().iter().zip(agg_binder.binder_exprs()) {
                    let lowered = lower_expr(expr, slots, &mut Vec::new(), state)?;
                    let slot = state.ids.generate();
                    aggregates.push((slot, lowered));
                    visible.insert(name.clone(), slot);
                }
                // 分组之后只有分组键和聚合结果可见
                *slots = visible;
                Ok(SlotStage::HashAgg {
                    group_by,
                    aggregates,
                    child: Box::new(child),
                })
            }
            AbtNode::Unwind {
                retain_non_arrays,
                binder,
                child,
            } => {
                let child = self.lower_node(child, slots, state)?;
                let names = binder.binder_names();
                let (Some(projection), Some(pid)) = (names.first(), names.get(1)) else {
                    return Err(LoweringError::UnsupportedNode("Unwind".to_string()));
                };
                let input = lookup(slots, projection)?;
                let output = state.ids.generate();
                let index = state.ids.generate();
                slots.insert(projection.clone(), output);
                slots.insert(pid.clone(), index);
                Ok(SlotStage::Unwind {
                    input,
                    output,
                    index,
                    preserve_non_arrays: *retain_non_arrays,
                    child: Box::new(child),
                })
            }
            AbtNode::Unique { refs, child } => {
                let child = self.lower_node(child, slots, state)?;
                let keys = refs
                    .reference_names()
                    .into_iter()
                    .map(|name| lookup(slots, name))
                    .collect::<LoweringResult<Vec<_>>>()?;
                Ok(SlotStage::Unique {
                    keys,
                    child: Box::new(child),
                })
            }
            AbtNode::Collation { spec, child, .. } => {
                let child = self.lower_node(child, slots, state)?;
                let keys = spec
                    .iter()
                    .map(|(name, op)| lookup(slots, name).map(|slot| (slot, *op)))
                    .collect::<LoweringResult<Vec<_>>>()?;
                Ok(SlotStage::Sort {
                    keys,
                    child: Box::new(child),
                })
            }
            AbtNode::LimitSkip { limit, skip, child } => {
                let child = self.lower_node(child, slots, state)?;
                Ok(SlotStage::Limit {
                    limit: *limit,
                    skip: *skip,
                    child: Box::new(child),
                })
            }
            AbtNode::Exchange { child, .. } => {
                let child = self.lower_node(child, slots, state)?;
                Ok(SlotStage::Exchange { child: Box::new(child) })
            }
            AbtNode::Root { projections, child, .. } => {
                let child = self.lower_node(child, slots, state)?;
                let mut outputs = SlotVarMap::new();
                for name in projections {
                    outputs.insert(name.clone(), lookup(slots, name)?);
                }
                *slots = outputs;
                Ok(child)
            }
            AbtNode::Blackhole => Err(LoweringError::NullPlan),
            _ => Err(LoweringError::UnsupportedNode(node.node().kind_name().to_string())),
        }
    }

    /// 哈希连接与归并连接两侧独立降级，先左后右
    #[allow(clippy::too_many_arguments)]
    fn lower_join_sides(
        &self,
        left: &Abt,
        right: &Abt,
        left_keys: &[ProjectionName],
        right_keys: &[ProjectionName],
        slots: &mut SlotVarMap,
        state: &mut LoweringState,
    ) -> LoweringResult<(SlotStage, SlotStage, Vec<SlotId>, Vec<SlotId>)> {
        let mut left_slots = slots.clone();
        let outer = self.lower_node(left, &mut left_slots, state)?;
        let mut right_slots = slots.clone();
        let inner = self.lower_node(right, &mut right_slots, state)?;
        let outer_keys = left_keys
            .iter()
            .map(|name| lookup(&left_slots, name))
            .collect::<LoweringResult<Vec<_>>>()?;
        let inner_keys = right_keys
            .iter()
            .map(|name| lookup(&right_slots, name))
            .collect::<LoweringResult<Vec<_>>>()?;
        // 同名投影以左侧为准
        right_slots.extend(left_slots);
        *slots = right_slots;
        Ok((outer, inner, outer_keys, inner_keys))
    }
}

fn lookup(slots: &SlotVarMap, name: &str) -> LoweringResult<SlotId> {
    slots
        .get(name)
        .copied()
        .ok_or_else(|| LoweringError::UnboundVariable(name.to_string()))
}

/// 为扫描类阶段绑定根投影与字段投影
fn project_fields(
    stage: SlotStage,
    record: SlotId,
    field_projections: &FieldProjectionMap,
    slots: &mut SlotVarMap,
    state: &mut LoweringState,
) -> SlotStage {
    if let Some(root) = &field_projections.root_projection {
        slots.insert(root.clone(), record);
    }
    if field_projections.field_projections.is_empty() {
        return stage;
    }
    let bindings = field_projections
        .field_projections
        .iter()
        .map(|(field, projection)| {
            let slot = state.ids.generate();
            slots.insert(projection.clone(), slot);
            (slot, get_field(SlotExpr::Slot(record), field))
        })
        .collect();
    SlotStage::Project {
        bindings,
        child: Box::new(stage),
    }
}

fn get_field(input: SlotExpr, field: &str) -> SlotExpr {
    SlotExpr::call("getField", vec![input, SlotExpr::string(field)])
}

fn field_list(names: &BTreeSet<String>) -> Vec<SlotExpr> {
    names.iter().map(|n| SlotExpr::string(n)).collect()
}

/// 降级标量表达式；`locals` 是当前作用域内的 Lambda 与 Let 变量
fn lower_expr(
    expr: &Abt,
    slots: &SlotVarMap,
    locals: &mut Vec<String>,
    state: &mut LoweringState,
) -> LoweringResult<SlotExpr> {
    match expr.node() {
        AbtNode::Constant(value) => Ok(SlotExpr::Constant(value.clone())),
        AbtNode::Variable(name) => {
            if locals.iter().rev().any(|l| l == name) {
                Ok(SlotExpr::Local(name.clone()))
            } else {
                lookup(slots, name).map(SlotExpr::Slot)
            }
        }
        AbtNode::UnaryOp { op, arg } => Ok(SlotExpr::Unary {
            op: *op,
            arg: Box::new(lower_expr(arg, slots, locals, state)?),
        }),
        AbtNode::BinaryOp { op, left, right } => Ok(SlotExpr::binary(
            *op,
            lower_expr(left, slots, locals, state)?,
            lower_expr(right, slots, locals, state)?,
        )),
        AbtNode::If {
            cond,
            then_branch,
            else_branch,
        } => Ok(SlotExpr::If {
            cond: Box::new(lower_expr(cond, slots, locals, state)?),
            then_branch: Box::new(lower_expr(then_branch, slots, locals, state)?),
            else_branch: Box::new(lower_expr(else_branch, slots, locals, state)?),
        }),
        AbtNode::Let { var, bind, body } => {
            let bind = lower_expr(bind, slots, locals, state)?;
            locals.push(var.clone());
            let body = lower_expr(body, slots, locals, state);
            locals.pop();
            Ok(SlotExpr::Let {
                name: var.clone(),
                bind: Box::new(bind),
                body: Box::new(body?),
            })
        }
        AbtNode::LambdaAbstraction { var, body } => {
            locals.push(var.clone());
            let body = lower_expr(body, slots, locals, state);
            locals.pop();
            Ok(SlotExpr::Lambda {
                param: var.clone(),
                body: Box::new(body?),
            })
        }
        AbtNode::LambdaApplication { lambda, arg } => {
            let arg = lower_expr(arg, slots, locals, state)?;
            apply_lambda(lambda, arg, slots, locals, state)
        }
        AbtNode::FunctionCall { name, args } => {
            let args = args
                .iter()
                .map(|a| lower_expr(a, slots, locals, state))
                .collect::<LoweringResult<Vec<_>>>()?;
            Ok(SlotExpr::FunctionCall {
                name: name.clone(),
                args,
            })
        }
        AbtNode::EvalPath { path, input } => {
            let input = lower_expr(input, slots, locals, state)?;
            lower_path(path, input, PathMode::Project, slots, locals, state)
        }
        AbtNode::EvalFilter { path, input } => {
            let input = lower_expr(input, slots, locals, state)?;
            let predicate = lower_path(path, input, PathMode::Filter, slots, locals, state)?;
            // 缺失字段视为不匹配
            Ok(SlotExpr::call(
                "fillEmpty",
                vec![predicate, SlotExpr::Constant(Value::Bool(false))],
            ))
        }
        _ => Err(LoweringError::UnsupportedNode(expr.node().kind_name().to_string())),
    }
}

/// Lambda 字面量直接展开为 Let
fn apply_lambda(
    lambda: &Abt,
    arg: SlotExpr,
    slots: &SlotVarMap,
    locals: &mut Vec<String>,
    state: &mut LoweringState,
) -> LoweringResult<SlotExpr> {
    let AbtNode::LambdaAbstraction { var, body } = lambda.node() else {
        return Err(LoweringError::UnsupportedNode(lambda.node().kind_name().to_string()));
    };
    locals.push(var.clone());
    let body = lower_expr(body, slots, locals, state);
    locals.pop();
    Ok(SlotExpr::Let {
        name: var.clone(),
        bind: Box::new(arg),
        body: Box::new(body?),
    })
}

fn lower_path(
    path: &Abt,
    input: SlotExpr,
    mode: PathMode,
    slots: &SlotVarMap,
    locals: &mut Vec<String>,
    state: &mut LoweringState,
) -> LoweringResult<SlotExpr> {
    match path.node() {
        AbtNode::PathIdentity => Ok(input),
        AbtNode::PathConstant(expr) => lower_expr(expr, slots, locals, state),
        AbtNode::PathLambda(lambda) => apply_lambda(lambda, input, slots, locals, state),
        AbtNode::PathDefault(expr) => {
            let default = lower_expr(expr, slots, locals, state)?;
            Ok(SlotExpr::call("fillEmpty", vec![input, default]))
        }
        AbtNode::PathCompare { op, value } => {
            let value = lower_expr(value, slots, locals, state)?;
            Ok(SlotExpr::binary(*op, input, value))
        }
        AbtNode::PathDrop(names) => {
            let mut args = vec![input];
            args.extend(field_list(names));
            Ok(SlotExpr::call("dropFields", args))
        }
        AbtNode::PathKeep(names) => {
            let mut args = vec![input];
            args.extend(field_list(names));
            Ok(SlotExpr::call("keepFields", args))
        }
        AbtNode::PathObj => type_check("isObject", input, mode),
        AbtNode::PathArr => type_check("isArray", input, mode),
        AbtNode::PathTraverse(inner) => {
            let param = state.fresh_local();
            locals.push(param.clone());
            let body = lower_path(inner, SlotExpr::Local(param.clone()), mode, slots, locals, state);
            locals.pop();
            let lambda = SlotExpr::Lambda {
                param,
                body: Box::new(body?),
            };
            let name = match mode {
                PathMode::Project => "traverseP",
                PathMode::Filter => "traverseF",
            };
            Ok(SlotExpr::call(name, vec![input, lambda]))
        }
        AbtNode::PathGet { name, inner } => {
            let field = get_field(input, name);
            lower_path(inner, field, mode, slots, locals, state)
        }
        AbtNode::PathField { name, inner } => {
            let field = get_field(input.clone(), name);
            let value = lower_path(inner, field, mode, slots, locals, state)?;
            match mode {
                PathMode::Project => Ok(SlotExpr::call("setField", vec![input, SlotExpr::string(name), value])),
                PathMode::Filter => Ok(value),
            }
        }
        AbtNode::PathComposeM(first, second) => match mode {
            PathMode::Project => {
                let applied = lower_path(first, input, mode, slots, locals, state)?;
                lower_path(second, applied, mode, slots, locals, state)
            }
            PathMode::Filter => Ok(SlotExpr::binary(
                Operations::And,
                lower_path(first, input.clone(), mode, slots, locals, state)?,
                lower_path(second, input, mode, slots, locals, state)?,
            )),
        },
        AbtNode::PathComposeA(first, second) => match mode {
            PathMode::Filter => Ok(SlotExpr::binary(
                Operations::Or,
                lower_path(first, input.clone(), mode, slots, locals, state)?,
                lower_path(second, input, mode, slots, locals, state)?,
            )),
            PathMode::Project => Err(LoweringError::UnsupportedNode("PathComposeA".to_string())),
        },
        _ => Err(LoweringError::UnsupportedNode(path.node().kind_name().to_string())),
    }
}

fn type_check(name: &str, input: SlotExpr, mode: PathMode) -> LoweringResult<SlotExpr> {
    let check = SlotExpr::call(name, vec![input.clone()]);
    Ok(match mode {
        PathMode::Filter => check,
        PathMode::Project => SlotExpr::If {
            cond: Box::new(check),
            then_branch: Box::new(input),
            else_branch: Box::new(SlotExpr::Constant(Value::Nothing)),
        },
    })
}
