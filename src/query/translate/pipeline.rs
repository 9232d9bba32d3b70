//! 聚合管道翻译
//!
//! 支持 `$match`、`$project`、`$sort`、`$limit`、`$skip`、`$unwind` 六种阶段。
//! 每个阶段在当前投影之上追加关系节点，最后以 `Root` 输出结果投影

use std::collections::BTreeSet;

use log::debug;

use super::match_expr::{split_field_path, translate_filter};
use crate::core::error::{AbtResult, TranslateError, TranslateResult};
use crate::query::abt::expr::{make_eval_filter, make_eval_path, make_variable};
use crate::query::abt::node::{
    make_collation, make_evaluation, make_filter, make_limit_skip, make_root, make_unwind,
};
use crate::query::abt::path::{
    make_path_constant, make_path_drop, make_path_field, make_path_get, make_path_identity,
    make_path_keep,
};
use crate::query::abt::{Abt, CollationOp, ExplainGenerator, ProjectionName};
use crate::query::optimizer::prefix_id::PrefixId;

const ID_FIELD: &str = "_id";

/// `$project` 规格，只支持顶层字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSpec {
    /// true 为包含投影，false 为排除投影
    pub inclusion: bool,
    pub fields: BTreeSet<String>,
}

/// 管道阶段
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(serde_json::Value),
    Project(ProjectSpec),
    Sort(Vec<(Vec<String>, CollationOp)>),
    Limit(u64),
    Skip(u64),
    Unwind {
        path: Vec<String>,
        preserve_null_and_empty: bool,
    },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Unwind { .. } => "$unwind",
        }
    }
}

/// 解析后的管道
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// 解析 JSON 数组形式的管道，每个元素是只有一个键的阶段文档
    pub fn parse(value: &serde_json::Value) -> TranslateResult<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| TranslateError::invalid_stage("pipeline", "管道必须是数组"))?;
        let stages = items.iter().map(parse_stage).collect::<TranslateResult<Vec<_>>>()?;
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

fn parse_stage(doc: &serde_json::Value) -> TranslateResult<Stage> {
    let fields = doc
        .as_object()
        .filter(|f| f.len() == 1)
        .ok_or_else(|| TranslateError::invalid_stage("pipeline", "每个阶段必须是只有一个键的文档"))?;
    let Some((name, spec)) = fields.iter().next() else {
        return Err(TranslateError::invalid_stage("pipeline", "空阶段"));
    };

    match name.as_str() {
        "$match" => {
            if !spec.is_object() {
                return Err(TranslateError::invalid_stage("$match", "参数必须是文档"));
            }
            Ok(Stage::Match(spec.clone()))
        }
        "$project" => parse_project(spec),
        "$sort" => parse_sort(spec),
        "$limit" => match spec.as_u64() {
            Some(n) if n > 0 => Ok(Stage::Limit(n)),
            _ => Err(TranslateError::invalid_stage("$limit", "参数必须是正整数")),
        },
        "$skip" => spec
            .as_u64()
            .map(Stage::Skip)
            .ok_or_else(|| TranslateError::invalid_stage("$skip", "参数必须是非负整数")),
        "$unwind" => parse_unwind(spec),
        other => Err(TranslateError::UnknownStage(other.to_string())),
    }
}

fn parse_project(spec: &serde_json::Value) -> TranslateResult<Stage> {
    let fields = spec
        .as_object()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| TranslateError::invalid_stage("$project", "参数必须是非空文档"))?;

    let mut included = BTreeSet::new();
    let mut excluded = BTreeSet::new();
    for (field, flag) in fields {
        if field.contains('.') || field.starts_with('$') {
            return Err(TranslateError::invalid_stage("$project", format!("只支持顶层字段: {}", field)));
        }
        let keep = match flag {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            _ => return Err(TranslateError::invalid_stage("$project", format!("字段 {} 的取值无效", field))),
        };
        if keep {
            included.insert(field.clone());
        } else {
            excluded.insert(field.clone());
        }
    }

    // 包含投影中只允许排除 _id
    let excludes_only_id = excluded.len() == 1 && excluded.contains(ID_FIELD);
    if !included.is_empty() && !excluded.is_empty() && !excludes_only_id {
        return Err(TranslateError::invalid_stage("$project", "包含与排除不能混用"));
    }
    if included.is_empty() {
        return Ok(Stage::Project(ProjectSpec {
            inclusion: false,
            fields: excluded,
        }));
    }
    if !excludes_only_id {
        included.insert(ID_FIELD.to_string());
    }
    Ok(Stage::Project(ProjectSpec {
        inclusion: true,
        fields: included,
    }))
}

fn parse_sort(spec: &serde_json::Value) -> TranslateResult<Stage> {
    let fields = spec
        .as_object()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| TranslateError::invalid_stage("$sort", "参数必须是非空文档"))?;
    let mut keys = Vec::with_capacity(fields.len());
    for (field, direction) in fields {
        let op = match direction.as_f64() {
            Some(d) if d == 1.0 => CollationOp::Ascending,
            Some(d) if d == -1.0 => CollationOp::Descending,
            _ => return Err(TranslateError::invalid_stage("$sort", format!("字段 {} 的方向必须是 1 或 -1", field))),
        };
        keys.push((split_field_path(field)?, op));
    }
    Ok(Stage::Sort(keys))
}

fn parse_unwind(spec: &serde_json::Value) -> TranslateResult<Stage> {
    let (path, preserve) = match spec {
        serde_json::Value::String(path) => (path.as_str(), false),
        serde_json::Value::Object(fields) => {
            let path = fields
                .get("path")
                .and_then(|p| p.as_str())
                .ok_or_else(|| TranslateError::invalid_stage("$unwind", "缺少 path"))?;
            let preserve = match fields.get("preserveNullAndEmptyArrays") {
                None => false,
                Some(serde_json::Value::Bool(b)) => *b,
                Some(_) => {
                    return Err(TranslateError::invalid_stage(
                        "$unwind",
                        "preserveNullAndEmptyArrays 必须是布尔值",
                    ))
                }
            };
            if let Some(unknown) = fields
                .keys()
                .find(|k| *k != "path" && *k != "preserveNullAndEmptyArrays")
            {
                return Err(TranslateError::invalid_stage("$unwind", format!("未知选项 {}", unknown)));
            }
            (path, preserve)
        }
        _ => return Err(TranslateError::invalid_stage("$unwind", "参数必须是字符串或文档")),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| TranslateError::invalid_stage("$unwind", "路径必须以 $ 开头"))?;
    Ok(Stage::Unwind {
        path: split_field_path(field)?,
        preserve_null_and_empty: preserve,
    })
}

/// 取字段链路径，不遍历数组
fn get_path(fields: &[String]) -> AbtResult<Abt> {
    fields
        .iter()
        .rev()
        .try_fold(make_path_identity(), |inner, f| make_path_get(f.clone(), inner))
}

/// 把管道翻译为以 `Root` 结尾的 ABT
pub fn translate_pipeline(
    pipeline: &Pipeline,
    root_projection: &str,
    initial_tree: Abt,
    prefix_id: &mut PrefixId,
) -> TranslateResult<Abt> {
    let mut current: ProjectionName = root_projection.to_string();
    let mut tree = initial_tree;

    for stage in pipeline.stages() {
        tree = match stage {
            Stage::Match(filter) => {
                let path = translate_filter(filter)?;
                make_filter(make_eval_filter(path, make_variable(current.clone()))?, tree)?
            }
            Stage::Project(spec) => {
                let path = if spec.inclusion {
                    make_path_keep(spec.fields.clone())
                } else {
                    make_path_drop(spec.fields.clone())
                };
                let projection = prefix_id.get_next_id("proj");
                let expr = make_eval_path(path, make_variable(current.clone()))?;
                current = projection.clone();
                make_evaluation(projection, expr, tree)?
            }
            Stage::Sort(keys) => {
                let mut spec = Vec::with_capacity(keys.len());
                for (fields, op) in keys {
                    let projection = prefix_id.get_next_id("sort");
                    let expr = make_eval_path(get_path(fields)?, make_variable(current.clone()))?;
                    tree = make_evaluation(projection.clone(), expr, tree)?;
                    spec.push((projection, *op));
                }
                make_collation(spec, tree)?
            }
            Stage::Limit(n) => make_limit_skip(Some(*n), 0, tree)?,
            Stage::Skip(n) => make_limit_skip(None, *n, tree)?,
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => {
                let unwound = prefix_id.get_next_id("unwind");
                let pid = prefix_id.get_next_id("unwind_pid");
                let extract = make_eval_path(get_path(path)?, make_variable(current.clone()))?;
                tree = make_evaluation(unwound.clone(), extract, tree)?;
                tree = make_unwind(unwound.clone(), pid, *preserve_null_and_empty, tree)?;

                // 用展开后的元素替换原文档中的数组字段
                let leaf = make_path_constant(make_variable(unwound))?;
                let set_path = path
                    .iter()
                    .rev()
                    .try_fold(leaf, |inner, f| make_path_field(f.clone(), inner))?;
                let projection = prefix_id.get_next_id("proj");
                let expr = make_eval_path(set_path, make_variable(current.clone()))?;
                current = projection.clone();
                make_evaluation(projection, expr, tree)?
            }
        };
    }

    let root = make_root(vec![current], tree)?;
    debug!("管道翻译结果:\n{}", ExplainGenerator::explain(&root));
    Ok(root)
}
