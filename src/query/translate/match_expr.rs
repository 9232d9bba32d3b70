//! 过滤文档翻译
//!
//! 把 `{a: 5}`、`{a: {$gt: 1, $lte: 9}}`、`$and`/`$or` 这类过滤文档翻译为路径 ABT。
//! 同一文档中的多个字段以合取组合，`$or` 以析取组合

use crate::core::error::{AbtResult, TranslateError, TranslateResult};
use crate::core::Value;
use crate::query::abt::path::{
    make_path_bool, make_path_compare_value, make_path_compose_a, make_path_compose_m,
    make_path_get, make_path_traverse,
};
use crate::query::abt::{Abt, Operations};

/// 翻译过滤文档，空文档恒为真
pub fn translate_filter(filter: &serde_json::Value) -> TranslateResult<Abt> {
    let fields = filter
        .as_object()
        .ok_or_else(|| TranslateError::InvalidFilter(format!("过滤条件必须是文档: {}", filter)))?;
    if fields.is_empty() {
        return Ok(make_path_bool(true)?);
    }

    let mut result: Option<Abt> = None;
    for (key, value) in fields {
        let path = if let Some(op) = key.strip_prefix('$') {
            translate_logical(op, value)?
        } else {
            translate_field(key, value)?
        };
        result = Some(match result {
            Some(acc) => make_path_compose_m(acc, path)?,
            None => path,
        });
    }
    result.ok_or_else(|| TranslateError::InvalidFilter("空过滤条件".to_string()))
}

fn translate_logical(op: &str, value: &serde_json::Value) -> TranslateResult<Abt> {
    let combine: fn(Abt, Abt) -> AbtResult<Abt> = match op {
        "and" => make_path_compose_m,
        "or" => make_path_compose_a,
        _ => return Err(TranslateError::UnsupportedOperator(format!("${}", op))),
    };
    let clauses = value
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| TranslateError::InvalidFilter(format!("${} 需要非空数组", op)))?;

    let mut iter = clauses.iter();
    let first = match iter.next() {
        Some(clause) => translate_filter(clause)?,
        None => return Err(TranslateError::InvalidFilter(format!("${} 需要非空数组", op))),
    };
    iter.try_fold(first, |acc, clause| -> TranslateResult<Abt> {
        Ok(combine(acc, translate_filter(clause)?)?)
    })
}

/// 字段谓词：每一层都先取字段再遍历数组
fn translate_field(field: &str, value: &serde_json::Value) -> TranslateResult<Abt> {
    let fragments = split_field_path(field)?;
    let leaf = translate_predicate(value)?;
    fragments.iter().rev().try_fold(leaf, |inner, fragment| -> TranslateResult<Abt> {
        Ok(make_path_get(fragment.clone(), make_path_traverse(inner)?)?)
    })
}

/// 拆分点号分隔的字段路径
pub fn split_field_path(field: &str) -> TranslateResult<Vec<String>> {
    let fragments: Vec<String> = field.split('.').map(str::to_string).collect();
    if fragments.iter().any(|f| f.is_empty() || f.starts_with('$')) {
        return Err(TranslateError::MalformedFieldPath(field.to_string()));
    }
    Ok(fragments)
}

fn is_operator_document(value: &serde_json::Value) -> TranslateResult<bool> {
    let Some(fields) = value.as_object() else {
        return Ok(false);
    };
    let operators = fields.keys().filter(|k| k.starts_with('$')).count();
    if operators > 0 && operators != fields.len() {
        return Err(TranslateError::InvalidFilter(format!(
            "操作符与普通字段不能混用: {}",
            value
        )));
    }
    Ok(operators > 0)
}

fn translate_predicate(value: &serde_json::Value) -> TranslateResult<Abt> {
    if !is_operator_document(value)? {
        return Ok(make_path_compare_value(Operations::Eq, Value::from(value))?);
    }
    let mut result: Option<Abt> = None;
    if let Some(fields) = value.as_object() {
        for (op, operand) in fields {
            let leaf = translate_operator(op, operand)?;
            result = Some(match result {
                Some(acc) => make_path_compose_m(acc, leaf)?,
                None => leaf,
            });
        }
    }
    result.ok_or_else(|| TranslateError::InvalidFilter(format!("空的操作符文档: {}", value)))
}

fn translate_operator(op: &str, operand: &serde_json::Value) -> TranslateResult<Abt> {
    let compare = match op {
        "$eq" => Operations::Eq,
        "$ne" => Operations::Neq,
        "$gt" => Operations::Gt,
        "$gte" => Operations::Gte,
        "$lt" => Operations::Lt,
        "$lte" => Operations::Lte,
        "$in" => return translate_in(operand),
        _ => return Err(TranslateError::UnsupportedOperator(op.to_string())),
    };
    Ok(make_path_compare_value(compare, Value::from(operand))?)
}

/// `$in` 翻译为等值比较的析取，空列表恒为假
fn translate_in(operand: &serde_json::Value) -> TranslateResult<Abt> {
    let items = operand
        .as_array()
        .ok_or_else(|| TranslateError::InvalidFilter(format!("$in 需要数组: {}", operand)))?;
    let mut result: Option<Abt> = None;
    for item in items {
        let leaf = make_path_compare_value(Operations::Eq, Value::from(item))?;
        result = Some(match result {
            Some(acc) => make_path_compose_a(acc, leaf)?,
            None => leaf,
        });
    }
    match result {
        Some(path) => Ok(path),
        None => Ok(make_path_bool(false)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::abt::{AbtNode, ExplainGenerator};
    use serde_json::json;

    #[test]
    fn test_simple_equality() {
        let path = translate_filter(&json!({"a": 5})).expect("翻译应该成功");
        assert_eq!(
            ExplainGenerator::explain_compact(&path),
            "PathGet [a](PathTraverse(PathCompare [Eq](Const [5])))"
        );
    }

    #[test]
    fn test_range_and_dotted_path() {
        let path = translate_filter(&json!({"a.b": {"$gt": 1, "$lte": 9}})).expect("翻译应该成功");
        let text = ExplainGenerator::explain_compact(&path);
        assert!(text.starts_with("PathGet [a](PathTraverse(PathGet [b](PathTraverse(PathComposeM("));
        assert!(text.contains("PathCompare [Gt](Const [1])"));
        assert!(text.contains("PathCompare [Lte](Const [9])"));
    }

    #[test]
    fn test_logical_operators() {
        let path = translate_filter(&json!({"$or": [{"a": 1}, {"b": 2}]})).expect("翻译应该成功");
        assert!(matches!(path.node(), AbtNode::PathComposeA(_, _)));
        let path = translate_filter(&json!({"a": 1, "b": 2})).expect("翻译应该成功");
        assert!(matches!(path.node(), AbtNode::PathComposeM(_, _)));
    }

    #[test]
    fn test_empty_in_and_empty_document() {
        let empty_in = translate_filter(&json!({"a": {"$in": []}})).expect("翻译应该成功");
        assert!(ExplainGenerator::explain_compact(&empty_in).contains("Const [false]"));
        let always = translate_filter(&json!({})).expect("翻译应该成功");
        assert!(ExplainGenerator::explain_compact(&always).contains("Const [true]"));
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(
            translate_filter(&json!({"a": {"$regex": "x"}})),
            Err(TranslateError::UnsupportedOperator(_))
        ));
        assert!(matches!(
            translate_filter(&json!({"a..b": 1})),
            Err(TranslateError::MalformedFieldPath(_))
        ));
        assert!(matches!(
            translate_filter(&json!({"a": {"$gt": 1, "b": 2}})),
            Err(TranslateError::InvalidFilter(_))
        ));
        assert!(matches!(translate_filter(&json!(5)), Err(TranslateError::InvalidFilter(_))));
        assert!(matches!(
            translate_filter(&json!({"$nor": [{"a": 1}]})),
            Err(TranslateError::UnsupportedOperator(_))
        ));
    }
}
