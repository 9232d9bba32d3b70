//! serde_json 与常量值之间的转换
//!
//! 目录中的文档（键模式、部分过滤表达式）以及结果文档都以 JSON 表示

use super::types::Value;
use std::collections::BTreeMap;

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if let Ok(small) = i32::try_from(i) {
                        Value::Int32(small)
                    } else {
                        Value::Int64(i)
                    }
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from(&json)
    }
}

impl Value {
    /// 转换为 JSON；`Nothing`、`MinKey`、`MaxKey` 没有 JSON 对应物，返回 None
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Nothing | Value::MinKey | Value::MaxKey => return None,
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int32(v) => serde_json::Value::from(*v),
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().filter_map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                    .collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_numbers() {
        assert!(matches!(Value::from(json!(5)), Value::Int32(5)));
        assert!(matches!(Value::from(json!(5_000_000_000i64)), Value::Int64(_)));
        assert!(matches!(Value::from(json!(1.5)), Value::Double(_)));
    }

    #[test]
    fn test_json_roundtrip_of_document() {
        let doc = json!({"a": 1, "b": {"c": [1, "x", null]}});
        let value = Value::from(&doc);
        assert_eq!(value.to_json(), Some(doc));
    }

    #[test]
    fn test_sentinels_have_no_json() {
        assert_eq!(Value::MinKey.to_json(), None);
        assert_eq!(Value::Nothing.to_json(), None);
    }
}
