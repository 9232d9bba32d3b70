use super::types::Value;
use std::cmp::Ordering as CmpOrdering;

// 手动实现PartialEq：数值跨宽度按数值相等，NaN 与 NaN 视为相等
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.iter().cmp(b.iter()),
            (Value::Array(a), Value::Array(b)) => a.iter().cmp(b.iter()),
            (a, b) if a.is_number() && b.is_number() => Self::cmp_numbers(a, b),
            // 不同类型之间的比较：基于类型优先级
            (a, b) => a.type_tag().cmp(&b.type_tag()),
        }
    }
}

impl Value {
    fn cmp_numbers(a: &Value, b: &Value) -> CmpOrdering {
        if let (Some(x), Some(y)) = (Self::exact_i64(a), Self::exact_i64(b)) {
            return x.cmp(&y);
        }
        let x = a.as_f64().unwrap_or(f64::NAN);
        let y = b.as_f64().unwrap_or(f64::NAN);
        Self::cmp_f64(x, y)
    }

    fn exact_i64(v: &Value) -> Option<i64> {
        match v {
            Value::Int32(x) => Some(*x as i64),
            Value::Int64(x) => Some(*x),
            _ => None,
        }
    }

    /// NaN 小于所有其它数值
    fn cmp_f64(a: f64, b: f64) -> CmpOrdering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => CmpOrdering::Equal,
            (true, false) => CmpOrdering::Less,
            (false, true) => CmpOrdering::Greater,
            (false, false) => a.partial_cmp(&b).unwrap_or(CmpOrdering::Equal),
        }
    }

    /// 三路比较，返回 -1 / 0 / 1
    pub fn compare3w(&self, other: &Value) -> i32 {
        match self.cmp(other) {
            CmpOrdering::Less => -1,
            CmpOrdering::Equal => 0,
            CmpOrdering::Greater => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_compare_across_widths() {
        assert_eq!(Value::Int32(5), Value::Int64(5));
        assert_eq!(Value::Int64(5), Value::Double(5.0));
        assert!(Value::Int32(4) < Value::Double(4.5));
    }

    #[test]
    fn test_canonical_type_order() {
        assert!(Value::MinKey < Value::Null);
        assert!(Value::Null < Value::Int32(-100));
        assert!(Value::Int64(i64::MAX) < Value::str(""));
        assert!(Value::str("z") < Value::empty_object());
        assert!(Value::empty_array() < Value::Bool(false));
        assert!(Value::Bool(true) < Value::MaxKey);
    }

    #[test]
    fn test_nan_is_smallest_number() {
        assert!(Value::Double(f64::NAN) < Value::Int32(i32::MIN));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }
}
