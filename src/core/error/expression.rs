//! ABT 构造错误类型
//!
//! 工厂函数在接受子树之前检查其语法类别，违反约束时立即返回错误，
//! 不会产生类别错误的树

use thiserror::Error;

/// ABT 构造错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbtError {
    /// 子节点语法类别与节点要求不符
    #[error("{node} 的第 {position} 个子节点期望为 {expected}, 实际为 {actual}")]
    SortMismatch {
        node: &'static str,
        position: usize,
        expected: String,
        actual: String,
    },

    /// 绑定器的名称数量与表达式数量不一致
    #[error("绑定器名称与表达式数量不一致: {names} 个名称, {exprs} 个表达式")]
    BinderArity { names: usize, exprs: usize },

    /// 绑定器中出现重复名称
    #[error("绑定器中存在重复名称: {0}")]
    DuplicateBinding(String),

    /// 其他非法构造
    #[error("非法构造: {0}")]
    IllegalConstruction(String),
}

/// ABT 构造结果类型
pub type AbtResult<T> = Result<T, AbtError>;

impl AbtError {
    pub fn sort_mismatch(
        node: &'static str,
        position: usize,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        AbtError::SortMismatch {
            node,
            position,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_mismatch_message() {
        let err = AbtError::sort_mismatch("EvalPath", 0, "Path", "Expression");
        let msg = err.to_string();
        assert!(msg.contains("EvalPath"));
        assert!(msg.contains("Path"));
    }
}
