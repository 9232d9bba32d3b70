//! 翻译层错误类型
//!
//! 涵盖管道解析、过滤文档翻译和字段路径分解过程中的错误

use thiserror::Error;

use super::expression::AbtError;

/// 翻译结果类型别名
pub type TranslateResult<T> = Result<T, TranslateError>;

/// 翻译错误
///
/// 出现在部分过滤表达式中时只会导致单个索引被排除，不会上升为编译失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("未知的管道阶段: {0}")]
    UnknownStage(String),

    #[error("无效的管道阶段 {stage}: {reason}")]
    InvalidStage { stage: String, reason: String },

    #[error("不支持的操作符: {0}")]
    UnsupportedOperator(String),

    #[error("无效的字段路径: {0}")]
    MalformedFieldPath(String),

    #[error("无效的过滤文档: {0}")]
    InvalidFilter(String),

    #[error("ABT 构造错误: {0}")]
    Abt(#[from] AbtError),
}

impl TranslateError {
    pub fn invalid_stage(stage: &str, reason: impl Into<String>) -> Self {
        TranslateError::InvalidStage {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}
