//! 统一错误处理系统
//!
//! ## 设计理念
//!
//! 1. **按子系统划分**：每个子系统拥有自己的 `thiserror` 枚举
//!    - ABT 构造 (`AbtError`)、元数据契约 (`MetadataError`)、翻译 (`TranslateError`)
//!    - 优化 (`OptimizerError`)、降级 (`LoweringError`)、执行 (`ExecError`)
//!
//! 2. **致命与可恢复分离**：单个索引的不支持形态在翻译层就地排除，
//!    目录契约违反以 `MetadataError` 返回并终止编译
//!
//! 3. **统一接口**：`CompileResult<T>` 是编译驱动的统一返回类型，
//!    子系统错误通过 `#[from]` 自动转换

use thiserror::Error;

pub mod codes;
pub mod expression;
pub mod optimize;
pub mod other;
pub mod query;
pub mod validation;

pub use codes::{ErrorCategory, ErrorCode, PublicError, ToPublicError};
pub use expression::{AbtError, AbtResult};
pub use optimize::{LoweringError, LoweringResult, OptimizerError, OptimizerResult};
pub use other::{ExecError, ExecResult};
pub use query::{TranslateError, TranslateResult};
pub use validation::{MetadataError, MetadataResult};

/// 查询编译错误
///
/// 编译是全有或全无的：任何一步失败都不会返回执行器
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("ABT 构造错误: {0}")]
    Abt(#[from] AbtError),

    #[error("元数据错误: {0}")]
    Metadata(#[from] MetadataError),

    #[error("翻译错误: {0}")]
    Translate(#[from] TranslateError),

    #[error("优化失败: {0}")]
    Optimization(#[from] OptimizerError),

    #[error("降级失败: {0}")]
    Lowering(#[from] LoweringError),

    #[error("执行错误: {0}")]
    Exec(#[from] ExecError),

    #[error("配置错误: {0}")]
    Config(String),
}

/// 编译结果类型
pub type CompileResult<T> = Result<T, CompileError>;

impl ToPublicError for CompileError {
    fn to_error_code(&self) -> ErrorCode {
        match self {
            CompileError::Abt(_) => ErrorCode::IllegalTree,
            CompileError::Metadata(_) => ErrorCode::CatalogContractViolation,
            CompileError::Translate(e) => match e {
                TranslateError::UnsupportedOperator(_) => ErrorCode::UnsupportedOperator,
                TranslateError::MalformedFieldPath(_) => ErrorCode::InvalidFieldPath,
                TranslateError::Abt(_) => ErrorCode::IllegalTree,
                _ => ErrorCode::InvalidPipeline,
            },
            CompileError::Optimization(_) => ErrorCode::OptimizationFailed,
            CompileError::Lowering(_) => ErrorCode::LoweringFailed,
            CompileError::Exec(e) => match e {
                ExecError::Interrupted => ErrorCode::Interrupted,
                ExecError::Engine(_) => ErrorCode::ExecutionError,
                _ => ErrorCode::InvalidExecutorState,
            },
            CompileError::Config(_) => ErrorCode::ConfigError,
        }
    }

    fn to_public_error(&self) -> PublicError {
        PublicError::new(self.to_error_code(), self.to_string())
    }
}
