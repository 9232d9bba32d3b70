//! 执行器错误类型
//!
//! 涵盖执行器生命周期误用、中断和执行引擎失败

use thiserror::Error;

/// 执行器错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("执行器未附加到执行上下文")]
    NotAttached,

    #[error("执行器已附加到执行上下文")]
    AlreadyAttached,

    #[error("执行器已释放")]
    Disposed,

    #[error("执行被中断")]
    Interrupted,

    #[error("执行引擎错误: {0}")]
    Engine(String),
}

/// 执行器结果类型
pub type ExecResult<T> = Result<T, ExecError>;
