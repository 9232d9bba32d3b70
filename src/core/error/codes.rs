//! 对外错误码定义
//!
//! 调用方把编译失败转换为面向用户的命令失败时使用这些错误码
//!
//! 错误码格式: XXYY
//! - XX: 错误类别 (00=成功, 01=翻译, 02=执行, 03=元数据, 04=规划, 09=系统)
//! - YY: 具体错误

use serde::{Deserialize, Serialize};

/// 对外错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Success = 0,

    // ==================== 翻译错误 (01xx) ====================
    /// 无效的管道
    InvalidPipeline = 100,
    /// 不支持的操作符
    UnsupportedOperator = 101,
    /// 无效的字段路径
    InvalidFieldPath = 102,

    // ==================== 执行错误 (02xx) ====================
    /// 通用执行错误
    ExecutionError = 200,
    /// 执行被中断
    Interrupted = 201,
    /// 执行器生命周期误用
    InvalidExecutorState = 202,

    // ==================== 元数据错误 (03xx) ====================
    /// 目录契约违反
    CatalogContractViolation = 300,
    /// 非法的树构造
    IllegalTree = 301,

    // ==================== 规划错误 (04xx) ====================
    /// 优化失败
    OptimizationFailed = 400,
    /// 降级失败
    LoweringFailed = 401,

    // ==================== 系统错误 (09xx) ====================
    /// 配置错误
    ConfigError = 900,
    /// 内部错误
    InternalError = 901,
}

impl ErrorCode {
    /// 获取错误码的 i32 值
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_i32() {
            0 => ErrorCategory::Success,
            100..=199 => ErrorCategory::Translation,
            200..=299 => ErrorCategory::Execution,
            300..=399 => ErrorCategory::Metadata,
            400..=499 => ErrorCategory::Planning,
            _ => ErrorCategory::System,
        }
    }

    /// 获取默认的错误消息
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "成功",
            ErrorCode::InvalidPipeline => "无效的管道",
            ErrorCode::UnsupportedOperator => "不支持的操作符",
            ErrorCode::InvalidFieldPath => "无效的字段路径",
            ErrorCode::ExecutionError => "执行错误",
            ErrorCode::Interrupted => "执行被中断",
            ErrorCode::InvalidExecutorState => "执行器状态无效",
            ErrorCode::CatalogContractViolation => "目录契约违反",
            ErrorCode::IllegalTree => "非法的树构造",
            ErrorCode::OptimizationFailed => "优化失败",
            ErrorCode::LoweringFailed => "降级失败",
            ErrorCode::ConfigError => "配置错误",
            ErrorCode::InternalError => "内部错误",
        }
    }

    /// 判断是否为调用方输入导致的错误
    pub fn is_client_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Translation)
    }

    /// 元数据错误表示目录数据已损坏，进程不应继续假装一切正常
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::CatalogContractViolation)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.as_i32(), self.default_message())
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Success,
    Translation,
    Execution,
    Metadata,
    Planning,
    System,
}

/// 对外错误信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicError {
    pub code: ErrorCode,
    pub message: String,
}

impl PublicError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 使用默认消息创建错误
    pub fn with_default_message(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
        }
    }
}

/// 内部错误到对外错误的转换 trait
pub trait ToPublicError {
    /// 获取对外错误码
    fn to_error_code(&self) -> ErrorCode;

    /// 转换为对外错误
    fn to_public_error(&self) -> PublicError;
}
