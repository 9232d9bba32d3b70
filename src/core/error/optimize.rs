//! 优化与降级错误类型
//!
//! 优化失败和降级失败都以编译失败状态返回给调用方，绝不返回部分可用的执行器

use thiserror::Error;

use super::expression::AbtError;

/// 优化器错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    /// 输入树引用了未绑定的变量
    #[error("输入树包含自由变量: {0}")]
    FreeVariables(String),

    /// 超出探索迭代次数上限
    #[error("超出迭代次数上限: {0}")]
    IterationLimit(usize),

    /// 在要求的物理属性下没有可行计划
    #[error("未找到物理计划: {0}")]
    NoPlan(String),

    /// 引用了元数据中不存在的扫描定义
    #[error("未知的扫描定义: {0}")]
    UnknownScanDefinition(String),

    /// 规则应用错误
    #[error("规则应用错误: {0}")]
    RuleApplication(String),

    #[error("ABT 构造错误: {0}")]
    Abt(#[from] AbtError),
}

/// 优化器结果类型
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// 降级错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoweringError {
    #[error("没有可降级的计划")]
    NullPlan,

    #[error("降级后的计划没有输出槽位")]
    NoOutputSlots,

    #[error("变量未绑定到槽位: {0}")]
    UnboundVariable(String),

    /// 逻辑节点不应出现在获胜的物理计划中
    #[error("逻辑节点不能被降级: {0}")]
    LogicalNode(String),

    #[error("不支持降级的节点: {0}")]
    UnsupportedNode(String),

    #[error("备忘录引用无效: {0}")]
    InvalidMemoReference(String),
}

/// 降级结果类型
pub type LoweringResult<T> = Result<T, LoweringError>;
