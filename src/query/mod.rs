// 查询编译模块
//
// 从聚合管道到可执行计划的完整流水线:
// - ABT 中间表示与元数据模型
// - 目录与管道翻译
// - 基于代价的优化
// - 降级与执行器组装

pub mod abt;
pub mod compile;
pub mod exec;
pub mod metadata;
pub mod optimizer;
pub mod translate;

pub use compile::{compile_pipeline, CompileRequest};
pub use exec::{ExecutionContext, ExecutionEngine, ExplainArtifact, PlanExecutor, RowCursor};
pub use crate::core::error::{CompileError, CompileResult};
