//! DocPlan - 文档集合的基于代价的查询优化核心
//!
//! 把聚合管道翻译为统一的代数化树，在备忘录中探索等价方案，
//! 按代价选出物理计划，并降级为可由执行引擎运行的槽位计划。

pub mod config;
pub mod core;
pub mod query;
pub mod utils;
