//! 降级与执行器组装
//!
//! - 槽位计划 (`slot_plan`)
//! - 物理 ABT 到槽位计划的降级 (`lower`)
//! - 执行引擎协作方接口与计划执行器 (`executor`)

pub mod executor;
pub mod lower;
pub mod slot_plan;

pub use executor::{
    ExecutionContext, ExecutionEngine, ExecutorState, ExplainArtifact, MemoSummary, PlanExecutor, RowCursor,
    YieldPolicy,
};
pub use lower::SlotLowering;
pub use slot_plan::{LoweredPlan, ScanSource, SlotExpr, SlotId, SlotIdGenerator, SlotStage, SlotVarMap};
