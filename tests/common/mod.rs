//! 集成测试共享工具模块
//!
//! 提供测试目录、模拟执行引擎和断言辅助函数，供所有集成测试使用

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

use std::sync::Arc;

use docplan::core::ExecResult;
use docplan::query::exec::{ExecutionContext, ExecutionEngine, LoweredPlan, RowCursor};
use parking_lot::Mutex;

/// 返回预置结果行的执行引擎
///
/// 记录每次打开的计划，便于断言采样子计划和主计划的形状
#[derive(Default)]
pub struct MockEngine {
    rows: Vec<serde_json::Value>,
    opened: Mutex<Vec<LoweredPlan>>,
}

impl MockEngine {
    pub fn new(rows: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            opened: Mutex::new(Vec::new()),
        })
    }

    /// 打开过的计划数
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn opened_plans(&self) -> Vec<LoweredPlan> {
        self.opened.lock().clone()
    }
}

struct MockCursor {
    rows: std::vec::IntoIter<serde_json::Value>,
}

impl RowCursor for MockCursor {
    fn next(&mut self) -> ExecResult<Option<serde_json::Value>> {
        Ok(self.rows.next())
    }
}

impl ExecutionEngine for MockEngine {
    fn open(&self, plan: &LoweredPlan, _ctx: &ExecutionContext) -> ExecResult<Box<dyn RowCursor>> {
        self.opened.lock().push(plan.clone());
        Ok(Box::new(MockCursor {
            rows: self.rows.clone().into_iter(),
        }))
    }
}
