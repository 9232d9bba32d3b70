//! 计划执行器
//!
//! 编译的最终产物。执行器在附加到执行上下文之后按需拉取结果，
//! 结果序列是惰性的、有限的、不可重启的

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Serialize;

use super::slot_plan::LoweredPlan;
use crate::config::OptimizerConfig;
use crate::core::error::{ExecError, ExecResult};
use crate::query::optimizer::memo::MemoStats;

/// 执行引擎协作方
///
/// 真正的行级执行由外部引擎完成，这里只约定打开游标的接口
pub trait ExecutionEngine: Send + Sync {
    /// 为降级后的计划打开一个结果游标
    fn open(&self, plan: &LoweredPlan, ctx: &ExecutionContext) -> ExecResult<Box<dyn RowCursor>>;
}

/// 结果游标
pub trait RowCursor: Send {
    /// 取下一行，`None` 表示结果已耗尽
    fn next(&mut self) -> ExecResult<Option<serde_json::Value>>;

    /// 让出前保存状态
    fn save_state(&mut self) -> ExecResult<()> {
        Ok(())
    }

    /// 让出后恢复状态
    fn restore_state(&mut self) -> ExecResult<()> {
        Ok(())
    }
}

/// 协作式让出策略：处理一定行数或经过一定时间后让出一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldPolicy {
    pub iterations: u64,
    pub period: Duration,
}

impl YieldPolicy {
    pub fn new(iterations: u64, period: Duration) -> Self {
        Self { iterations, period }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(
            config.exec_yield_iterations,
            Duration::from_millis(config.exec_yield_period_ms),
        )
    }

    /// 是否应该让出
    pub fn should_yield(&self, rows_since_yield: u64, since_yield: Duration) -> bool {
        (self.iterations > 0 && rows_since_yield >= self.iterations) || since_yield >= self.period
    }
}

impl Default for YieldPolicy {
    fn default() -> Self {
        Self::new(1000, Duration::from_millis(10))
    }
}

/// 执行上下文
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    interrupt: Arc<AtomicBool>,
    /// 是否收集 explain 信息
    pub explain: bool,
    /// 是否收集执行耗时
    pub profile: bool,
    pub yield_policy: YieldPolicy,
}

impl ExecutionContext {
    pub fn new(yield_policy: YieldPolicy) -> Self {
        Self {
            yield_policy,
            ..Default::default()
        }
    }

    /// 请求中断，所有共享该标志的上下文都会看到
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// 中断标志句柄
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }
}

/// 备忘录摘要
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoSummary {
    pub groups: usize,
    pub logical_nodes: usize,
    pub physical_nodes: usize,
    pub stats: MemoStats,
}

/// 编译过程的可解释产物
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExplainArtifact {
    /// 翻译后的逻辑 ABT
    pub translated: String,
    /// 优化后的物理 ABT
    pub optimized: String,
    pub slot_plan: String,
    pub memo: MemoSummary,
    /// 获胜计划的代价
    pub cost: String,
    /// 保留的被淘汰计划
    pub rejected_plans: Vec<String>,
}

impl ExplainArtifact {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// 执行器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Detached,
    Attached,
    Disposed,
}

/// 计划执行器
pub struct PlanExecutor {
    plan: LoweredPlan,
    engine: Arc<dyn ExecutionEngine>,
    explain: ExplainArtifact,
    state: ExecutorState,
    ctx: Option<ExecutionContext>,
    cursor: Option<Box<dyn RowCursor>>,
    exhausted: bool,
    rows_returned: u64,
    rows_since_yield: u64,
    last_yield: Instant,
    yields: u64,
    elapsed: Duration,
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("state", &self.state)
            .field("rows_returned", &self.rows_returned)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl PlanExecutor {
    pub fn new(plan: LoweredPlan, engine: Arc<dyn ExecutionEngine>, explain: ExplainArtifact) -> Self {
        Self {
            plan,
            engine,
            explain,
            state: ExecutorState::Detached,
            ctx: None,
            cursor: None,
            exhausted: false,
            rows_returned: 0,
            rows_since_yield: 0,
            last_yield: Instant::now(),
            yields: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn plan(&self) -> &LoweredPlan {
        &self.plan
    }

    pub fn explain(&self) -> &ExplainArtifact {
        &self.explain
    }

    /// 已返回的行数
    pub fn rows_returned(&self) -> u64 {
        self.rows_returned
    }

    /// 累计执行耗时，只在 explain 或 profile 打开时统计
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// 让出次数
    pub fn yields(&self) -> u64 {
        self.yields
    }

    /// 附加到执行上下文
    pub fn attach(&mut self, ctx: ExecutionContext) -> ExecResult<()> {
        match self.state {
            ExecutorState::Disposed => Err(ExecError::Disposed),
            ExecutorState::Attached => Err(ExecError::AlreadyAttached),
            ExecutorState::Detached => {
                if let Some(cursor) = self.cursor.as_mut() {
                    cursor.restore_state()?;
                }
                self.ctx = Some(ctx);
                self.state = ExecutorState::Attached;
                self.last_yield = Instant::now();
                Ok(())
            }
        }
    }

    /// 从执行上下文分离，游标状态被保存，之后可以重新附加
    pub fn detach(&mut self) -> ExecResult<()> {
        match self.state {
            ExecutorState::Disposed => Err(ExecError::Disposed),
            ExecutorState::Detached => Err(ExecError::NotAttached),
            ExecutorState::Attached => {
                if let Some(cursor) = self.cursor.as_mut() {
                    cursor.save_state()?;
                }
                self.ctx = None;
                self.state = ExecutorState::Detached;
                Ok(())
            }
        }
    }

    /// 取下一个结果
    ///
    /// 第一次调用时才打开游标；结果耗尽后始终返回 `None`
    pub fn get_next(&mut self) -> ExecResult<Option<serde_json::Value>> {
        let ctx = match (self.state, self.ctx.as_ref()) {
            (ExecutorState::Disposed, _) => return Err(ExecError::Disposed),
            (ExecutorState::Attached, Some(ctx)) => ctx.clone(),
            _ => return Err(ExecError::NotAttached),
        };
        if self.exhausted {
            return Ok(None);
        }
        if ctx.is_interrupted() {
            return Err(ExecError::Interrupted);
        }

        let timed = ctx.explain || ctx.profile;
        let start = timed.then(Instant::now);

        if self.cursor.is_none() {
            debug!("打开结果游标, 结果槽位 {}", self.plan.result_slot);
            self.cursor = Some(self.engine.open(&self.plan, &ctx)?);
        }

        self.maybe_yield(&ctx)?;

        let next = match self.cursor.as_mut() {
            Some(cursor) => cursor.next()?,
            None => None,
        };
        match next {
            Some(_) => {
                self.rows_returned += 1;
                self.rows_since_yield += 1;
            }
            None => {
                self.exhausted = true;
                self.cursor = None;
            }
        }
        if let Some(start) = start {
            self.elapsed += start.elapsed();
        }
        Ok(next)
    }

    fn maybe_yield(&mut self, ctx: &ExecutionContext) -> ExecResult<()> {
        if !ctx
            .yield_policy
            .should_yield(self.rows_since_yield, self.last_yield.elapsed())
        {
            return Ok(());
        }
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.save_state()?;
            if ctx.is_interrupted() {
                return Err(ExecError::Interrupted);
            }
            cursor.restore_state()?;
        }
        self.yields += 1;
        self.rows_since_yield = 0;
        self.last_yield = Instant::now();
        Ok(())
    }

    /// 释放执行器，之后所有操作都返回 `Disposed`
    pub fn dispose(&mut self) {
        if self.state != ExecutorState::Disposed {
            info!(
                "执行器释放: 返回 {} 行, 让出 {} 次, 耗时 {:?}",
                self.rows_returned, self.yields, self.elapsed
            );
        }
        self.cursor = None;
        self.ctx = None;
        self.state = ExecutorState::Disposed;
    }
}

impl Iterator for PlanExecutor {
    type Item = ExecResult<serde_json::Value>;

    /// 出错后迭代结束
    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.get_next() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.exhausted = true;
                self.cursor = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::exec::slot_plan::{SlotId, SlotStage, SlotVarMap};
    use parking_lot::Mutex;
    use serde_json::json;

    struct VecCursor {
        rows: std::vec::IntoIter<serde_json::Value>,
        saves: Arc<Mutex<u32>>,
    }

    impl RowCursor for VecCursor {
        fn next(&mut self) -> ExecResult<Option<serde_json::Value>> {
            Ok(self.rows.next())
        }

        fn save_state(&mut self) -> ExecResult<()> {
            *self.saves.lock() += 1;
            Ok(())
        }
    }

    struct VecEngine {
        rows: Vec<serde_json::Value>,
        opens: Arc<Mutex<u32>>,
        saves: Arc<Mutex<u32>>,
    }

    impl ExecutionEngine for VecEngine {
        fn open(&self, _plan: &LoweredPlan, _ctx: &ExecutionContext) -> ExecResult<Box<dyn RowCursor>> {
            *self.opens.lock() += 1;
            Ok(Box::new(VecCursor {
                rows: self.rows.clone().into_iter(),
                saves: self.saves.clone(),
            }))
        }
    }

    fn executor(rows: Vec<serde_json::Value>) -> (PlanExecutor, Arc<Mutex<u32>>, Arc<Mutex<u32>>) {
        let opens = Arc::new(Mutex::new(0));
        let saves = Arc::new(Mutex::new(0));
        let engine = VecEngine {
            rows,
            opens: opens.clone(),
            saves: saves.clone(),
        };
        let mut slot_map = SlotVarMap::new();
        slot_map.insert("scan_0".to_string(), SlotId(0));
        let plan = LoweredPlan {
            root: SlotStage::CoScan,
            slot_map,
            result_slot: SlotId(0),
        };
        (
            PlanExecutor::new(plan, Arc::new(engine), ExplainArtifact::default()),
            opens,
            saves,
        )
    }

    #[test]
    fn test_get_next_requires_attach() {
        let (mut exec, opens, _) = executor(vec![json!({"a": 1})]);
        assert_eq!(exec.get_next(), Err(ExecError::NotAttached));
        assert_eq!(*opens.lock(), 0);
    }

    #[test]
    fn test_lazy_finite_sequence() {
        let (mut exec, opens, _) = executor(vec![json!({"a": 1}), json!({"a": 2})]);
        exec.attach(ExecutionContext::default()).expect("附加应该成功");
        assert_eq!(*opens.lock(), 0);
        assert_eq!(exec.get_next(), Ok(Some(json!({"a": 1}))));
        assert_eq!(*opens.lock(), 1);
        assert_eq!(exec.get_next(), Ok(Some(json!({"a": 2}))));
        assert_eq!(exec.get_next(), Ok(None));
        assert_eq!(exec.get_next(), Ok(None));
        assert_eq!(exec.rows_returned(), 2);
        assert_eq!(*opens.lock(), 1);
    }

    #[test]
    fn test_attach_detach_lifecycle() {
        let (mut exec, _, saves) = executor(vec![json!(1), json!(2)]);
        assert_eq!(exec.detach(), Err(ExecError::NotAttached));
        exec.attach(ExecutionContext::default()).expect("附加应该成功");
        assert_eq!(
            exec.attach(ExecutionContext::default()),
            Err(ExecError::AlreadyAttached)
        );
        assert_eq!(exec.get_next(), Ok(Some(json!(1))));
        exec.detach().expect("分离应该成功");
        assert_eq!(*saves.lock(), 1);
        exec.attach(ExecutionContext::default()).expect("重新附加应该成功");
        assert_eq!(exec.get_next(), Ok(Some(json!(2))));

        exec.dispose();
        assert_eq!(exec.state(), ExecutorState::Disposed);
        assert_eq!(exec.get_next(), Err(ExecError::Disposed));
        assert_eq!(exec.attach(ExecutionContext::default()), Err(ExecError::Disposed));
    }

    #[test]
    fn test_interrupt_stops_iteration() {
        let (mut exec, _, _) = executor(vec![json!(1), json!(2)]);
        let ctx = ExecutionContext::default();
        let flag = ctx.interrupt_flag();
        exec.attach(ctx).expect("附加应该成功");
        assert_eq!(exec.next(), Some(Ok(json!(1))));
        flag.store(true, Ordering::SeqCst);
        assert_eq!(exec.next(), Some(Err(ExecError::Interrupted)));
        assert_eq!(exec.next(), None);
    }

    #[test]
    fn test_yield_policy_by_iterations() {
        let policy = YieldPolicy::new(2, Duration::from_secs(3600));
        assert!(!policy.should_yield(1, Duration::ZERO));
        assert!(policy.should_yield(2, Duration::ZERO));

        let (mut exec, _, saves) = executor(vec![json!(1), json!(2), json!(3), json!(4)]);
        exec.attach(ExecutionContext::new(policy)).expect("附加应该成功");
        let rows: Vec<_> = exec.by_ref().collect::<ExecResult<Vec<_>>>().expect("执行应该成功");
        assert_eq!(rows.len(), 4);
        assert!(exec.yields() >= 1);
        assert!(*saves.lock() >= 1);
    }

    #[test]
    fn test_explain_artifact_json() {
        let artifact = ExplainArtifact {
            translated: "Root".to_string(),
            cost: "1.000000".to_string(),
            ..Default::default()
        };
        let json = artifact.to_json();
        assert_eq!(json["translated"], "Root");
        assert_eq!(json["memo"]["groups"], 0);
    }
}
