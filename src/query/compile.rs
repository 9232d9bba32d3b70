//! 查询编译驱动
//!
//! 把一条聚合管道编译为可执行的计划执行器：
//! 读取提示、在目录快照下构建元数据、翻译管道、优化、降级、组装执行器。
//! 编译是全有或全无的，任何一步失败都返回错误而不是部分可用的执行器

use std::sync::Arc;

use log::{debug, info};

use crate::config::OptimizerConfig;
use crate::core::error::{CompileError, CompileResult, OptimizerError};
use crate::query::abt::{Abt, ExplainGenerator};
use crate::query::exec::{ExplainArtifact, ExecutionEngine, MemoSummary, PlanExecutor, SlotLowering};
use crate::query::optimizer::{
    CardinalityEstimator, DefaultCosting, HeuristicCe, OptPhase, OptPhaseManager, PrefixId, SamplingCe,
};
use crate::query::translate::{build_metadata, translate_pipeline, Catalog, MetadataTranslation, Namespace, Pipeline};

/// 编译请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompileRequest {
    /// 主集合
    pub primary: Namespace,
    /// 管道涉及的其它集合
    pub involved: Vec<Namespace>,
    /// JSON 数组形式的管道
    pub pipeline: serde_json::Value,
}

impl CompileRequest {
    pub fn new(primary: Namespace, pipeline: serde_json::Value) -> Self {
        Self {
            primary,
            involved: Vec::new(),
            pipeline,
        }
    }

    pub fn with_involved(mut self, involved: Vec<Namespace>) -> Self {
        self.involved = involved;
        self
    }
}

/// 是否对这次编译启用采样基数估计
fn sampling_enabled(config: &OptimizerConfig, translation: &MetadataTranslation) -> bool {
    config.enable_sampling_ce
        && translation.primary_exists
        && translation
            .metadata
            .scan_def(&translation.scan_def_name)
            .is_some_and(|def| def.has_known_ce() && def.ce() > 0.0)
}

/// 编译管道
pub fn compile_pipeline(
    catalog: &dyn Catalog,
    engine: Arc<dyn ExecutionEngine>,
    config: &OptimizerConfig,
    request: &CompileRequest,
) -> CompileResult<PlanExecutor> {
    let hints = config.hints();
    let pipeline = Pipeline::parse(&request.pipeline)?;
    let mut prefix_id = PrefixId::new();

    // 快照只在元数据构建期间存活
    let translation = {
        let snapshot = catalog.snapshot();
        build_metadata(
            snapshot.as_ref(),
            &request.primary,
            &request.involved,
            &mut prefix_id,
            hints.disable_indexes,
            config.default_dop,
        )?
    };

    let initial = translation.initial_tree()?;
    let translated = translate_pipeline(&pipeline, &translation.scan_projection, initial, &mut prefix_id)?;
    debug!("翻译后的计划:\n{}", ExplainGenerator::explain(&translated));

    let ce: Box<dyn CardinalityEstimator + '_> = if sampling_enabled(config, &translation) {
        debug!("启用采样基数估计, 样本大小 {}", config.sample_size);
        Box::new(SamplingCe::new(engine.as_ref(), config.sample_size))
    } else {
        Box::new(HeuristicCe::new())
    };

    let mut manager = OptPhaseManager::new(
        OptPhase::all(),
        prefix_id,
        hints,
        translation.metadata.clone(),
        ce,
        Box::new(DefaultCosting::default()),
    )
    .with_iteration_limit(config.iteration_limit);

    if !manager.optimize(&translated) {
        let err = manager
            .last_error()
            .cloned()
            .unwrap_or_else(|| OptimizerError::NoPlan(request.primary.to_string()));
        return Err(CompileError::Optimization(err));
    }
    let optimized = manager
        .optimized_plan()
        .cloned()
        .ok_or_else(|| OptimizerError::NoPlan(request.primary.to_string()))?;

    let lowered = SlotLowering::new(manager.metadata())
        .with_resolver(manager.memo())
        .lower(&optimized)?;
    debug!("槽位计划:\n{}", lowered.explain());

    let explain = explain_artifact(&manager, &translated, &optimized, lowered.explain());
    info!(
        "编译完成: {} 个阶段, 主集合 {}, 代价 {}, 分组 {}",
        pipeline.stages().len(),
        request.primary,
        explain.cost,
        explain.memo.groups
    );
    drop(manager);

    Ok(PlanExecutor::new(lowered, engine, explain))
}

fn explain_artifact(
    manager: &OptPhaseManager<'_>,
    translated: &Abt,
    optimized: &Abt,
    slot_plan: String,
) -> ExplainArtifact {
    let memo = manager.memo();
    let rejected_plans = if manager.hints().keep_rejected_plans {
        memo.groups()
            .iter()
            .flat_map(|g| g.physical.iter())
            .flat_map(|r| r.rejected.iter())
            .map(|info| format!("{} [cost: {}]", ExplainGenerator::explain_compact(&info.node), info.cost))
            .collect()
    } else {
        Vec::new()
    };
    ExplainArtifact {
        translated: ExplainGenerator::explain(translated),
        optimized: ExplainGenerator::explain(optimized),
        slot_plan,
        memo: MemoSummary {
            groups: memo.group_count(),
            logical_nodes: memo.logical_node_count(),
            physical_nodes: memo.physical_node_count(),
            stats: *memo.stats(),
        },
        cost: manager
            .plan_cost()
            .map(|c| c.to_string())
            .unwrap_or_default(),
        rejected_plans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ExecResult, TranslateError};
    use crate::query::exec::{ExecutionContext, LoweredPlan, RowCursor};
    use crate::query::translate::{IndexCatalogEntry, IndexDescriptor, InMemoryCatalog};
    use serde_json::json;

    struct EmptyEngine;

    struct EmptyCursor;

    impl RowCursor for EmptyCursor {
        fn next(&mut self) -> ExecResult<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    impl ExecutionEngine for EmptyEngine {
        fn open(&self, _plan: &LoweredPlan, _ctx: &ExecutionContext) -> ExecResult<Box<dyn RowCursor>> {
            Ok(Box::new(EmptyCursor))
        }
    }

    fn catalog() -> (InMemoryCatalog, Namespace) {
        let catalog = InMemoryCatalog::new();
        let ns = Namespace::new("test", "coll");
        catalog.create_collection(ns.clone(), 1000);
        catalog.add_index(&ns, IndexCatalogEntry::new(IndexDescriptor::new("a_1", json!({"a": 1}))));
        (catalog, ns)
    }

    #[test]
    fn test_compile_equality_uses_index() {
        let (catalog, ns) = catalog();
        let request = CompileRequest::new(ns, json!([{"$match": {"a": 1}}]));
        let executor = compile_pipeline(&catalog, Arc::new(EmptyEngine), &OptimizerConfig::default(), &request)
            .expect("编译应该成功");
        assert!(executor.explain().optimized.contains("IndexScan"));
        assert!(executor.explain().slot_plan.contains("a_1"));
    }

    #[test]
    fn test_compile_invalid_pipeline() {
        let (catalog, ns) = catalog();
        let request = CompileRequest::new(ns, json!([{"$bogus": 1}]));
        let err = compile_pipeline(&catalog, Arc::new(EmptyEngine), &OptimizerConfig::default(), &request);
        assert!(matches!(
            err,
            Err(CompileError::Translate(TranslateError::UnknownStage(_)))
        ));
    }

    #[test]
    fn test_compile_disable_scan_without_index_fails() {
        let (catalog, ns) = catalog();
        let config = OptimizerConfig {
            disable_scan: true,
            ..Default::default()
        };
        let request = CompileRequest::new(ns, json!([{"$match": {"b": 1}}]));
        let err = compile_pipeline(&catalog, Arc::new(EmptyEngine), &config, &request);
        assert!(matches!(err, Err(CompileError::Optimization(_))));
    }
}
