//! 采样基数估计
//!
//! 对主集合上的可下推谓词构造一个小的子计划：在去掉索引的元数据上扫描前 N 条记录并应用谓词，
//! 用满足谓词的比例估计选择性。子计划通过执行协作方真正运行，任何失败都退回启发式估计

use log::{debug, warn};
use parking_lot::Mutex;

use super::heuristic::HeuristicCe;
use super::{child_ce, CardinalityEstimator};
use crate::core::error::{CompileError, CompileResult, OptimizerError};
use crate::query::abt::node::{make_filter, make_limit_skip, make_root, make_scan};
use crate::query::abt::{Abt, AbtNode, ProjectionName};
use crate::query::exec::{ExecutionContext, ExecutionEngine, SlotLowering};
use crate::query::metadata::index_bounds::PartialSchemaRequirements;
use crate::query::metadata::Metadata;
use crate::query::optimizer::cost::DefaultCosting;
use crate::query::optimizer::hints::QueryHints;
use crate::query::optimizer::memo::Memo;
use crate::query::optimizer::phase_manager::{OptPhase, OptPhaseManager};
use crate::query::optimizer::prefix_id::PrefixId;
use crate::query::translate::requirements_to_filter;

/// 一次采样的结果，按扫描定义和需求结构比较
struct SampledSelectivity {
    scan_def_name: String,
    reqs: PartialSchemaRequirements,
    selectivity: f64,
}

/// 采样基数估计器
pub struct SamplingCe<'a> {
    engine: &'a dyn ExecutionEngine,
    sample_size: usize,
    fallback: HeuristicCe,
    cache: Mutex<Vec<SampledSelectivity>>,
}

impl<'a> SamplingCe<'a> {
    pub fn new(engine: &'a dyn ExecutionEngine, sample_size: usize) -> Self {
        Self {
            engine,
            sample_size: sample_size.max(1),
            fallback: HeuristicCe::new(),
            cache: Mutex::new(Vec::new()),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// 已缓存的采样结果数
    pub fn cached_estimates(&self) -> usize {
        self.cache.lock().len()
    }

    fn cached(&self, scan_def_name: &str, reqs: &PartialSchemaRequirements) -> Option<f64> {
        self.cache
            .lock()
            .iter()
            .find(|entry| entry.scan_def_name == scan_def_name && entry.reqs == *reqs)
            .map(|entry| entry.selectivity)
    }

    /// 在样本上估计谓词的选择性
    fn sample_selectivity(
        &self,
        metadata: &Metadata,
        scan_def_name: &str,
        scan_projection: &ProjectionName,
        reqs: &PartialSchemaRequirements,
        scan_ce: f64,
    ) -> CompileResult<f64> {
        let Some(filter) = requirements_to_filter(reqs)? else {
            return Ok(1.0);
        };
        let sample = self.sample_size as u64;
        let plan = make_root(
            vec![scan_projection.clone()],
            make_filter(
                filter,
                make_limit_skip(Some(sample), 0, make_scan(scan_projection.clone(), scan_def_name)?)?,
            )?,
        )?;

        let mut phase_manager = OptPhaseManager::new(
            OptPhase::all(),
            PrefixId::new(),
            QueryHints::default(),
            metadata.without_indexes(),
            Box::new(HeuristicCe::new()),
            Box::new(DefaultCosting::default()),
        );
        if !phase_manager.optimize(&plan) {
            let err = phase_manager
                .last_error()
                .cloned()
                .unwrap_or_else(|| OptimizerError::NoPlan("采样子计划".to_string()));
            return Err(CompileError::Optimization(err));
        }
        let optimized = phase_manager
            .optimized_plan()
            .ok_or_else(|| OptimizerError::NoPlan("采样子计划".to_string()))?;
        let lowered = SlotLowering::new(phase_manager.metadata())
            .with_resolver(phase_manager.memo())
            .lower(optimized)?;

        let mut cursor = self.engine.open(&lowered, &ExecutionContext::default())?;
        let mut matched = 0u64;
        while matched < sample && cursor.next()?.is_some() {
            matched += 1;
        }
        let sampled = (sample as f64).min(scan_ce);
        Ok((matched as f64 / sampled).min(1.0))
    }
}

impl CardinalityEstimator for SamplingCe<'_> {
    fn derive_ce(&self, metadata: &Metadata, memo: &Memo, node: &Abt) -> f64 {
        let AbtNode::Sargable {
            reqs,
            scan_projection,
            child,
            ..
        } = node.node()
        else {
            return self.fallback.derive_ce(metadata, memo, node);
        };
        let AbtNode::MemoLogicalDelegator(child_group) = child.node() else {
            return self.fallback.derive_ce(metadata, memo, node);
        };
        // 只对直接位于主扫描之上的谓词采样
        let indexing = memo
            .group(*child_group)
            .and_then(|g| g.logical_props.indexing.as_ref())
            .filter(|ia| ia.scan_group == *child_group);
        let Some(indexing) = indexing else {
            return self.fallback.derive_ce(metadata, memo, node);
        };
        let scan_ce = match metadata.scan_def(&indexing.scan_def_name) {
            Some(def) if def.has_known_ce() && def.ce() > 0.0 => def.ce(),
            _ => return self.fallback.derive_ce(metadata, memo, node),
        };

        let scan_def_name = indexing.scan_def_name.as_str();
        let selectivity = match self.cached(scan_def_name, reqs) {
            Some(s) => s,
            None => match self.sample_selectivity(metadata, scan_def_name, scan_projection, reqs, scan_ce) {
                Ok(s) => {
                    debug!("采样选择性 {}|{} = {:.4}", scan_def_name, reqs, s);
                    self.cache.lock().push(SampledSelectivity {
                        scan_def_name: scan_def_name.to_string(),
                        reqs: reqs.clone(),
                        selectivity: s,
                    });
                    s
                }
                Err(e) => {
                    warn!("采样基数估计失败, 使用启发式估计: {}", e);
                    return self.fallback.derive_ce(metadata, memo, node);
                }
            },
        };
        selectivity * child_ce(memo, child)
    }
}
