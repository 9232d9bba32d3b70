//! 基于代价的查询优化器
//!
//! 提供逻辑改写、备忘录探索、物理实现和代价选择
//!
//! ## 模块结构
//!
//! - `hints` - 每次编译读取一次的优化提示
//! - `prefix_id` - 新投影名称生成器
//! - `const_eval` - 常量折叠
//! - `ce` - 基数估计（启发式与采样）
//! - `cost` - 代价模型
//! - `memo` - 备忘录：分组、逻辑属性与物理优化结果
//! - `rewrites` - 逻辑改写与探索规则
//! - `implementers` - 逻辑节点的物理实现与分布强制
//! - `phase_manager` - 优化阶段调度
//!
//! ## 使用示例
//!
//! ```rust
//! use docplan::query::abt::node::{make_root, make_scan};
//! use docplan::query::metadata::{DistributionAndPaths, Metadata, ScanDefinition};
//! use docplan::query::optimizer::{
//!     DefaultCosting, HeuristicCe, OptPhase, OptPhaseManager, PrefixId, QueryHints,
//! };
//! use std::collections::BTreeMap;
//!
//! let mut metadata = Metadata::empty();
//! let def = ScanDefinition::new(
//!     BTreeMap::new(),
//!     BTreeMap::new(),
//!     DistributionAndPaths::centralized(),
//!     true,
//!     100.0,
//! );
//! metadata.add_scan_definition("coll", def).unwrap();
//!
//! let tree = make_root(vec!["scan_0".to_string()], make_scan("scan_0", "coll").unwrap()).unwrap();
//! let mut manager = OptPhaseManager::new(
//!     OptPhase::all(),
//!     PrefixId::new(),
//!     QueryHints::default(),
//!     metadata,
//!     Box::new(HeuristicCe::new()),
//!     Box::new(DefaultCosting::default()),
//! );
//! assert!(manager.optimize(&tree));
//! assert!(manager.optimized_plan().is_some());
//! ```

pub mod ce;
pub mod const_eval;
pub mod cost;
pub mod hints;
pub mod implementers;
pub mod memo;
pub mod phase_manager;
pub mod prefix_id;
pub mod rewrites;

// 重新导出主要类型
pub use ce::{CardinalityEstimator, HeuristicCe, SamplingCe};
pub use const_eval::const_eval;
pub use cost::{CostCoefficients, CostContext, CostModel, CostType, DefaultCosting, NodeCost};
pub use hints::{DisableIndexOptions, QueryHints};
pub use memo::{Group, LogicalProps, Memo, MemoStats, PhysNodeInfo, PhysOptResult, PhysProps};
pub use phase_manager::{OptPhase, OptPhaseManager};
pub use prefix_id::PrefixId;
pub use rewrites::{ExplorationRule, RewriteRule, RuleSet};
