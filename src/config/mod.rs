use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::query::optimizer::hints::{DisableIndexOptions, QueryHints};

/// 应用配置
///
/// `[log]` 段控制日志输出，`[optimizer]` 段是每次编译读取一次的提示与参数集合
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub optimizer: OptimizerConfig,
}

/// 日志配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "docplan".to_string(),
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_files: 5,
        }
    }
}

/// 优化器配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 禁止全表扫描
    pub disable_scan: bool,
    /// 索引禁用选项: "enabled" | "all" | "partial_only"
    pub disable_indexes: DisableIndexOptions,
    pub disable_hash_join_rid_intersect: bool,
    pub disable_merge_join_rid_intersect: bool,
    pub disable_group_by_and_union_rid_intersect: bool,
    /// 保留被淘汰的计划用于诊断
    pub keep_rejected_plans: bool,
    pub disable_branch_and_bound: bool,
    /// 并行度，1 表示单节点执行
    pub default_dop: usize,
    pub enable_sampling_ce: bool,
    /// 采样基数估计的样本大小
    pub sample_size: usize,
    /// 备忘录探索的迭代次数上限
    pub iteration_limit: usize,
    /// 执行器每处理多少行让出一次
    pub exec_yield_iterations: u64,
    /// 执行器让出周期（毫秒）
    pub exec_yield_period_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            disable_scan: false,
            disable_indexes: DisableIndexOptions::Enabled,
            disable_hash_join_rid_intersect: false,
            disable_merge_join_rid_intersect: false,
            disable_group_by_and_union_rid_intersect: false,
            keep_rejected_plans: false,
            disable_branch_and_bound: false,
            default_dop: 1,
            enable_sampling_ce: false,
            sample_size: 1000,
            iteration_limit: 10_000,
            exec_yield_iterations: 1000,
            exec_yield_period_ms: 10,
        }
    }
}

impl OptimizerConfig {
    /// 生成本次编译使用的提示集合
    pub fn hints(&self) -> QueryHints {
        QueryHints {
            disable_scan: self.disable_scan,
            disable_indexes: self.disable_indexes,
            disable_hash_join_rid_intersect: self.disable_hash_join_rid_intersect,
            disable_merge_join_rid_intersect: self.disable_merge_join_rid_intersect,
            disable_group_by_and_union_rid_intersect: self
                .disable_group_by_and_union_rid_intersect,
            keep_rejected_plans: self.keep_rejected_plans,
            disable_branch_and_bound: self.disable_branch_and_bound,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.optimizer.default_dop == 0 {
            return Err("并行度必须大于 0".into());
        }
        if self.optimizer.iteration_limit == 0 {
            return Err("迭代次数上限必须大于 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.optimizer.default_dop, 1);
        assert_eq!(config.optimizer.hints(), QueryHints::default());
    }

    #[test]
    fn test_config_load_save() {
        let temp_file = NamedTempFile::new().expect("Failed to create temporary file");

        let mut config = Config::default();
        config.optimizer.disable_indexes = DisableIndexOptions::DisablePartialOnly;
        config.optimizer.keep_rejected_plans = true;
        config.save(temp_file.path()).expect("Failed to save config");

        let loaded_config =
            Config::load(temp_file.path()).expect("Failed to load config from temporary file");
        assert_eq!(config.optimizer, loaded_config.optimizer);
        assert_eq!(config.log.file, loaded_config.log.file);
    }

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        temp_file
            .write_all(b"[optimizer]\ndisable_indexes = \"all\"\ndefault_dop = 4\n")
            .expect("Failed to write TOML content to temporary file");

        let config = Config::load(temp_file.path()).expect("Failed to load config");
        assert_eq!(config.optimizer.disable_indexes, DisableIndexOptions::DisableAll);
        assert_eq!(config.optimizer.default_dop, 4);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_config_rejects_zero_dop() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temporary file");
        temp_file
            .write_all(b"[optimizer]\ndefault_dop = 0\n")
            .expect("Failed to write TOML content to temporary file");

        assert!(Config::load(temp_file.path()).is_err());
    }
}
