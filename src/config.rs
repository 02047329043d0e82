use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Cli;
use crate::clients::completion::RetryPolicy;
use crate::error::{AppError, AppResult};
use crate::orchestrator::pipeline::StageLimits;
use crate::workflow::stage_agent::StageParams;

/// 单阶段并发上限的允许范围
pub const CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

/// 调度策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
pub enum SchedulingPolicy {
    /// 每个阶段跨所有组一次性批量执行
    #[default]
    #[serde(rename = "parallel")]
    #[value(name = "parallel")]
    Parallel,
    /// 一个组跑完四个阶段后再处理下一个组
    #[serde(rename = "sequential", alias = "sequential_per_group")]
    #[value(name = "sequential", alias = "sequential-per-group")]
    SequentialPerGroup,
}

impl SchedulingPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulingPolicy::Parallel => "parallel",
            SchedulingPolicy::SequentialPerGroup => "sequential",
        }
    }
}

impl FromStr for SchedulingPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" | "optimized" => Ok(SchedulingPolicy::Parallel),
            "sequential" | "sequential-per-group" | "sequential_per_group" | "legacy" => {
                Ok(SchedulingPolicy::SequentialPerGroup)
            }
            other => Err(AppError::Config(format!("未知的调度策略: {}", other))),
        }
    }
}

/// 程序配置
///
/// 优先级：默认值 < TOML 文件 < 环境变量 < 命令行参数
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 调度策略
    pub mode: SchedulingPolicy,
    /// 显式指定的语料文件
    pub corpus_file: Option<PathBuf>,
    /// 语料目录（按查询名或自动探测）
    pub corpus_dir: PathBuf,
    /// 主查询名，对应 `consignes_<query>.json`
    pub query: Option<String>,
    // --- 并发配置 ---
    pub analysis_concurrency: usize,
    pub synthesis_concurrency: usize,
    pub angle_concurrency: usize,
    pub document_concurrency: usize,
    // --- 重试配置 ---
    pub llm_max_attempts: u32,
    pub llm_retry_base_ms: u64,
    pub llm_timeout_secs: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 只输出精简投影
    pub simplified: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: SchedulingPolicy::Parallel,
            corpus_file: None,
            corpus_dir: PathBuf::from("static/consignesrun"),
            query: None,
            analysis_concurrency: 100,
            synthesis_concurrency: 100,
            angle_concurrency: 10,
            document_concurrency: 10,
            llm_max_attempts: 3,
            llm_retry_base_ms: 1000,
            llm_timeout_secs: 120,
            verbose_logging: false,
            simplified: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.deepseek.com/v1".to_string(),
            llm_model_name: "deepseek-chat".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// 用环境变量覆盖当前值
    pub fn with_env(self) -> Self {
        let default = self;
        Self {
            mode: std::env::var("PIPELINE_MODE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.mode),
            corpus_file: std::env::var("CONSIGNES_FILE").ok().map(PathBuf::from).or(default.corpus_file),
            corpus_dir: default.corpus_dir,
            query: default.query,
            analysis_concurrency: std::env::var("ANALYSIS_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.analysis_concurrency),
            synthesis_concurrency: std::env::var("SYNTHESIS_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.synthesis_concurrency),
            angle_concurrency: std::env::var("ANGLE_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.angle_concurrency),
            document_concurrency: std::env::var("DOCUMENT_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.document_concurrency),
            llm_max_attempts: std::env::var("LLM_MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_max_attempts),
            llm_retry_base_ms: std::env::var("LLM_RETRY_BASE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_retry_base_ms),
            llm_timeout_secs: std::env::var("LLM_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_timeout_secs),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            simplified: default.simplified,
            llm_api_key: std::env::var("DEEPSEEK_KEY").or_else(|_| std::env::var("LLM_API_KEY")).unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
        }
    }

    /// 从 TOML 文件加载（缺省字段取默认值）
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AppError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|message| AppError::ConfigFile {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// 完整加载：默认值 → TOML（可选）→ 环境变量 → 命令行
    pub fn load(cli: &Cli) -> AppResult<Self> {
        let base = match &cli.config {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        let mut config = base.with_env();
        config.apply_cli(cli);
        Ok(config)
    }

    /// 命令行参数覆盖
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(mode) = cli.mode {
            self.mode = mode;
        }
        if let Some(file) = &cli.file {
            self.corpus_file = Some(file.clone());
        }
        if let Some(query) = &cli.query {
            self.query = Some(query.clone());
            // 按查询名定位时忽略环境变量中的文件
            if cli.file.is_none() {
                self.corpus_file = None;
            }
        }
        if let Some(n) = cli.analysis_limit {
            self.analysis_concurrency = n;
        }
        if let Some(n) = cli.synthesis_limit {
            self.synthesis_concurrency = n;
        }
        if let Some(n) = cli.angle_limit {
            self.angle_concurrency = n;
        }
        if let Some(n) = cli.document_limit {
            self.document_concurrency = n;
        }
        self.simplified |= cli.simplified;
        self.verbose_logging |= cli.verbose;
    }

    /// 启动前校验，任何一项不满足都是致命错误
    pub fn validate(&self) -> AppResult<()> {
        if self.llm_api_key.trim().is_empty() {
            return Err(AppError::MissingCredentials {
                var_name: "DEEPSEEK_KEY".to_string(),
            });
        }

        for (name, value) in [
            ("analysis", self.analysis_concurrency),
            ("synthesis", self.synthesis_concurrency),
            ("angle", self.angle_concurrency),
            ("document", self.document_concurrency),
        ] {
            if !CONCURRENCY_RANGE.contains(&value) {
                return Err(AppError::Config(format!(
                    "{} 并发上限必须在 {}..={} 之间，当前为 {}",
                    name,
                    CONCURRENCY_RANGE.start(),
                    CONCURRENCY_RANGE.end(),
                    value
                )));
            }
        }

        if self.llm_max_attempts == 0 {
            return Err(AppError::Config("LLM 最大尝试次数必须至少为 1".to_string()));
        }
        if self.llm_timeout_secs == 0 {
            return Err(AppError::Config("LLM 超时必须大于 0 秒".to_string()));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_max_attempts,
            base_delay: Duration::from_millis(self.llm_retry_base_ms),
        }
    }

    pub fn stage_params(&self) -> StageParams {
        StageParams::default().with_timeout(Duration::from_secs(self.llm_timeout_secs))
    }

    pub fn stage_limits(&self) -> StageLimits {
        StageLimits {
            analysis: self.analysis_concurrency,
            synthesis: self.synthesis_concurrency,
            angle: self.angle_concurrency,
            document: self.document_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn with_key() -> Config {
        Config {
            llm_api_key: "sk-test".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mode, SchedulingPolicy::Parallel);
        assert_eq!(config.analysis_concurrency, 100);
        assert_eq!(config.angle_concurrency, 10);
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.retry_policy().base_delay, Duration::from_secs(1));
        assert_eq!(config.stage_params().analysis.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, AppError::MissingCredentials { .. }));
        assert!(with_key().validate().is_ok());
    }

    #[test]
    fn test_concurrency_out_of_range_is_fatal() {
        let config = Config {
            angle_concurrency: 0,
            ..with_key()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let config = Config {
            analysis_concurrency: 101,
            ..with_key()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_toml_partial_file() {
        let config = Config::from_toml_str(
            r#"
            mode = "sequential"
            angle_concurrency = 4
            llm_model_name = "deepseek-reasoner"
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, SchedulingPolicy::SequentialPerGroup);
        assert_eq!(config.angle_concurrency, 4);
        assert_eq!(config.llm_model_name, "deepseek-reasoner");
        assert_eq!(config.analysis_concurrency, 100);

        assert!(Config::from_toml_str("mode = \"turbo\"").is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Parallel".parse::<SchedulingPolicy>().unwrap(), SchedulingPolicy::Parallel);
        assert_eq!(
            "sequential".parse::<SchedulingPolicy>().unwrap(),
            SchedulingPolicy::SequentialPerGroup
        );
        assert!("other".parse::<SchedulingPolicy>().is_err());
        assert_eq!(SchedulingPolicy::SequentialPerGroup.name(), "sequential");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "seo-pipeline",
            "--mode",
            "sequential",
            "--query",
            "velo",
            "--angle-limit",
            "3",
            "--simplified",
        ]);
        let mut config = Config {
            corpus_file: Some(PathBuf::from("from_env.json")),
            ..with_key()
        };
        config.apply_cli(&cli);

        assert_eq!(config.mode, SchedulingPolicy::SequentialPerGroup);
        assert_eq!(config.query.as_deref(), Some("velo"));
        assert_eq!(config.corpus_file, None);
        assert_eq!(config.angle_concurrency, 3);
        assert_eq!(config.analysis_concurrency, 100);
        assert!(config.simplified);
    }
}
