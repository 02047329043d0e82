//! 应用外壳 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责启动前的致命检查和一次完整运行。
//!
//! ## 核心功能
//!
//! 1. **配置校验**：API 密钥、并发上限，不合法时在任何阶段开始前终止
//! 2. **语料加载**：显式文件 / 按查询名 / 自动探测，缺失或格式错误即终止
//! 3. **客户端构建**：补全服务 + 重试策略
//! 4. **运行流水线**：委托 `Pipeline` 按调度策略执行四个阶段
//! 5. **全局统计**：每阶段成功 / 回退 / 失败数，token 用量
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个单元的细节
//! - **无持久化**：结果以 JSON 返回给调用方（CLI 打印到 stdout）

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::clients::completion::{CompletionClient, CompletionService};
use crate::clients::llm_client::OpenAiService;
use crate::config::Config;
use crate::error::AppResult;
use crate::models::loaders::{find_corpus_file, load_corpus};
use crate::models::record::GroupRecord;
use crate::models::work_item::Corpus;
use crate::orchestrator::pipeline::{Pipeline, PipelineOutput};
use crate::utils::logging::{log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Config,
    corpus: Corpus,
    pipeline: Pipeline,
}

impl App {
    /// 初始化应用：校验配置、加载语料、连接补全服务
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;
        log_startup(&config);

        let service = OpenAiService::new(&config);
        info!("✓ 补全服务已配置: {}", service.model_name());

        let corpus = Self::load_corpus(&config).await?;
        Ok(Self::with_service(config, corpus, Arc::new(service)))
    }

    /// 使用指定的补全服务和已加载的语料构建（测试中注入 MockService）
    pub fn with_service(
        config: Config,
        corpus: Corpus,
        service: Arc<dyn CompletionService>,
    ) -> Self {
        let client = CompletionClient::new(service, config.retry_policy());
        let pipeline = Pipeline::from_config(client, &config);
        Self {
            config,
            corpus,
            pipeline,
        }
    }

    /// 定位并加载语料
    async fn load_corpus(config: &Config) -> Result<Corpus> {
        info!("\n📁 正在定位语料文件...");
        let path = resolve_corpus_path(config).await?;
        info!("📄 语料文件: {}", path.display());

        load_corpus(&path)
            .await
            .with_context(|| format!("加载语料失败: {}", path.display()))
    }

    /// 运行应用主逻辑，返回本次运行的全部结果
    pub async fn run(&self) -> PipelineOutput {
        if self.corpus.item_count() == 0 {
            warn!("⚠️ 语料中没有任何文章，各组只会得到回退记录");
        }

        let output = self.pipeline.run(&self.corpus, self.config.mode).await;

        print_final_stats(&output.summary, &output.usage);
        output
    }

    /// 按配置渲染输出（完整记录或精简投影）
    pub fn render(&self, output: &PipelineOutput) -> Value {
        render_records(&output.records, self.config.simplified)
    }
}

/// 语料文件路径：显式文件优先，否则按查询名或自动探测
pub async fn resolve_corpus_path(config: &Config) -> AppResult<PathBuf> {
    match &config.corpus_file {
        Some(path) => Ok(path.clone()),
        None => find_corpus_file(&config.corpus_dir, config.query.as_deref()).await,
    }
}

pub fn render_records(records: &[GroupRecord], simplified: bool) -> Value {
    let values = records
        .iter()
        .map(|record| {
            if simplified {
                record.simplified()
            } else {
                record.to_value()
            }
        })
        .collect();
    Value::Array(values)
}
