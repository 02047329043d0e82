//! # SEO Pipeline
//!
//! 一个多阶段 LLM 内容流水线：对一批竞品文章逐篇分析，再按目标查询
//! 汇总为战略综合、选择编辑角度、生成文档底稿。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Clients）
//! - `clients/` - 与补全服务打交道，只暴露"发送一次请求"的能力
//! - `CompletionClient` - 重试、指数退避、单次超时、用量统计
//! - `OpenAiService` / `MockService` - 真实服务 / 测试替身
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心并发
//! - `prompts` - 各阶段提示词
//! - `repair` - 修复模型返回的结构化文本
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个单元"的完整处理流程
//! - `UnitCtx` - 上下文封装（阶段 + 组 + 单元键）
//! - `StageAgent` - 提示词 → 补全 → 修复 → 回退
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/fan_out` - 有界扇出执行器
//! - `orchestrator/grouping` - 组聚合器
//! - `orchestrator/pipeline` - 四阶段流水线与调度策略
//! - `orchestrator/batch_processor` - 应用外壳，致命检查与全局统计
//!
//! ## 模块结构

pub mod cli;
pub mod clients;
pub mod config;
pub mod error;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use cli::Cli;
pub use clients::{CompletionClient, CompletionService, MockReply, MockService, Usage};
pub use config::{Config, SchedulingPolicy};
pub use error::{AppError, AppResult, CompletionError};
pub use models::{Corpus, Group, GroupId, GroupRecord, Stage, WorkItem};
pub use orchestrator::{fan_out, App, Pipeline, PipelineOutput, RunSummary, StageLimits};
pub use workflow::{StageAgent, StageParams, UnitCtx};
