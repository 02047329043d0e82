//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量执行和阶段调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 应用外壳
//! - 启动前的致命检查（凭证、并发上限、语料）
//! - 构建补全客户端和流水线
//! - 输出全局统计信息
//!
//! ### `pipeline` - 阶段流水线
//! - 分析 → 综合 → 角度选择 → 文档生成
//! - 两种调度策略：全组并行 / 逐组顺序
//! - 单元失败转换为回退载荷
//!
//! ### `fan_out` - 有界扇出执行器
//! - Semaphore 限制同时在执行的单元数
//! - 结果顺序与输入顺序一致，失败按位置隔离
//!
//! ### `grouping` - 组聚合器
//! - 逐条结果按组归并，保证每个组都有记录
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (App)
//!     ↓
//! pipeline (Vec<Group> × 4 个阶段)
//!     ↓  fan_out / grouping
//! workflow::StageAgent (处理单个单元)
//!     ↓
//! services (能力层：prompts / repair)
//!     ↓
//! clients (基础设施：CompletionClient)
//! ```

pub mod batch_processor;
pub mod fan_out;
pub mod grouping;
pub mod pipeline;

// 重新导出主要类型
pub use batch_processor::App;
pub use fan_out::{fan_out, UnitError, UnitFailure, UnitOutcome};
pub use grouping::{complete_groups, Grouped};
pub use pipeline::{Pipeline, PipelineOutput, RunSummary, StageLimits, StageSummary};
