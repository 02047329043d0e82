/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数。
/// 日志写到 stderr，stdout 只留给最终的 JSON 输出。
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::clients::completion::Usage;
use crate::config::Config;
use crate::models::stage_result::Stage;
use crate::orchestrator::pipeline::{RunSummary, StageSummary};

/// 初始化日志
///
/// 默认级别 `info`（详细模式为 `debug`），`RUST_LOG` 优先。
/// 重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 多阶段内容流水线 ({} 模式)", config.mode.name());
    info!("🤖 模型: {} @ {}", config.llm_model_name, config.llm_api_base_url);
    info!(
        "📊 并发上限: 分析 {} / 综合 {} / 角度 {} / 文档 {}",
        config.analysis_concurrency,
        config.synthesis_concurrency,
        config.angle_concurrency,
        config.document_concurrency
    );
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始信息
pub fn log_stage_start(stage: Stage, units: usize, limit: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始{}阶段: {} 个单元，并发上限 {}", stage.label(), units, limit);
    info!("{}", "=".repeat(60));
}

/// 记录阶段完成信息
pub fn log_stage_complete(summary: &StageSummary, elapsed: Duration) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ {}阶段完成: 成功 {}/{}，回退 {}，失败 {} ({:.1}s)",
        summary.stage.label(),
        summary.succeeded,
        summary.total(),
        summary.fallbacks,
        summary.failed,
        elapsed.as_secs_f64()
    );
    if !summary.failed_keys.is_empty() {
        warn!("⚠️ 失败单元: {}", summary.failed_keys.join(", "));
    }
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &RunSummary, usage: &Usage) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!(
        "📁 组: {}，文章: {}，模式: {}",
        summary.groups, summary.items, summary.policy
    );
    for stage in &summary.stages {
        info!(
            "  {:<6} ✅ 成功 {:>4}  ⚠️ 回退 {:>4}  ❌ 失败 {:>4}",
            stage.stage.label(),
            stage.succeeded,
            stage.fallbacks,
            stage.failed
        );
    }
    info!("{}", "=".repeat(60));
    info!("🔢 Token 总数: {}", usage.total_tokens);
    info!(
        "   输入 {} / 输出 {}",
        usage.prompt_tokens, usage.completion_tokens
    );
    info!("📨 请求总数: {}", usage.requests);
    info!("⏱️ 总耗时: {:.1}s", summary.elapsed.as_secs_f64());
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("bonjour", 3), "bon...");
        assert_eq!(truncate_text("vélo", 10), "vélo");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
