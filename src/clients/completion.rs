//! 补全客户端 - 基础设施层
//!
//! `CompletionService` 只负责"一次"调用；`CompletionClient` 在其之上
//! 提供有上限的重试、指数退避和单次超时。
//!
//! 用量统计随每次调用的返回值带回，由编排层折叠进本次运行的累加器，
//! 不存在进程级的全局计数器。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::CompletionError;

/// 采样参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    /// 单次调用超时
    pub timeout: Duration,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 3000,
            timeout: Duration::from_secs(120),
        }
    }
}

/// 一次补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// 系统指令
    pub system: String,
    /// 用户指令 + 序列化的上下文
    pub user: String,
    pub params: SamplingParams,
}

/// Token 用量（同时用作单次返回值和运行级累加器）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub requests: u64,
}

impl Usage {
    /// 折叠另一份用量
    pub fn absorb(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.requests += other.requests;
    }
}

/// 补全结果：原始文本 + 用量
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// 补全服务：单次尝试，不做重试
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError>;
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 第一次重试前的等待，之后逐次翻倍
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败（从 1 开始）之后的等待时间
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// 带重试的补全客户端
#[derive(Clone)]
pub struct CompletionClient {
    service: Arc<dyn CompletionService>,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(service: Arc<dyn CompletionService>, retry: RetryPolicy) -> Self {
        Self { service, retry }
    }

    /// 发送一次补全请求
    ///
    /// 临时错误和超时按指数退避重试；耗尽后返回
    /// `CompletionError::Exhausted`，调用方必须把它当作本单元的终态失败。
    /// 成功时 `usage.requests` 为实际发出的请求数（含重试）。
    pub async fn send(
        &self,
        instructions: &str,
        context: &str,
        params: SamplingParams,
    ) -> Result<Completion, CompletionError> {
        let request = CompletionRequest {
            system: instructions.to_string(),
            user: context.to_string(),
            params,
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("补全调用，第 {}/{} 次尝试", attempt, max_attempts);

            let outcome = match timeout(params.timeout, self.service.complete(&request)).await {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout(params.timeout)),
            };

            let err = match outcome {
                Ok(mut completion) => {
                    completion.usage.requests = u64::from(attempt);
                    return Ok(completion);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!("⚠️ 补全调用在 {} 次尝试后仍失败: {}", attempt, err);
                return Err(CompletionError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.retry.delay_after(attempt);
            warn!(
                "⚠️ 第 {} 次尝试失败: {}，{:?} 后重试...",
                attempt, err, delay
            );
            sleep(delay).await;
        }
    }
}
