//! 有界扇出执行器 - 编排层
//!
//! ## 职责
//!
//! 并发执行 N 个相互独立的异步单元，同一时刻最多 L 个在执行。
//!
//! ## 保证
//!
//! 1. **顺序**：`results[i]` 永远对应 `inputs[i]`，与完成顺序无关
//! 2. **隔离**：单元返回错误或 panic，只在对应位置得到 `UnitOutcome::Failed`
//! 3. **屏障**：所有单元都到达终态后才返回，不会因为第一个失败提前结束
//! 4. **取消**：没有单独取消某个单元的接口；丢弃整个 future 会中止整批任务
//!
//! 所有单元一次性派发（`tokio::spawn`），在任务内部获取信号量许可。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, error};

use crate::error::CompletionError;

/// 单元失败标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// 在输入序列中的位置
    pub index: usize,
    pub message: String,
    /// 单元是否 panic（而不是返回错误）
    pub panicked: bool,
    /// 失败前已经发出的请求数（panic 时未知，记为 0）
    pub requests: u64,
}

/// 单元错误：除了消息，还能报告失败前消耗的请求数
pub trait UnitError: fmt::Display {
    fn requests_sent(&self) -> u64 {
        0
    }
}

impl UnitError for String {}

impl UnitError for CompletionError {
    fn requests_sent(&self) -> u64 {
        CompletionError::requests_sent(self)
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "单元 #{} panic: {}", self.index, self.message)
        } else {
            write!(f, "单元 #{} 失败: {}", self.index, self.message)
        }
    }
}

/// 单元的终态
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome<T> {
    Completed(T),
    Failed(UnitFailure),
}

impl<T> UnitOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitOutcome::Completed(_))
    }

    pub fn into_result(self) -> Result<T, UnitFailure> {
        match self {
            UnitOutcome::Completed(value) => Ok(value),
            UnitOutcome::Failed(failure) => Err(failure),
        }
    }
}

/// 被丢弃时中止所有尚未结束的任务
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// 并发执行所有单元，最多 `limit` 个同时进行（`limit` 为 0 时按 1 处理）
pub async fn fan_out<I, T, E, F, Fut>(inputs: Vec<I>, limit: usize, unit: F) -> Vec<UnitOutcome<T>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: UnitError + Send + 'static,
{
    let total = inputs.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    debug!("扇出 {} 个单元，并发上限 {}", total, limit.max(1));

    let handles: Vec<_> = inputs
        .into_iter()
        .map(|input| {
            let semaphore = semaphore.clone();
            let task = unit(input);
            tokio::spawn(async move {
                // 信号量不会被关闭，获取失败时照常执行
                let _permit = semaphore.acquire_owned().await.ok();
                task.await.map_err(|e| (e.to_string(), e.requests_sent()))
            })
        })
        .collect();

    let _guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

    join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, joined)| match joined {
            Ok(Ok(value)) => UnitOutcome::Completed(value),
            Ok(Err((message, requests))) => UnitOutcome::Failed(UnitFailure {
                index,
                message,
                panicked: false,
                requests,
            }),
            Err(join_err) => {
                error!("单元 #{} 任务执行失败: {}", index, join_err);
                UnitOutcome::Failed(UnitFailure {
                    index,
                    message: join_err.to_string(),
                    panicked: join_err.is_panic(),
                    requests: 0,
                })
            }
        })
        .collect()
}
