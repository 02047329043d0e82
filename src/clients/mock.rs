//! Mock 补全服务（用于测试，无需 API）
//!
//! 按脚本或按请求内容返回固定回复，可模拟临时错误、超时和拒绝。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::clients::completion::{Completion, CompletionRequest, CompletionService, Usage};
use crate::error::CompletionError;

/// 每次调用固定计入的用量
pub const MOCK_USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
    requests: 1,
};

/// 脚本化的回复
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 立即返回文本
    Text(String),
    /// 等待一段时间后返回文本（配合超时使用）
    Delayed(Duration, String),
    /// 临时错误
    Transient(String),
    /// 不可重试的错误
    Rejected(String),
}

type Responder = Box<dyn Fn(&CompletionRequest) -> MockReply + Send + Sync>;

enum Script {
    Sequence(Mutex<Vec<MockReply>>),
    Responder(Responder),
}

/// Mock 补全服务
pub struct MockService {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockService {
    /// 每次调用都返回同一个回复
    pub fn always(reply: MockReply) -> Self {
        Self::responder(move |_| reply.clone())
    }

    /// 依次返回脚本中的回复，最后一个回复重复使用
    pub fn sequence(replies: Vec<MockReply>) -> Self {
        let mut replies = replies;
        replies.reverse();
        Self::with_script(Script::Sequence(Mutex::new(replies)))
    }

    /// 根据请求内容决定回复
    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&CompletionRequest) -> MockReply + Send + Sync + 'static,
    {
        Self::with_script(Script::Responder(Box::new(f)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的调用次数（含失败的尝试）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已收到的请求副本
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self, request: &CompletionRequest) -> MockReply {
        match &self.script {
            Script::Responder(f) => f(request),
            Script::Sequence(replies) => {
                let mut replies = match replies.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if replies.len() > 1 {
                    replies.pop().unwrap_or_else(|| MockReply::Text("{}".into()))
                } else {
                    replies
                        .last()
                        .cloned()
                        .unwrap_or_else(|| MockReply::Text("{}".into()))
                }
            }
        }
    }
}

#[async_trait]
impl CompletionService for MockService {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match self.next_reply(request) {
            MockReply::Text(text) => Ok(Completion {
                text,
                usage: MOCK_USAGE,
            }),
            MockReply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(Completion {
                    text,
                    usage: MOCK_USAGE,
                })
            }
            MockReply::Transient(msg) => Err(CompletionError::Transient(msg)),
            MockReply::Rejected(msg) => Err(CompletionError::Rejected(msg)),
        }
    }
}
