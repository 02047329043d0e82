//! LLM API 客户端
//!
//! 通过 `async-openai` 调用任意 OpenAI 兼容端点（DeepSeek、OpenAI、自建代理等）。
//! 只实现单次调用，重试交给 `CompletionClient`。

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clients::completion::{Completion, CompletionRequest, CompletionService, Usage};
use crate::config::Config;
use crate::error::CompletionError;

/// OpenAI 兼容的补全服务
pub struct OpenAiService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl OpenAiService {
    /// 创建新的服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn build_messages(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::with_capacity(2);

        if !request.system.is_empty() {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.as_str())
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(request.user.as_str())
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        Ok(messages)
    }
}

#[async_trait]
impl CompletionService for OpenAiService {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", request.user.len());

        let messages = self.build_messages(request).map_err(classify)?;

        #[allow(deprecated)]
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(request.params.temperature)
            .max_tokens(request.params.max_tokens)
            .build()
            .map_err(classify)?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify(e)
        })?;

        debug!("LLM API 调用成功");

        let usage = response
            .usage
            .as_ref()
            .map(|u| Usage {
                prompt_tokens: u64::from(u.prompt_tokens),
                completion_tokens: u64::from(u.completion_tokens),
                total_tokens: u64::from(u.total_tokens),
                requests: 1,
            })
            .unwrap_or(Usage {
                requests: 1,
                ..Usage::default()
            });

        // 空内容交给修复器处理，得到回退载荷
        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(Completion {
            text: text.trim().to_string(),
            usage,
        })
    }
}

/// 把 SDK 错误映射到重试语义：参数错误和 4xx（限流除外）不可重试，其余按临时错误处理
fn classify(err: OpenAIError) -> CompletionError {
    match err {
        OpenAIError::InvalidArgument(msg) => CompletionError::Rejected(msg),
        OpenAIError::ApiError(api) if is_client_error(&api) => {
            CompletionError::Rejected(api.to_string())
        }
        other => CompletionError::Transient(other.to_string()),
    }
}

/// 判断 API 错误是否来自 4xx 响应
///
/// SDK 不暴露状态码：5xx 的响应体按原文放进 `message`，`type` 和 `code` 都为空；
/// 4xx 返回的错误对象至少带其中一个。429 限流仍然可以重试，额度耗尽不行。
fn is_client_error(api: &ApiError) -> bool {
    let tags: Vec<&str> = [api.r#type.as_deref(), api.code.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if tags.is_empty() {
        return false;
    }

    let rate_limited = tags
        .iter()
        .any(|tag| tag.contains("rate_limit") || matches!(*tag, "requests" | "tokens"));
    !rate_limited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::completion::SamplingParams;

    fn create_test_service() -> OpenAiService {
        let config = Config {
            llm_api_key: std::env::var("DEEPSEEK_KEY").unwrap_or_default(),
            ..Config::default()
        };
        OpenAiService::new(&config)
    }

    #[test]
    fn test_build_messages_skips_empty_system() {
        let service = create_test_service();
        let request = CompletionRequest {
            system: String::new(),
            user: "bonjour".into(),
            params: SamplingParams::default(),
        };
        let messages = service.build_messages(&request).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::User(_)));
    }

    fn api_error(r#type: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "boom".into(),
            r#type: r#type.map(String::from),
            param: None,
            code: code.map(String::from),
        })
    }

    #[test]
    fn test_classify_invalid_argument_is_rejected() {
        let err = classify(OpenAIError::InvalidArgument("model".into()));
        assert!(matches!(err, CompletionError::Rejected(_)));
    }

    #[test]
    fn test_classify_client_errors_are_rejected() {
        // 400 参数错误 / 401 密钥无效 / 额度耗尽
        for err in [
            api_error(Some("invalid_request_error"), None),
            api_error(Some("authentication_error"), Some("invalid_api_key")),
            api_error(Some("insufficient_quota"), Some("insufficient_quota")),
        ] {
            assert!(matches!(classify(err), CompletionError::Rejected(_)));
        }
    }

    #[test]
    fn test_classify_rate_limit_and_server_errors_are_transient() {
        for err in [
            api_error(Some("requests"), Some("rate_limit_exceeded")),
            api_error(Some("tokens"), None),
            api_error(None, None),
        ] {
            assert!(classify(err).is_transient());
        }
    }

    /// 测试真实端点连通性
    ///
    /// 运行方式：
    /// ```bash
    /// DEEPSEEK_KEY=... cargo test test_live_completion -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_live_completion() {
        let _ = tracing_subscriber::fmt::try_init();

        let service = create_test_service();
        let request = CompletionRequest {
            system: "Always respond in valid JSON format.".into(),
            user: "Return {\"pong\": true}".into(),
            params: SamplingParams::default(),
        };

        match service.complete(&request).await {
            Ok(completion) => {
                println!("\n========== LLM 响应 ==========");
                println!("{}", completion.text);
                println!("用量: {:?}", completion.usage);
                assert!(!completion.text.is_empty());
            }
            Err(e) => panic!("LLM 调用失败: {}", e),
        }
    }
}
