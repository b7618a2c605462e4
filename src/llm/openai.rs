//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 模型按调用传入，一个客户端可服务多个模型；流式走原生 SSE（`data: ...` 直到 `[DONE]`）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::llm::{LlmClient, LlmError, Message, Role, SamplingOptions, TokenEvent, TokenSink};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 请求超时（秒）
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub request: u64,
    pub stream: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// OpenAI 兼容客户端：持有 Client 与后端名，调用时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    provider: String,
    timeouts: Timeouts,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            provider: "openai".to_string(),
            timeouts: Timeouts::default(),
            usage: TokenUsage::new(),
        }
    }

    /// 设置后端名（如 deepseek），仅影响日志与路由
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let invalid = |e: async_openai::error::OpenAIError| LlmError::InvalidRequest(e.to_string());
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                })
            })
            .collect()
    }

    /// 组装请求：默认采样参数垫底，调用方覆盖；top_k 不在 OpenAI 协议内，丢弃
    fn build_request(
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let sampling = options.resolved();
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(Self::to_openai_messages(messages)?);
        if let Some(t) = sampling.temperature {
            args.temperature(t);
        }
        if let Some(p) = sampling.top_p {
            args.top_p(p);
        }
        if let Some(p) = sampling.presence_penalty {
            args.presence_penalty(p);
        }
        if let Some(p) = sampling.frequency_penalty {
            args.frequency_penalty(p);
        }
        if let Some(n) = sampling.max_tokens {
            args.max_completion_tokens(n);
        }
        if stream {
            args.stream(true);
        }
        args.build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))
    }

    /// 消费 SSE 流直至结束；返回 Err 时调用方负责发 Done(error)
    async fn pump_stream(
        &self,
        request: CreateChatCompletionRequest,
        on_token: &TokenSink,
    ) -> Result<(), LlmError> {
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| LlmError::Api(e.to_string()))?;
            if let Some(usage) = &chunk.usage {
                self.usage
                    .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
            }
            for choice in &chunk.choices {
                if let Some(text) = choice.delta.content.as_deref() {
                    if !text.is_empty() {
                        on_token(TokenEvent::Chunk(text.to_string()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<String, LlmError> {
        let request = Self::build_request(model, messages, options, false)?;

        let response = tokio::time::timeout(
            Duration::from_secs(self.timeouts.request),
            self.client.chat().create(request),
        )
        .await
        .map_err(|_| LlmError::Timeout(self.timeouts.request))?
        .map_err(|e| LlmError::Api(e.to_string()))?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        tracing::debug!(provider = %self.provider, model, chars = content.len(), "chat completed");
        Ok(content)
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        on_token: &TokenSink,
        options: &SamplingOptions,
    ) {
        let request = match Self::build_request(model, messages, options, true) {
            Ok(r) => r,
            Err(e) => {
                on_token(TokenEvent::Done {
                    error: Some(e.to_string()),
                });
                return;
            }
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(self.timeouts.stream),
            self.pump_stream(request, on_token),
        )
        .await
        .unwrap_or(Err(LlmError::Timeout(self.timeouts.stream)));

        match outcome {
            Ok(()) => on_token(TokenEvent::Done { error: None }),
            Err(e) => {
                tracing::warn!(provider = %self.provider, model, error = %e, "stream failed");
                on_token(TokenEvent::Done {
                    error: Some(e.to_string()),
                });
            }
        }
    }
}
