//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / 路由 / Mock）实现 LlmClient：
//! generate / chat（非流式，错误走 Result）与 generate_stream / chat_stream（流式，错误走回调）。
//! 不支持原生流式的后端由默认实现模拟：一次非流式调用后整段回调一次，再回调 Done。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{Message, SamplingOptions};

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("Invalid LLM request: {0}")]
    InvalidRequest(String),

    #[error("No LLM provider configured for model '{0}'")]
    NoProvider(String),
}

/// 流式回调事件：0..N 个 Chunk 之后恰好一个 Done（失败时 Done 携带错误信息）
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    Chunk(String),
    Done { error: Option<String> },
}

impl TokenEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, TokenEvent::Done { .. })
    }
}

/// 流式 Token 回调
pub type TokenSink = Arc<dyn Fn(TokenEvent) + Send + Sync>;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 后端名（日志与路由用）
    fn provider(&self) -> &str;

    /// 非流式对话
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<String, LlmError>;

    /// 单轮 prompt 生成
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, LlmError> {
        self.chat(model, &[Message::user(prompt)], options).await
    }

    /// 是否具备原生流式能力
    fn supports_streaming(&self) -> bool {
        false
    }

    /// 流式对话；默认实现为非流式模拟。错误只通过 on_token 的 Done 传出，不会向上抛
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        on_token: &TokenSink,
        options: &SamplingOptions,
    ) {
        match self.chat(model, messages, options).await {
            Ok(text) => {
                on_token(TokenEvent::Chunk(text));
                on_token(TokenEvent::Done { error: None });
            }
            Err(e) => on_token(TokenEvent::Done {
                error: Some(e.to_string()),
            }),
        }
    }

    /// 单轮 prompt 流式生成
    async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        on_token: &TokenSink,
        options: &SamplingOptions,
    ) {
        self.chat_stream(model, &[Message::user(prompt)], on_token, options)
            .await
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
