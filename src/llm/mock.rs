//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 三种模式：
//! - `new()`：回显最后一条 User 消息
//! - `scripted(..)`：按顺序返回预设响应，用尽后返回 EmptyResponse
//! - `from_fn(..)`：由闭包根据 prompt 决定响应（可按关键字路由到不同 Agent 的固定输出）
//!
//! `with_streaming(true)` 后声明原生流式能力，流式调用按空白切分逐块回调。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role, SamplingOptions, TokenEvent, TokenSink};

type Responder = dyn Fn(&str, &[Message]) -> Result<String, LlmError> + Send + Sync;

enum Mode {
    Echo,
    Scripted(Mutex<VecDeque<Result<String, LlmError>>>),
    Func(Box<Responder>),
}

/// 单次调用记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    pub options: SamplingOptions,
}

/// Mock 客户端
pub struct MockLlmClient {
    mode: Mode,
    streaming: bool,
    calls: AtomicUsize,
    log: Mutex<Vec<RecordedCall>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::with_mode(Mode::Echo)
    }

    pub fn scripted(responses: Vec<Result<String, LlmError>>) -> Self {
        Self::with_mode(Mode::Scripted(Mutex::new(responses.into())))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self::with_mode(Mode::Func(Box::new(f)))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            streaming: false,
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn into_arc(self) -> Arc<dyn LlmClient> {
        Arc::new(self)
    }

    /// 已发生的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 调用记录快照
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn respond(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        if let Ok(mut log) = self.log.lock() {
            log.push(RecordedCall {
                model: model.to_string(),
                prompt: last_user.to_string(),
                options: *options,
            });
        }

        match &self.mode {
            Mode::Echo => Ok(format!("Echo from Mock: {}", last_user)),
            Mode::Scripted(queue) => queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or(Err(LlmError::EmptyResponse)),
            Mode::Func(f) => f(last_user, messages),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<String, LlmError> {
        self.respond(model, messages, options)
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        on_token: &TokenSink,
        options: &SamplingOptions,
    ) {
        match self.respond(model, messages, options) {
            Ok(text) if self.streaming => {
                for piece in text.split_inclusive(char::is_whitespace) {
                    on_token(TokenEvent::Chunk(piece.to_string()));
                }
                on_token(TokenEvent::Done { error: None });
            }
            Ok(text) => {
                on_token(TokenEvent::Chunk(text));
                on_token(TokenEvent::Done { error: None });
            }
            Err(e) => on_token(TokenEvent::Done {
                error: Some(e.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let mock = MockLlmClient::scripted(vec![Ok("a".into()), Err(LlmError::Timeout(1))]);
        let opts = SamplingOptions::default();
        assert_eq!(mock.generate("m", "x", &opts).await.unwrap(), "a");
        assert_eq!(mock.generate("m", "x", &opts).await, Err(LlmError::Timeout(1)));
        assert_eq!(mock.generate("m", "x", &opts).await, Err(LlmError::EmptyResponse));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_streaming_splits_chunks() {
        let mock = MockLlmClient::from_fn(|_, _| Ok("one two three".into())).with_streaming(true);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let captured = chunks.clone();
        let sink: TokenSink = Arc::new(move |ev| captured.lock().unwrap().push(ev));
        mock.generate_stream("m", "p", &sink, &SamplingOptions::default())
            .await;
        let chunks = chunks.lock().unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], TokenEvent::Chunk("one ".into()));
        assert!(chunks[3].is_done());
    }

    #[tokio::test]
    async fn test_records_model_and_prompt() {
        let mock = MockLlmClient::new();
        let out = mock
            .generate("model-x", "hello", &SamplingOptions::defaults())
            .await
            .unwrap();
        assert!(out.contains("hello"));
        let calls = mock.calls();
        assert_eq!(calls[0].model, "model-x");
        assert_eq!(calls[0].options.temperature, Some(0.7));
    }
}
