//! 多提供商路由器
//!
//! 同一次研究的不同步骤可以指定不同模型（如 search 用 deepseek-chat，report 用 gpt-4o），
//! 路由器按模型名把调用分派到对应后端：
//! - 显式前缀：`openai:gpt-4o-mini` → openai 后端，模型名 `gpt-4o-mini`
//! - 模型名前缀：注册时声明（如 `deepseek` / `gpt`）
//! - 其余落到默认后端
//!
//! 后端可配置自己的模型（`[llm.openai] model = ...`）：路由到该后端的模型名不属于它的前缀时
//! （如 `openai:deepseek-chat`、`openai:`，或落到默认后端的未知模型），改用该模型。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{LlmClient, LlmError, Message, SamplingOptions, TokenEvent, TokenSink};

/// 路由表中的一个后端
struct ProviderRoute {
    name: String,
    model_prefixes: Vec<String>,
    model: Option<String>,
    client: Arc<dyn LlmClient>,
}

impl ProviderRoute {
    fn claims(&self, model: &str) -> bool {
        let lower = model.to_lowercase();
        self.model_prefixes.iter().any(|p| lower.starts_with(p.as_str()))
    }

    /// 实际发给后端的模型名
    fn model_for(&self, requested: &str) -> String {
        match &self.model {
            Some(model) if !self.claims(requested) => model.clone(),
            _ => requested.to_string(),
        }
    }
}

/// 按模型名路由的 LLM 客户端
pub struct ProviderRouter {
    routes: Vec<ProviderRoute>,
    default_provider: Option<String>,
    call_counts: AtomicUsize,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            default_provider: None,
            call_counts: AtomicUsize::new(0),
        }
    }

    /// 注册后端；首个注册的后端成为默认后端
    pub fn add_provider<I, S>(&mut self, name: impl Into<String>, model_prefixes: I, client: Arc<dyn LlmClient>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.routes.push(ProviderRoute {
            name,
            model_prefixes: model_prefixes
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
            model: None,
            client,
        });
    }

    /// 设置后端自己的模型；空白值忽略
    pub fn set_provider_model(&mut self, name: &str, model: impl Into<String>) {
        let model = model.into().trim().to_string();
        if model.is_empty() {
            return;
        }
        if let Some(route) = self.routes.iter_mut().find(|r| r.name == name) {
            route.model = Some(model);
        }
    }

    pub fn set_default_provider(&mut self, name: impl Into<String>) {
        self.default_provider = Some(name.into());
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.name.clone()).collect()
    }

    /// 解析模型名，返回 (后端, 实际发送的模型名)
    pub fn select(&self, model: &str) -> Option<(&Arc<dyn LlmClient>, String)> {
        if let Some((provider, rest)) = model.split_once(':') {
            if let Some(route) = self.routes.iter().find(|r| r.name.eq_ignore_ascii_case(provider)) {
                return Some((&route.client, route.model_for(rest)));
            }
        }

        if let Some(route) = self.routes.iter().find(|r| r.claims(model)) {
            return Some((&route.client, model.to_string()));
        }

        if let Some((provider, _)) = model.split_once(':') {
            tracing::warn!(
                provider,
                model,
                "unknown provider prefix, sending model name unchanged to default backend"
            );
        }
        let default = self.default_provider.as_deref()?;
        self.routes
            .iter()
            .find(|r| r.name == default)
            .map(|r| (&r.client, r.model_for(model)))
    }

    /// 获取调用统计
    pub fn call_count(&self) -> usize {
        self.call_counts.load(Ordering::Relaxed)
    }

    fn route(&self, model: &str) -> Result<(&Arc<dyn LlmClient>, String), LlmError> {
        let selected = self
            .select(model)
            .ok_or_else(|| LlmError::NoProvider(model.to_string()))?;
        self.call_counts.fetch_add(1, Ordering::Relaxed);
        Ok(selected)
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ProviderRouter {
    fn provider(&self) -> &str {
        "router"
    }

    /// 任一后端可原生流式即视为可流式；落到非流式后端时由其默认实现模拟
    fn supports_streaming(&self) -> bool {
        self.routes.iter().any(|r| r.client.supports_streaming())
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &SamplingOptions,
    ) -> Result<String, LlmError> {
        let (client, model) = self.route(model)?;
        tracing::debug!(provider = client.provider(), model = %model, "routed chat");
        client.chat(&model, messages, options).await
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        on_token: &TokenSink,
        options: &SamplingOptions,
    ) {
        match self.route(model) {
            Ok((client, model)) => client.chat_stream(&model, messages, on_token, options).await,
            Err(e) => on_token(TokenEvent::Done {
                error: Some(e.to_string()),
            }),
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        // 聚合所有后端的 token 使用
        self.routes
            .iter()
            .map(|r| r.client.token_usage())
            .fold((0, 0, 0), |acc, (a, b, c)| (acc.0 + a, acc.1 + b, acc.2 + c))
    }
}
