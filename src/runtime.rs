//! 运行时装配：按配置与环境变量创建 LLM 与搜索客户端

use std::fmt;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, ProviderRouter, Timeouts};
use crate::search::{http_client, BingEngine, GoogleEngine, MultiEngineSearchClient, SearchClient, SearchOptions};

/// 一次研究共享的外部依赖
#[derive(Clone)]
pub struct ResearchRuntime {
    pub llm: Arc<dyn LlmClient>,
    pub search: Arc<dyn SearchClient>,
}

impl ResearchRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<dyn SearchClient>) -> Self {
        Self { llm, search }
    }
}

impl fmt::Debug for ResearchRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResearchRuntime")
            .field("llm", &self.llm.provider())
            .finish_non_exhaustive()
    }
}

fn key_from(configured: Option<&String>, env: &str) -> Option<String> {
    configured
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var(env).ok().filter(|s| !s.trim().is_empty()))
}

/// 按可用 Key 注册 deepseek / openai 后端；一个都没有时返回 None
fn build_router(cfg: &AppConfig) -> Option<ProviderRouter> {
    let timeouts = Timeouts {
        request: cfg.llm.timeouts.request,
        stream: cfg.llm.timeouts.stream,
    };
    let mut router = ProviderRouter::new();

    if let Some(key) = key_from(cfg.llm.deepseek.api_key.as_ref(), "DEEPSEEK_API_KEY") {
        tracing::info!("DeepSeek provider enabled");
        router.add_provider(
            "deepseek",
            ["deepseek"],
            Arc::new(create_deepseek_client(Some(key.as_str()), timeouts)),
        );
    }
    if let Some(key) = key_from(cfg.llm.openai.api_key.as_ref(), "OPENAI_API_KEY") {
        tracing::info!("OpenAI provider enabled");
        let client = OpenAiClient::new(cfg.llm.base_url.as_deref(), Some(key.as_str())).with_timeouts(timeouts);
        router.add_provider("openai", ["gpt", "o1", "o3", "o4"], Arc::new(client));
    }
    for (name, section) in [("deepseek", &cfg.llm.deepseek), ("openai", &cfg.llm.openai)] {
        if let Some(model) = &section.model {
            router.set_provider_model(name, model.as_str());
        }
    }

    let providers = router.provider_names();
    if providers.is_empty() {
        return None;
    }
    let preferred = cfg.llm.provider.to_lowercase();
    if providers.contains(&preferred) {
        router.set_default_provider(preferred);
    }
    Some(router)
}

/// 创建研究用的 LLM 客户端；没有任何 API Key 时使用 Mock
///
/// 模型名可带 `provider:` 前缀显式选择后端，否则按模型名前缀路由，其余落到 `llm.provider`；
/// `[llm.<provider>] model` 为该后端处理不属于它的模型名时使用的模型。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match build_router(cfg) {
        Some(router) => Arc::new(router),
        None => {
            tracing::warn!("No LLM API key set, using Mock LLM");
            MockLlmClient::new().into_arc()
        }
    }
}

/// 注册 Bing / Google 引擎；凭据缺失的引擎仍注册，调用时报未配置
pub fn create_search_from_config(cfg: &AppConfig) -> Arc<dyn SearchClient> {
    let client = http_client(cfg.search.timeout_secs);
    let defaults = SearchOptions {
        max_results: Some(cfg.search.max_results_per_engine),
        language: cfg.search.language.clone(),
        sort_by_time: None,
    };
    let mut search = MultiEngineSearchClient::new(cfg.search.engines.clone()).with_defaults(defaults);
    search.register(BingEngine::new(
        client.clone(),
        cfg.search.bing.api_key.clone(),
        cfg.search.bing.endpoint.clone(),
    ));
    search.register(GoogleEngine::new(
        client,
        cfg.search.google.api_key.clone(),
        cfg.search.google.cx.clone(),
        cfg.search.google.endpoint.clone(),
    ));

    let configured = search.configured_engines();
    if configured.is_empty() {
        tracing::warn!("No search engine credentials configured; searches will fail until keys are set");
    } else {
        tracing::info!(engines = ?configured, "search engines ready");
    }
    Arc::new(search)
}

pub fn create_runtime(cfg: &AppConfig) -> ResearchRuntime {
    ResearchRuntime::new(create_llm_from_config(cfg), create_search_from_config(cfg))
}
