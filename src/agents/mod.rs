//! 研究 Agent：每个流水线阶段一个实现（planning / search / modeling / report）
//!
//! Agent 只依赖 AgentRuntime 中注入的 LLM 与搜索客户端；上游失败在 Agent 内部消化为降级输出，
//! 只有输入本身不可用（如缺 query、payload 类型不符）才返回 AgentError。

pub mod modeling;
pub mod planning;
pub mod report;
pub mod search;
pub mod types;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AppConfig;
use crate::core::{AgentError, ProgressReporter, StepConfig};
use crate::core::pipeline::{STEP_MODELING, STEP_PLANNING, STEP_REPORT, STEP_SEARCH};
use crate::llm::{extract_json, LlmClient, SamplingOptions, TokenSink};
use crate::search::SearchClient;

pub use modeling::ModelingAgent;
pub use planning::PlanningAgent;
pub use report::ReportAgent;
pub use search::SearchAgent;
pub use types::{
    AgentOutput, CoreDriver, EvidenceNote, EvidenceQuote, FallbackReason, ModelBlueprint,
    OutlineSection, QueryError, ReportOutput, ReportSource, ResearchPlan, SearchOutput,
    SearchStrategy, StepMetadata, StepResult,
};

/// 各 Agent 的输入，由处理器根据已完成步骤的结果构造
#[derive(Debug, Clone, PartialEq)]
pub enum AgentPayload {
    Planning {
        query: String,
    },
    Search {
        query: String,
        plan_summary: Option<String>,
    },
    Modeling {
        query: String,
        focus: String,
        evidence: Vec<EvidenceNote>,
    },
    Report {
        query: String,
        audience: String,
        format: String,
        blueprint: Option<ModelBlueprint>,
        evidence: Vec<EvidenceNote>,
    },
    /// 自定义步骤：topic + 已完成步骤结果的 JSON
    Custom {
        query: String,
        upstream: Value,
    },
}

impl AgentPayload {
    pub fn query(&self) -> &str {
        match self {
            AgentPayload::Planning { query }
            | AgentPayload::Search { query, .. }
            | AgentPayload::Modeling { query, .. }
            | AgentPayload::Report { query, .. }
            | AgentPayload::Custom { query, .. } => query,
        }
    }
}

/// 单次步骤运行时：已解析好的模型、采样、步骤配置与进度上报
#[derive(Clone)]
pub struct AgentRuntime {
    pub llm: Arc<dyn LlmClient>,
    pub search: Arc<dyn SearchClient>,
    pub model: String,
    pub sampling: SamplingOptions,
    pub config: StepConfig,
    pub progress: ProgressReporter,
    /// 仅 report 步骤在调用方需要流式输出时设置
    pub on_token: Option<TokenSink>,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<dyn SearchClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            search,
            model: model.into(),
            sampling: SamplingOptions::new(),
            config: StepConfig::default(),
            progress: ProgressReporter::detached("agent"),
            on_token: None,
        }
    }

    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_on_token(mut self, on_token: Option<TokenSink>) -> Self {
        self.on_token = on_token;
        self
    }
}

impl fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("llm", &self.llm.provider())
            .field("model", &self.model)
            .field("sampling", &self.sampling)
            .field("config", &self.config)
            .field("streaming", &self.on_token.is_some())
            .finish()
    }
}

/// 流水线 Agent
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Agent 自身的默认配置；每次运行与任务覆盖合并，不会被修改
    fn default_config(&self) -> StepConfig {
        StepConfig::default()
    }

    /// Agent 自带的 LLM 客户端；None 时使用运行时注入的客户端
    fn llm(&self) -> Option<Arc<dyn LlmClient>> {
        None
    }

    async fn run(&self, payload: AgentPayload, runtime: &AgentRuntime) -> Result<StepResult, AgentError>;
}

/// 内置 Agent 的默认参数（来自 [research] 配置）
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefaults {
    pub max_queries: usize,
    pub max_results: usize,
    pub audience: String,
    pub format: String,
    pub engines: Option<Vec<String>>,
    pub language: Option<String>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_queries: search::DEFAULT_MAX_QUERIES,
            max_results: search::DEFAULT_MAX_RESULTS,
            audience: report::DEFAULT_AUDIENCE.to_string(),
            format: report::DEFAULT_FORMAT.to_string(),
            engines: None,
            language: None,
        }
    }
}

impl AgentDefaults {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_queries: cfg.research.max_queries,
            max_results: cfg.research.max_results,
            audience: cfg.research.audience.clone(),
            format: cfg.research.format.clone(),
            engines: (!cfg.search.engines.is_empty()).then(|| cfg.search.engines.clone()),
            language: cfg.search.language.clone(),
        }
    }
}

/// 按步骤 id 创建内置 Agent；未知 id 返回 None
pub fn default_agent(step_id: &str, defaults: &AgentDefaults) -> Option<Arc<dyn Agent>> {
    let agent: Arc<dyn Agent> = match step_id {
        STEP_PLANNING => Arc::new(PlanningAgent::new()),
        STEP_SEARCH => Arc::new(SearchAgent::new().with_defaults(defaults)),
        STEP_MODELING => Arc::new(ModelingAgent::new()),
        STEP_REPORT => Arc::new(ReportAgent::new().with_defaults(defaults)),
        _ => return None,
    };
    Some(agent)
}

/// 按字符截断（不切断 UTF-8）
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// 调用 LLM 并从回复中取出 JSON；失败原因区分调用失败与解析失败
pub(crate) async fn ask_json(
    runtime: &AgentRuntime,
    agent: &str,
    prompt: &str,
) -> Result<Value, FallbackReason> {
    tracing::debug!(agent, model = %runtime.model, prompt_chars = prompt.len(), "llm request");
    let text = runtime
        .llm
        .generate(&runtime.model, prompt, &runtime.sampling)
        .await
        .map_err(|e| {
            tracing::warn!(agent, error = %e, "llm call failed");
            FallbackReason::LlmError
        })?;
    extract_json(&text).ok_or_else(|| {
        tracing::warn!(agent, "llm reply contained no usable JSON");
        FallbackReason::ParseError
    })
}

pub(crate) fn invalid_payload(agent: &str, payload: &AgentPayload) -> AgentError {
    let step = match payload {
        AgentPayload::Planning { .. } => STEP_PLANNING,
        AgentPayload::Search { .. } => STEP_SEARCH,
        AgentPayload::Modeling { .. } => STEP_MODELING,
        AgentPayload::Report { .. } => STEP_REPORT,
        AgentPayload::Custom { .. } => "custom",
    };
    AgentError::InvalidPayload {
        agent: agent.to_string(),
        step: step.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("深度研究报告", 2), "深度");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_default_agent_registry() {
        let defaults = AgentDefaults::default();
        for id in [STEP_PLANNING, STEP_SEARCH, STEP_MODELING, STEP_REPORT] {
            assert!(default_agent(id, &defaults).is_some(), "{id}");
        }
        assert!(default_agent("translate", &defaults).is_none());
    }
}
