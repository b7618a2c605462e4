//! 执行上下文与步骤配置
//!
//! ExecutionContext 在一次研究任务内贯穿所有步骤：topic 创建后不变，步骤结果只追加不覆盖。
//! StepConfig 是步骤级覆盖项（引擎、模型、采样、数量限制等），每次运行按
//! `resolve_step_config(Agent 默认, 任务覆盖)` 重新求值，不会写回 Agent。

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::agents::{EvidenceNote, ModelBlueprint, ReportOutput, ResearchPlan, SearchOutput, StepResult};
use crate::core::deep_agent::DeepAgentConfig;
use crate::core::error::ResearchError;
use crate::core::pipeline::{STEP_MODELING, STEP_PLANNING, STEP_REPORT, STEP_SEARCH};
use crate::llm::{SamplingOptions, TokenSink};
use crate::runtime::ResearchRuntime;

/// 步骤级配置（全部可选，None 表示沿用下层）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engines: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "SamplingOptions::is_empty")]
    pub sampling: SamplingOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by_time: Option<bool>,
}

impl StepConfig {
    /// 从请求 JSON 读取：键名 camelCase / snake_case 均可，类型不符的键忽略。
    /// 采样参数可平铺在顶层，也可放在 `sampling` 子对象里（后者优先）
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let get = |snake: &str, camel: &str| obj.get(snake).or_else(|| obj.get(camel));
        let text = |snake: &str, camel: &str| {
            get(snake, camel)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let count = |snake: &str, camel: &str| {
            get(snake, camel)
                .and_then(Value::as_u64)
                .map(|n| n as usize)
        };

        let engines = obj.get("engines").and_then(Value::as_array).map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        });

        let mut sampling = SamplingOptions::from_value(value);
        if let Some(nested) = obj.get("sampling") {
            sampling = sampling.merge(&SamplingOptions::from_value(nested));
        }

        Self {
            engines,
            model: text("model", "model"),
            sampling,
            max_queries: count("max_queries", "maxQueries"),
            max_results: count("max_results", "maxResults"),
            audience: text("audience", "audience"),
            format: text("format", "format"),
            language: text("language", "language"),
            sort_by_time: get("sort_by_time", "sortByTime").and_then(Value::as_bool),
        }
    }
}

/// 合并步骤配置：overrides 中已设置的字段覆盖 base；纯函数
pub fn resolve_step_config(base: &StepConfig, overrides: &StepConfig) -> StepConfig {
    StepConfig {
        engines: overrides.engines.clone().or_else(|| base.engines.clone()),
        model: overrides.model.clone().or_else(|| base.model.clone()),
        sampling: base.sampling.merge(&overrides.sampling),
        max_queries: overrides.max_queries.or(base.max_queries),
        max_results: overrides.max_results.or(base.max_results),
        audience: overrides.audience.clone().or_else(|| base.audience.clone()),
        format: overrides.format.clone().or_else(|| base.format.clone()),
        language: overrides.language.clone().or_else(|| base.language.clone()),
        sort_by_time: overrides.sort_by_time.or(base.sort_by_time),
    }
}

/// 一次研究任务的执行上下文
pub struct ExecutionContext {
    topic: String,
    pub base_model: String,
    /// 按步骤 id 的配置覆盖
    pub task: HashMap<String, StepConfig>,
    pub deep_agent: DeepAgentConfig,
    pub runtime: ResearchRuntime,
    /// report 步骤的流式 token 回调
    pub on_token: Option<TokenSink>,
    pub started_at: i64,
    pub aborted: bool,
    results: HashMap<String, StepResult>,
    order: Vec<String>,
}

impl ExecutionContext {
    pub fn new(
        topic: &str,
        base_model: impl Into<String>,
        runtime: ResearchRuntime,
    ) -> Result<Self, ResearchError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ResearchError::EmptyTopic);
        }
        let base_model = base_model.into();
        Ok(Self {
            topic: topic.to_string(),
            deep_agent: DeepAgentConfig::for_model(&base_model),
            base_model,
            task: HashMap::new(),
            runtime,
            on_token: None,
            started_at: Utc::now().timestamp_millis(),
            aborted: false,
            results: HashMap::new(),
            order: Vec::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 记录步骤结果；同一步骤已有结果时拒绝覆盖并返回 false
    pub fn record(&mut self, step_id: &str, result: StepResult) -> bool {
        if self.results.contains_key(step_id) {
            tracing::warn!(step_id, "step result already recorded, ignoring");
            return false;
        }
        self.order.push(step_id.to_string());
        self.results.insert(step_id.to_string(), result);
        true
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    /// 按完成顺序返回 (step_id, result)
    pub fn results(&self) -> impl Iterator<Item = (&str, &StepResult)> {
        self.order
            .iter()
            .filter_map(|id| self.results.get(id).map(|r| (id.as_str(), r)))
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.order
    }

    pub fn step_config(&self, step_id: &str) -> StepConfig {
        self.task.get(step_id).cloned().unwrap_or_default()
    }

    pub fn plan(&self) -> Option<&ResearchPlan> {
        self.result(STEP_PLANNING).and_then(StepResult::as_plan)
    }

    pub fn search_output(&self) -> Option<&SearchOutput> {
        self.result(STEP_SEARCH).and_then(StepResult::as_search)
    }

    pub fn blueprint(&self) -> Option<&ModelBlueprint> {
        self.result(STEP_MODELING).and_then(StepResult::as_blueprint)
    }

    pub fn report(&self) -> Option<&ReportOutput> {
        self.result(STEP_REPORT).and_then(StepResult::as_report)
    }

    /// search 步骤产出的证据
    pub fn evidence(&self) -> Vec<EvidenceNote> {
        self.search_output()
            .map(|s| s.notes.clone())
            .unwrap_or_default()
    }

    /// 所有步骤结果的 JSON 视图（按完成顺序）
    pub fn results_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (id, result) in self.results() {
            map.insert(
                id.to_string(),
                serde_json::to_value(result).unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("topic", &self.topic)
            .field("base_model", &self.base_model)
            .field("task", &self.task)
            .field("deep_agent", &self.deep_agent)
            .field("runtime", &self.runtime)
            .field("started_at", &self.started_at)
            .field("aborted", &self.aborted)
            .field("completed_steps", &self.order)
            .finish()
    }
}
