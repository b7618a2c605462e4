//! Agent 输入输出数据结构
//!
//! LLM 输出先经 extract_json 取出 JSON，再由这里的 `from_value` 宽松解析：
//! 缺字段取默认、类型不符的元素丢弃，只有整体形状不对时才返回 None 走降级。

use serde::Serialize;
use serde_json::{Map, Value};

use crate::search::SearchResult;

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn value_list(value: Option<&Value>) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn unit_number(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .map(|n| n.clamp(0.0, 1.0))
}

/// 研究计划（planning 步骤产出）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchPlan {
    pub summary: String,
    pub objectives: Vec<String>,
    pub questions: Vec<String>,
}

impl ResearchPlan {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let summary = string_field(obj, &["summary", "plan"])?;
        Some(Self {
            summary,
            objectives: string_list(obj.get("objectives")),
            questions: string_list(obj.get("questions")),
        })
    }
}

/// 搜索策略（SearchAgent 第一步的 LLM 输出）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStrategy {
    pub primary_query: Option<String>,
    pub queries: Vec<String>,
    pub notes: Option<String>,
    pub focus_areas: Vec<String>,
}

impl SearchStrategy {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let notes = match obj.get("notes") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(list @ Value::Array(_)) => {
                let joined = string_list(Some(list)).join("; ");
                (!joined.is_empty()).then_some(joined)
            }
            _ => None,
        };
        Some(Self {
            primary_query: string_field(obj, &["primaryQuery", "primary_query"]),
            queries: string_list(obj.get("queries")),
            notes,
            focus_areas: string_list(obj.get("focusAreas").or_else(|| obj.get("focus_areas"))),
        })
    }
}

/// 证据引用
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceQuote {
    pub quote: String,
    pub source: String,
    pub confidence: f64,
}

/// 证据笔记：由 SearchAgent 产出，供 Modeling / Report 引用
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceNote {
    pub summary: String,
    pub evidence: Vec<EvidenceQuote>,
    pub topic: String,
    pub source_url: String,
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl EvidenceNote {
    /// 直接由原始搜索结果构造（置信度 0.5）
    pub fn from_result(result: &SearchResult) -> Self {
        let summary = if result.snippet.trim().is_empty() {
            result.title.clone()
        } else {
            result.snippet.clone()
        };
        Self {
            evidence: vec![EvidenceQuote {
                quote: summary.clone(),
                source: result.url.clone(),
                confidence: 0.5,
            }],
            summary,
            topic: result.title.clone(),
            source_url: result.url.clone(),
            engine: result.engine.clone(),
            confidence: Some(0.5),
        }
    }

    /// 解析 LLM 给出的笔记，缺失字段用同下标的原始结果补齐
    pub fn from_value(value: &Value, fallback: Option<&SearchResult>) -> Option<Self> {
        let obj = value.as_object()?;
        let summary = string_field(obj, &["summary", "note", "content"])
            .or_else(|| fallback.map(|r| r.snippet.trim().to_string()).filter(|s| !s.is_empty()))?;
        let source_url = string_field(obj, &["sourceUrl", "source_url", "url"])
            .or_else(|| fallback.map(|r| r.url.clone()))
            .unwrap_or_default();

        let evidence: Vec<EvidenceQuote> = obj
            .get("evidence")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) if !s.trim().is_empty() => Some(EvidenceQuote {
                            quote: s.trim().to_string(),
                            source: source_url.clone(),
                            confidence: 0.5,
                        }),
                        Value::Object(q) => Some(EvidenceQuote {
                            quote: string_field(q, &["quote", "text"])?,
                            source: string_field(q, &["source", "url"])
                                .unwrap_or_else(|| source_url.clone()),
                            confidence: unit_number(q.get("confidence")).unwrap_or(0.5),
                        }),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let evidence = if evidence.is_empty() {
            vec![EvidenceQuote {
                quote: fallback
                    .map(|r| r.snippet.clone())
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| summary.clone()),
                source: source_url.clone(),
                confidence: 0.5,
            }]
        } else {
            evidence
        };

        Some(Self {
            topic: string_field(obj, &["topic", "title"])
                .or_else(|| fallback.map(|r| r.title.clone()))
                .unwrap_or_default(),
            engine: string_field(obj, &["engine"])
                .or_else(|| fallback.map(|r| r.engine.clone()))
                .unwrap_or_default(),
            confidence: unit_number(obj.get("confidence")),
            summary,
            evidence,
            source_url,
        })
    }
}

/// 单条查询的失败记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryError {
    pub query: String,
    pub error: String,
}

/// SearchAgent 输出
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutput {
    pub query: String,
    pub queries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SearchStrategy>,
    pub results: Vec<SearchResult>,
    pub notes: Vec<EvidenceNote>,
    pub highlights: Vec<String>,
    pub warnings: Vec<String>,
    pub search_errors: Vec<QueryError>,
}

impl SearchOutput {
    /// 传给建模步骤的关注点：策略备注 + focusAreas
    pub fn focus(&self) -> String {
        let Some(strategy) = &self.strategy else {
            return String::new();
        };
        let mut parts = Vec::new();
        if let Some(notes) = &strategy.notes {
            parts.push(notes.clone());
        }
        if !strategy.focus_areas.is_empty() {
            parts.push(format!("Focus areas: {}", strategy.focus_areas.join(", ")));
        }
        parts.join("\n")
    }
}

/// 核心驱动因素
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreDriver {
    pub name: String,
    pub description: String,
    pub evidence_refs: Vec<usize>,
    pub weight: f64,
}

/// 建模蓝图（ModelingAgent 产出）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBlueprint {
    pub model_type: String,
    pub core_drivers: Vec<CoreDriver>,
    pub relationships: Vec<Value>,
    pub scenarios: Vec<Value>,
    pub metrics: Vec<Value>,
    pub risks: Vec<Value>,
    pub opportunities: Vec<Value>,
    pub metadata: Map<String, Value>,
}

impl ModelBlueprint {
    /// 解析 LLM 蓝图；evidence_count 用于校验 evidenceRefs。
    /// 返回 (蓝图, 被丢弃的无效引用数)；既无 modelType 也无 coreDrivers 数组时视为形状错误
    pub fn from_value(value: &Value, evidence_count: usize) -> Option<(Self, usize)> {
        let obj = value.as_object()?;
        let model_type = string_field(obj, &["modelType", "model_type"]);
        let drivers = obj
            .get("coreDrivers")
            .or_else(|| obj.get("core_drivers"))
            .and_then(Value::as_array);
        if model_type.is_none() && drivers.is_none() {
            return None;
        }

        let mut dropped = 0;
        let core_drivers = drivers
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|d| {
                        let name = string_field(d, &["name", "driver"])?;
                        let refs = d
                            .get("evidenceRefs")
                            .or_else(|| d.get("evidence_refs"))
                            .and_then(Value::as_array)
                            .map(Vec::as_slice)
                            .unwrap_or_default();
                        let mut evidence_refs = Vec::with_capacity(refs.len());
                        // 负数、小数、非数字与越界引用都计入 dropped；重复引用只去重
                        for r in refs {
                            match r.as_u64().and_then(|n| usize::try_from(n).ok()) {
                                Some(i) if i < evidence_count => {
                                    if !evidence_refs.contains(&i) {
                                        evidence_refs.push(i);
                                    }
                                }
                                _ => dropped += 1,
                            }
                        }
                        Some(CoreDriver {
                            description: string_field(d, &["description", "summary"])
                                .unwrap_or_default(),
                            weight: unit_number(d.get("weight")).unwrap_or(0.5),
                            name,
                            evidence_refs,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let blueprint = Self {
            model_type: model_type.unwrap_or_else(|| "conceptual".to_string()),
            core_drivers,
            relationships: value_list(obj.get("relationships")),
            scenarios: value_list(obj.get("scenarios")),
            metrics: value_list(obj.get("metrics")),
            risks: value_list(obj.get("risks")),
            opportunities: value_list(obj.get("opportunities")),
            metadata: obj
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        };
        Some((blueprint, dropped))
    }
}

/// 报告大纲条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineSection {
    pub heading: String,
    pub level: u8,
    pub bullets: Vec<String>,
}

/// 报告引用来源
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSource {
    pub title: String,
    pub url: String,
    pub note_index: usize,
}

/// ReportAgent 输出
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportOutput {
    pub markdown: String,
    pub outline: Vec<OutlineSection>,
    pub sources: Vec<ReportSource>,
    pub metadata: Map<String, Value>,
}

/// 步骤输出
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AgentOutput {
    Plan(ResearchPlan),
    Search(Box<SearchOutput>),
    Blueprint(ModelBlueprint),
    Report(ReportOutput),
    /// 自定义步骤的任意输出
    Custom(Value),
}

/// 降级原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    ApiError,
    NoResults,
    SummarizeUnavailable,
    MissingAgent,
    LlmError,
    ParseError,
    StreamInterrupted,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::ApiError => "api_error",
            FallbackReason::NoResults => "no_results",
            FallbackReason::SummarizeUnavailable => "summarize_unavailable",
            FallbackReason::MissingAgent => "missing_agent",
            FallbackReason::LlmError => "llm_error",
            FallbackReason::ParseError => "parse_error",
            FallbackReason::StreamInterrupted => "stream_interrupted",
        }
    }
}

/// 步骤元数据；extra 存放各 Agent 自己的字段（平铺序列化）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    pub is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepMetadata {
    pub fn fallback(reason: FallbackReason) -> Self {
        let mut metadata = Self::default();
        metadata.mark_fallback(reason);
        metadata
    }

    pub fn mark_fallback(&mut self, reason: FallbackReason) {
        self.is_fallback = true;
        self.fallback_reason = Some(reason.as_str().to_string());
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.extra.insert(key.to_string(), value.into());
    }
}

/// 单个步骤的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub output: Option<AgentOutput>,
    pub metadata: StepMetadata,
}

impl StepResult {
    pub fn new(output: Option<AgentOutput>, metadata: StepMetadata) -> Self {
        Self { output, metadata }
    }

    /// 没有可用 Agent 时的占位结果
    pub fn missing_agent() -> Self {
        Self::new(None, StepMetadata::fallback(FallbackReason::MissingAgent))
    }

    pub fn as_plan(&self) -> Option<&ResearchPlan> {
        match &self.output {
            Some(AgentOutput::Plan(p)) => Some(p),
            _ => None,
        }
    }

    pub fn as_search(&self) -> Option<&SearchOutput> {
        match &self.output {
            Some(AgentOutput::Search(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_blueprint(&self) -> Option<&ModelBlueprint> {
        match &self.output {
            Some(AgentOutput::Blueprint(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_report(&self) -> Option<&ReportOutput> {
        match &self.output {
            Some(AgentOutput::Report(r)) => Some(r),
            _ => None,
        }
    }
}
