//! SearchAgent：策略 → 组装查询 → 顺序搜索 → 去重截断 → 压缩为证据笔记
//!
//! 单次执行不重试。策略或摘要的 LLM 失败只会让本步骤降级，不会向上抛错。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{
    ask_json, invalid_payload, truncate_chars, Agent, AgentDefaults, AgentOutput, AgentPayload,
    AgentRuntime, EvidenceNote, FallbackReason, QueryError, SearchOutput, SearchStrategy,
    StepMetadata, StepResult,
};
use crate::core::{resolve_step_config, AgentError, StepConfig};
use crate::llm::LlmClient;
use crate::search::{dedupe_results, SearchOptions, SearchResult};

pub const DEFAULT_MAX_QUERIES: usize = 4;
pub const DEFAULT_MAX_RESULTS: usize = 15;
/// 相邻两次查询之间的固定间隔
pub const QUERY_DELAY: Duration = Duration::from_millis(600);

const PLAN_SUMMARY_CHARS: usize = 800;
const CONDENSED_RESULTS_CHARS: usize = 3500;
const MAX_DERIVED_NOTES: usize = 8;

pub struct SearchAgent {
    defaults: StepConfig,
    query_delay: Duration,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Default for SearchAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchAgent {
    pub fn new() -> Self {
        Self {
            defaults: StepConfig {
                max_queries: Some(DEFAULT_MAX_QUERIES),
                max_results: Some(DEFAULT_MAX_RESULTS),
                ..StepConfig::default()
            },
            query_delay: QUERY_DELAY,
            llm: None,
        }
    }

    pub fn with_defaults(mut self, defaults: &AgentDefaults) -> Self {
        self.defaults.max_queries = Some(defaults.max_queries);
        self.defaults.max_results = Some(defaults.max_results);
        self.defaults.engines = defaults.engines.clone();
        self.defaults.language = defaults.language.clone();
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 测试中用 Duration::ZERO 跳过查询间隔
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    async fn strategize(
        &self,
        query: &str,
        plan_summary: Option<&str>,
        runtime: &AgentRuntime,
    ) -> Option<SearchStrategy> {
        let plan = plan_summary
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("\nPrior research plan:\n{}\n", truncate_chars(s, PLAN_SUMMARY_CHARS)))
            .unwrap_or_default();

        let prompt = format!(
            r#"You are a research strategist. Plan web searches for the research topic below.
Queries should be specific, suitable for a web search engine, and cover different aspects of the topic.

Topic: {}
{}
Output format (JSON only):
{{
    "primaryQuery": "the single best search query",
    "queries": ["query 1", "query 2", "query 3"],
    "notes": "what the searches should establish",
    "focusAreas": ["area 1", "area 2"]
}}"#,
            query, plan
        );

        match ask_json(runtime, self.name(), &prompt).await {
            Ok(value) => SearchStrategy::from_value(&value),
            Err(_) => None,
        }
    }

    async fn summarize(
        &self,
        query: &str,
        results: &[SearchResult],
        runtime: &AgentRuntime,
    ) -> Option<Value> {
        let condensed = results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("[{}] {}\nURL: {}\nSnippet: {}", i, r.title, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");
        let condensed = truncate_chars(&condensed, CONDENSED_RESULTS_CHARS);

        let prompt = format!(
            r#"Compress the search results below into evidence notes for the research topic.
Write one note per result, in the same order as the results.

Topic: {}

Search results:
{}

Output format (JSON only):
{{
    "notes": [
        {{
            "summary": "one or two sentence finding",
            "evidence": [{{"quote": "supporting quote", "source": "url", "confidence": 0.8}}],
            "topic": "short label",
            "sourceUrl": "url",
            "engine": "engine name",
            "confidence": 0.8
        }}
    ],
    "highlights": ["key highlight"],
    "warnings": ["gaps or conflicting sources"],
    "metadata": {{}}
}}"#,
            query, condensed
        );

        ask_json(runtime, self.name(), &prompt).await.ok()
    }
}

/// 组装查询：primaryQuery（缺省为 topic）必在首位，其余为去重后的策略查询，总数不超过 max_queries
pub fn assemble_queries(
    topic: &str,
    strategy: Option<&SearchStrategy>,
    max_queries: usize,
) -> Vec<String> {
    let max_queries = max_queries.max(1);
    let primary = strategy
        .and_then(|s| s.primary_query.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(topic)
        .to_string();

    let mut queries: Vec<String> = Vec::new();
    for q in strategy.map(|s| s.queries.as_slice()).unwrap_or_default() {
        let q = q.trim();
        if q.is_empty() || queries.iter().any(|existing| existing.eq_ignore_ascii_case(q)) {
            continue;
        }
        queries.push(q.to_string());
        if queries.len() == max_queries {
            break;
        }
    }

    if !queries.iter().any(|q| q.eq_ignore_ascii_case(&primary)) {
        queries.insert(0, primary);
        queries.truncate(max_queries);
    }
    if queries.is_empty() {
        queries.push(topic.to_string());
    }
    queries
}

/// 证据笔记：优先使用 LLM 的 notes（按下标用原始结果补齐），否则由原始结果直接派生
pub fn derive_notes(summary: Option<&Value>, results: &[SearchResult]) -> Vec<EvidenceNote> {
    let notes = summary.and_then(|s| match s {
        Value::Array(items) => Some(items),
        other => other.get("notes").and_then(Value::as_array),
    });
    if let Some(notes) = notes {
        let mapped: Vec<EvidenceNote> = notes
            .iter()
            .enumerate()
            .filter_map(|(i, note)| EvidenceNote::from_value(note, results.get(i)))
            .collect();
        if !mapped.is_empty() {
            return mapped;
        }
    }
    results
        .iter()
        .take(MAX_DERIVED_NOTES)
        .map(EvidenceNote::from_result)
        .collect()
}

/// 降级分类，优先级 api_error > no_results > summarize_unavailable
pub fn classify_fallback(
    error_count: usize,
    result_count: usize,
    summarized: bool,
) -> Option<FallbackReason> {
    if error_count > 0 && result_count == 0 {
        Some(FallbackReason::ApiError)
    } else if result_count == 0 {
        Some(FallbackReason::NoResults)
    } else if !summarized {
        Some(FallbackReason::SummarizeUnavailable)
    } else {
        None
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Agent for SearchAgent {
    fn name(&self) -> &str {
        "search"
    }

    fn default_config(&self) -> StepConfig {
        self.defaults.clone()
    }

    fn llm(&self) -> Option<Arc<dyn LlmClient>> {
        self.llm.clone()
    }

    async fn run(&self, payload: AgentPayload, runtime: &AgentRuntime) -> Result<StepResult, AgentError> {
        let (query, plan_summary) = match payload {
            AgentPayload::Search { query, plan_summary } => (query, plan_summary),
            other => return Err(invalid_payload(self.name(), &other)),
        };
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(AgentError::MissingQuery);
        }

        let config = resolve_step_config(&self.defaults, &runtime.config);
        let max_queries = config.max_queries.unwrap_or(DEFAULT_MAX_QUERIES);
        let max_results = config.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let engines = config.engines.clone().unwrap_or_default();
        let options = SearchOptions {
            max_results: None,
            language: config.language.clone(),
            sort_by_time: config.sort_by_time,
        };

        runtime.progress.report(0.05, "Planning search strategy");
        let strategy = self
            .strategize(&query, plan_summary.as_deref(), runtime)
            .await;
        let queries = assemble_queries(&query, strategy.as_ref(), max_queries);
        tracing::info!(
            query = %query,
            queries = queries.len(),
            strategy = strategy.is_some(),
            "search queries assembled"
        );
        runtime
            .progress
            .report(0.15, format!("Running {} search queries", queries.len()));

        let mut collected: Vec<SearchResult> = Vec::new();
        let mut search_errors: Vec<QueryError> = Vec::new();
        for (i, q) in queries.iter().enumerate() {
            if i > 0 && !self.query_delay.is_zero() {
                tokio::time::sleep(self.query_delay).await;
            }
            match runtime.search.search(q, &engines, &options).await {
                Ok(resp) if resp.success => collected.extend(resp.data.results),
                Ok(resp) => search_errors.push(QueryError {
                    query: q.clone(),
                    error: resp.error.unwrap_or_else(|| "search failed".to_string()),
                }),
                Err(e) => search_errors.push(QueryError {
                    query: q.clone(),
                    error: e.to_string(),
                }),
            }
            runtime.progress.report(
                0.15 + 0.55 * (i + 1) as f64 / queries.len() as f64,
                format!("Searched: {}", q),
            );
        }

        let mut results = dedupe_results(collected);
        results.truncate(max_results);

        let summary = if results.is_empty() {
            None
        } else {
            runtime.progress.report(0.75, "Summarizing evidence");
            self.summarize(&query, &results, runtime).await
        };
        let notes = derive_notes(summary.as_ref(), &results);

        let mut metadata = StepMetadata::default();
        if let Some(reason) = classify_fallback(search_errors.len(), results.len(), summary.is_some()) {
            tracing::warn!(query = %query, reason = reason.as_str(), "search step degraded");
            metadata.mark_fallback(reason);
        }
        metadata.insert("queryCount", queries.len());
        metadata.insert("resultCount", results.len());
        metadata.insert("noteCount", notes.len());
        metadata.insert("errorCount", search_errors.len());
        metadata.insert("engines", json!(engines));
        if let Some(extra) = summary
            .as_ref()
            .and_then(|s| s.get("metadata"))
            .filter(|m| m.is_object())
        {
            metadata.insert("summaryMetadata", extra.clone());
        }

        let output = SearchOutput {
            highlights: strings(summary.as_ref().and_then(|s| s.get("highlights"))),
            warnings: strings(summary.as_ref().and_then(|s| s.get("warnings"))),
            query,
            queries,
            strategy,
            results,
            notes,
            search_errors,
        };
        Ok(StepResult::new(
            Some(AgentOutput::Search(Box::new(output))),
            metadata,
        ))
    }
}
