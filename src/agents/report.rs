//! ReportAgent：基于蓝图与证据生成 Markdown 报告，并抽取大纲与来源
//!
//! 运行时带有 token 回调且客户端支持原生流式时走流式模式（边生成边转发）；
//! 否则一次性生成。生成失败且没有任何输出时，用蓝图与证据拼出确定性的降级报告。

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::agents::{
    invalid_payload, truncate_chars, Agent, AgentDefaults, AgentOutput, AgentPayload,
    AgentRuntime, EvidenceNote, FallbackReason, ModelBlueprint, OutlineSection, ReportOutput,
    ReportSource, StepMetadata, StepResult,
};
use crate::core::{resolve_step_config, AgentError, StepConfig};
use crate::llm::{LlmClient, TokenEvent, TokenSink};

pub const DEFAULT_AUDIENCE: &str = "executive";
pub const DEFAULT_FORMAT: &str = "markdown";

const DIGEST_CHARS: usize = 2200;
const DIGEST_DRIVERS: usize = 5;
const DIGEST_RELATIONSHIPS: usize = 5;
const DIGEST_SCENARIOS: usize = 3;
const MAX_EVIDENCE_ITEMS: usize = 10;
const EVIDENCE_TOTAL_CHARS: usize = 3200;

pub struct ReportAgent {
    defaults: StepConfig,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Default for ReportAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportAgent {
    pub fn new() -> Self {
        Self {
            defaults: StepConfig {
                audience: Some(DEFAULT_AUDIENCE.to_string()),
                format: Some(DEFAULT_FORMAT.to_string()),
                ..StepConfig::default()
            },
            llm: None,
        }
    }

    pub fn with_defaults(mut self, defaults: &AgentDefaults) -> Self {
        self.defaults.audience = Some(defaults.audience.clone());
        self.defaults.format = Some(defaults.format.clone());
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 流式生成：chunk 累积到缓冲区并转发给调用方；返回 (已收到的文本, Done 携带的错误)
    async fn generate_streaming(
        &self,
        prompt: &str,
        runtime: &AgentRuntime,
    ) -> (String, Option<String>) {
        let buffer = Arc::new(Mutex::new(String::new()));
        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let forward = runtime.on_token.clone();

        let sink: TokenSink = {
            let buffer = buffer.clone();
            let failure = failure.clone();
            Arc::new(move |event: TokenEvent| {
                match &event {
                    TokenEvent::Chunk(chunk) => {
                        if let Ok(mut b) = buffer.lock() {
                            b.push_str(chunk);
                        }
                    }
                    TokenEvent::Done { error: Some(e) } => {
                        if let Ok(mut f) = failure.lock() {
                            *f = Some(e.clone());
                        }
                    }
                    TokenEvent::Done { error: None } => {}
                }
                if let Some(forward) = &forward {
                    forward(event);
                }
            })
        };

        runtime
            .llm
            .generate_stream(&runtime.model, prompt, &sink, &runtime.sampling)
            .await;

        let text = buffer.lock().map(|b| b.clone()).unwrap_or_default();
        let failure = failure.lock().ok().and_then(|f| f.clone());
        (text, failure)
    }
}

fn blueprint_digest(blueprint: Option<&ModelBlueprint>) -> String {
    let Some(bp) = blueprint else {
        return "(no model available)".to_string();
    };
    let digest = json!({
        "modelType": bp.model_type,
        "coreDrivers": bp.core_drivers.iter().take(DIGEST_DRIVERS).collect::<Vec<_>>(),
        "relationships": bp.relationships.iter().take(DIGEST_RELATIONSHIPS).collect::<Vec<_>>(),
        "scenarios": bp.scenarios.iter().take(DIGEST_SCENARIOS).collect::<Vec<_>>(),
    });
    truncate_chars(&digest.to_string(), DIGEST_CHARS)
}

fn evidence_digest(evidence: &[EvidenceNote]) -> String {
    let lines = evidence
        .iter()
        .take(MAX_EVIDENCE_ITEMS)
        .enumerate()
        .map(|(i, note)| {
            format!(
                "[{}] {} | {} | {}",
                i,
                truncate_chars(&note.summary, 300),
                truncate_chars(&note.topic, 120),
                truncate_chars(&note.source_url, 200)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    if lines.is_empty() {
        return "(no evidence collected)".to_string();
    }
    truncate_chars(&lines, EVIDENCE_TOTAL_CHARS)
}

fn build_prompt(
    query: &str,
    audience: &str,
    format: &str,
    blueprint: Option<&ModelBlueprint>,
    evidence: &[EvidenceNote],
) -> String {
    format!(
        r#"You are a senior research analyst writing for a {} audience.
Write a research report on the topic below in {} format.
Use level 1 to level 3 Markdown headings, with the key points of each section as a bullet list directly under its heading.
Cite evidence inline by its [index].

Topic: {}

Model blueprint:
{}

Evidence:
{}

Report:"#,
        audience,
        format,
        query,
        blueprint_digest(blueprint),
        evidence_digest(evidence)
    )
}

/// 去掉整体包裹的 ``` / ```markdown 代码块
fn strip_outer_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() > 6) {
        return trimmed;
    }
    let inner = &trimmed[..trimmed.len() - 3];
    match inner.find('\n') {
        Some(idx) => inner[idx + 1..].trim(),
        None => trimmed,
    }
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,3})\s+(.+?)\s*#*\s*$").expect("valid heading regex"))
}

fn bullet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.+?)\s*$").expect("valid bullet regex"))
}

/// 大纲：1–3 级标题及紧随其后的列表项（空行跳过，遇到其它内容停止收集）；代码块内忽略
pub fn parse_outline(markdown: &str) -> Vec<OutlineSection> {
    let mut sections: Vec<OutlineSection> = Vec::new();
    let mut collecting = false;
    let mut in_code = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            collecting = false;
            continue;
        }
        if in_code {
            continue;
        }
        if let Some(caps) = heading_regex().captures(line) {
            sections.push(OutlineSection {
                heading: caps[2].trim().to_string(),
                level: caps[1].len() as u8,
                bullets: Vec::new(),
            });
            collecting = true;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        if collecting {
            if let (Some(caps), Some(section)) = (bullet_regex().captures(line), sections.last_mut()) {
                section.bullets.push(caps[1].to_string());
                continue;
            }
            collecting = false;
        }
    }
    sections
}

/// 来源：带 URL 的证据笔记
pub fn collect_sources(evidence: &[EvidenceNote]) -> Vec<ReportSource> {
    evidence
        .iter()
        .enumerate()
        .filter(|(_, note)| !note.source_url.trim().is_empty())
        .map(|(i, note)| ReportSource {
            title: if note.topic.trim().is_empty() {
                note.source_url.clone()
            } else {
                note.topic.clone()
            },
            url: note.source_url.clone(),
            note_index: i,
        })
        .collect()
}

/// 确定性降级报告
pub fn fallback_markdown(
    query: &str,
    blueprint: Option<&ModelBlueprint>,
    evidence: &[EvidenceNote],
) -> String {
    let mut md = format!("# Research Report: {}\n\n", query);
    md.push_str("## Summary\n");
    md.push_str("- Automated synthesis was unavailable; this report lists the collected model drivers and evidence.\n\n");

    md.push_str("## Key Drivers\n");
    let drivers = blueprint.map(|b| b.core_drivers.as_slice()).unwrap_or_default();
    if drivers.is_empty() {
        md.push_str("- No model drivers available\n");
    }
    for driver in drivers {
        if driver.description.is_empty() {
            md.push_str(&format!("- **{}**\n", driver.name));
        } else {
            md.push_str(&format!("- **{}**: {}\n", driver.name, driver.description));
        }
    }

    md.push_str("\n## Evidence\n");
    if evidence.is_empty() {
        md.push_str("- No evidence collected\n");
    }
    for note in evidence.iter().take(MAX_EVIDENCE_ITEMS) {
        if note.source_url.is_empty() {
            md.push_str(&format!("- {}\n", note.summary));
        } else {
            md.push_str(&format!("- {} ([source]({}))\n", note.summary, note.source_url));
        }
    }
    md
}

#[async_trait]
impl Agent for ReportAgent {
    fn name(&self) -> &str {
        "report"
    }

    fn default_config(&self) -> StepConfig {
        self.defaults.clone()
    }

    fn llm(&self) -> Option<Arc<dyn LlmClient>> {
        self.llm.clone()
    }

    async fn run(&self, payload: AgentPayload, runtime: &AgentRuntime) -> Result<StepResult, AgentError> {
        let (query, audience, format, blueprint, evidence) = match payload {
            AgentPayload::Report {
                query,
                audience,
                format,
                blueprint,
                evidence,
            } => (query, audience, format, blueprint, evidence),
            other => return Err(invalid_payload(self.name(), &other)),
        };
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(AgentError::MissingQuery);
        }

        let config = resolve_step_config(&self.defaults, &runtime.config);
        let pick = |given: String, configured: Option<String>, default: &str| {
            let given = given.trim().to_string();
            if given.is_empty() {
                configured.unwrap_or_else(|| default.to_string())
            } else {
                given
            }
        };
        let audience = pick(audience, config.audience.clone(), DEFAULT_AUDIENCE);
        let format = pick(format, config.format.clone(), DEFAULT_FORMAT);

        let prompt = build_prompt(&query, &audience, &format, blueprint.as_ref(), &evidence);
        let streamed = runtime.on_token.is_some() && runtime.llm.supports_streaming();
        runtime.progress.report(
            0.1,
            if streamed { "Streaming report" } else { "Generating report" },
        );
        tracing::info!(query = %query, streamed, model = %runtime.model, "report generation started");

        let (text, failure) = if streamed {
            self.generate_streaming(&prompt, runtime).await
        } else {
            match runtime
                .llm
                .generate(&runtime.model, &prompt, &runtime.sampling)
                .await
            {
                Ok(text) => (text, None),
                Err(e) => (String::new(), Some(e.to_string())),
            }
        };

        let mut metadata = StepMetadata::default();
        let generated = strip_outer_fence(&text);
        let markdown = if generated.is_empty() {
            tracing::warn!(error = ?failure, "report generation failed, using fallback report");
            metadata.mark_fallback(FallbackReason::LlmError);
            fallback_markdown(&query, blueprint.as_ref(), &evidence)
        } else {
            if failure.is_some() {
                tracing::warn!(error = ?failure, "report stream interrupted, keeping partial text");
                metadata.mark_fallback(FallbackReason::StreamInterrupted);
            }
            generated.to_string()
        };
        if let Some(error) = failure {
            metadata.insert("error", error);
        }

        let outline = parse_outline(&markdown);
        let sources = collect_sources(&evidence);
        metadata.insert("streamed", streamed);
        metadata.insert("sectionCount", outline.len());
        metadata.insert("sourceCount", sources.len());

        let mut report_meta = serde_json::Map::new();
        report_meta.insert("audience".into(), Value::String(audience));
        report_meta.insert("format".into(), Value::String(format));
        report_meta.insert(
            "generatedAt".into(),
            json!(chrono::Utc::now().timestamp_millis()),
        );

        Ok(StepResult::new(
            Some(AgentOutput::Report(ReportOutput {
                markdown,
                outline,
                sources,
                metadata: report_meta,
            })),
            metadata,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::CoreDriver;
    use crate::llm::{LlmError, Message, MockLlmClient, SamplingOptions};
    use crate::search::{SearchResponse, StaticSearchClient};

    const REPORT: &str = "# AI in Education\n\nIntro paragraph.\n\n## Drivers\n- Cost falls [0]\n\n* Teacher training\nNot a bullet\n- ignored bullet\n### Risks ###\n1. Privacy\n#### Too deep\n- skipped\n";

    fn evidence() -> Vec<EvidenceNote> {
        vec![
            EvidenceNote {
                summary: "Cost falls".into(),
                topic: "Pricing".into(),
                source_url: "https://a.com".into(),
                ..EvidenceNote::default()
            },
            EvidenceNote {
                summary: "No link".into(),
                ..EvidenceNote::default()
            },
        ]
    }

    fn payload() -> AgentPayload {
        AgentPayload::Report {
            query: "AI in education".into(),
            audience: String::new(),
            format: String::new(),
            blueprint: Some(ModelBlueprint {
                model_type: "causal_map".into(),
                core_drivers: vec![CoreDriver {
                    name: "Cost".into(),
                    description: "Falling prices".into(),
                    evidence_refs: vec![0],
                    weight: 0.7,
                }],
                ..ModelBlueprint::default()
            }),
            evidence: evidence(),
        }
    }

    fn runtime(llm: Arc<dyn LlmClient>) -> AgentRuntime {
        AgentRuntime::new(
            llm,
            Arc::new(StaticSearchClient::always(SearchResponse::ok(vec![]))),
            "m",
        )
    }

    #[test]
    fn test_parse_outline() {
        let outline = parse_outline(REPORT);
        assert_eq!(outline.len(), 3);
        assert_eq!(outline[0].heading, "AI in Education");
        assert_eq!(outline[0].level, 1);
        assert!(outline[0].bullets.is_empty());
        assert_eq!(outline[1].bullets, vec!["Cost falls [0]", "Teacher training"]);
        assert_eq!(outline[2].heading, "Risks");
        assert_eq!(outline[2].level, 3);
        assert_eq!(outline[2].bullets, vec!["Privacy"]);
    }

    #[test]
    fn test_outline_ignores_code_blocks() {
        let md = "## Setup\n```bash\n# not a heading\n```\n- after code\n";
        let outline = parse_outline(md);
        assert_eq!(outline.len(), 1);
        assert!(outline[0].bullets.is_empty());
    }

    #[test]
    fn test_strip_outer_fence() {
        assert_eq!(strip_outer_fence("```markdown\n# Title\n```"), "# Title");
        assert_eq!(strip_outer_fence("  # Title  "), "# Title");
    }

    #[tokio::test]
    async fn test_non_streaming_report() {
        let llm = MockLlmClient::scripted(vec![Ok(REPORT.to_string())]).into_arc();
        let result = ReportAgent::new().run(payload(), &runtime(llm)).await.unwrap();
        assert!(!result.metadata.is_fallback);
        assert_eq!(result.metadata.extra["streamed"], false);

        let report = result.as_report().unwrap();
        assert!(report.markdown.starts_with("# AI in Education"));
        assert_eq!(report.outline.len(), 3);
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].title, "Pricing");
        assert_eq!(report.sources[0].note_index, 0);
        assert_eq!(report.metadata["audience"], "executive");
        assert_eq!(report.metadata["format"], "markdown");
    }

    #[tokio::test]
    async fn test_streaming_forwards_tokens() {
        let llm = MockLlmClient::scripted(vec![Ok(REPORT.to_string())])
            .with_streaming(true)
            .into_arc();
        let seen: Arc<Mutex<Vec<TokenEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink: TokenSink = {
            let seen = seen.clone();
            Arc::new(move |e: TokenEvent| seen.lock().unwrap().push(e))
        };
        let rt = runtime(llm).with_on_token(Some(sink));

        let result = ReportAgent::new().run(payload(), &rt).await.unwrap();
        assert_eq!(result.metadata.extra["streamed"], true);
        assert_eq!(result.as_report().unwrap().markdown, REPORT.trim());

        let events = seen.lock().unwrap();
        assert!(events.len() > 2);
        assert_eq!(events.last(), Some(&TokenEvent::Done { error: None }));
        let joined: String = events
            .iter()
            .filter_map(|e| match e {
                TokenEvent::Chunk(c) => Some(c.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(joined, REPORT);
    }

    #[tokio::test]
    async fn test_token_sink_without_streaming_support_uses_generate() {
        let llm = MockLlmClient::scripted(vec![Ok(REPORT.to_string())]).into_arc();
        let sink: TokenSink = Arc::new(|_: TokenEvent| panic!("should not stream"));
        let rt = runtime(llm).with_on_token(Some(sink));
        let result = ReportAgent::new().run(payload(), &rt).await.unwrap();
        assert_eq!(result.metadata.extra["streamed"], false);
    }

    #[tokio::test]
    async fn test_llm_failure_builds_fallback_report() {
        let llm = MockLlmClient::scripted(vec![Err(LlmError::Timeout(60))]).into_arc();
        let result = ReportAgent::new().run(payload(), &runtime(llm)).await.unwrap();
        assert!(result.metadata.is_fallback);
        assert_eq!(result.metadata.fallback_reason.as_deref(), Some("llm_error"));

        let report = result.as_report().unwrap();
        assert!(report.markdown.starts_with("# Research Report: AI in education"));
        assert!(report.markdown.contains("- **Cost**: Falling prices"));
        assert!(report.markdown.contains("([source](https://a.com))"));
        let headings: Vec<_> = report.outline.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["Research Report: AI in education", "Summary", "Key Drivers", "Evidence"]);
    }

    struct InterruptedStream;

    #[async_trait]
    impl LlmClient for InterruptedStream {
        fn provider(&self) -> &str {
            "interrupted"
        }

        async fn chat(
            &self,
            _model: &str,
            _messages: &[Message],
            _options: &SamplingOptions,
        ) -> Result<String, LlmError> {
            Err(LlmError::Api("unused".into()))
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        async fn chat_stream(
            &self,
            _model: &str,
            _messages: &[Message],
            on_token: &TokenSink,
            _options: &SamplingOptions,
        ) {
            on_token(TokenEvent::Chunk("# Partial\n- first point\n".into()));
            on_token(TokenEvent::Done {
                error: Some("connection reset".into()),
            });
        }
    }

    #[tokio::test]
    async fn test_interrupted_stream_keeps_partial_text() {
        let sink: TokenSink = Arc::new(|_: TokenEvent| {});
        let rt = runtime(Arc::new(InterruptedStream)).with_on_token(Some(sink));
        let result = ReportAgent::new().run(payload(), &rt).await.unwrap();
        assert_eq!(
            result.metadata.fallback_reason.as_deref(),
            Some("stream_interrupted")
        );
        assert_eq!(result.metadata.extra["error"], "connection reset");
        let report = result.as_report().unwrap();
        assert_eq!(report.markdown, "# Partial\n- first point");
        assert_eq!(report.outline[0].bullets, vec!["first point"]);
    }
}
