//! ModelingAgent：把证据笔记建模为结构化蓝图（驱动因素、关系、情景、指标、风险、机会）
//!
//! 一次 LLM 调用；调用或解析失败时由前 5 条证据生成 knowledge_graph 降级蓝图。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{
    ask_json, invalid_payload, truncate_chars, Agent, AgentOutput, AgentPayload, AgentRuntime,
    CoreDriver, EvidenceNote, FallbackReason, ModelBlueprint, StepMetadata, StepResult,
};
use crate::core::AgentError;
use crate::llm::LlmClient;

const FOCUS_CHARS: usize = 400;
const MAX_EVIDENCE_ITEMS: usize = 12;
const EVIDENCE_ITEM_CHARS: usize = 280;
const FALLBACK_DRIVERS: usize = 5;

#[derive(Default)]
pub struct ModelingAgent {
    llm: Option<Arc<dyn LlmClient>>,
}

impl ModelingAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }
}

fn build_prompt(query: &str, focus: &str, evidence: &[EvidenceNote]) -> String {
    let items = evidence
        .iter()
        .take(MAX_EVIDENCE_ITEMS)
        .enumerate()
        .map(|(i, note)| {
            let line = if note.source_url.is_empty() {
                note.summary.clone()
            } else {
                format!("{} (source: {})", note.summary, note.source_url)
            };
            format!("[{}] {}", i, truncate_chars(&line, EVIDENCE_ITEM_CHARS))
        })
        .collect::<Vec<_>>()
        .join("\n");
    let focus = truncate_chars(focus.trim(), FOCUS_CHARS);

    format!(
        r#"You are a research analyst. Build a structured model of the topic from the evidence below.
Reference evidence by its [index] in "evidenceRefs".

Topic: {}
Focus: {}

Evidence:
{}

Output format (JSON only):
{{
    "modelType": "system_dynamics | causal_map | knowledge_graph | framework",
    "coreDrivers": [{{"name": "driver", "description": "why it matters", "evidenceRefs": [0], "weight": 0.8}}],
    "relationships": [{{"from": "driver a", "to": "driver b", "type": "reinforces", "description": "..."}}],
    "scenarios": [{{"name": "scenario", "description": "...", "likelihood": "medium"}}],
    "metrics": [{{"name": "metric", "description": "..."}}],
    "risks": ["risk"],
    "opportunities": ["opportunity"],
    "metadata": {{}}
}}"#,
        query,
        if focus.is_empty() { "(none)" } else { focus.as_str() },
        if items.is_empty() { "(no evidence collected)".to_string() } else { items }
    )
}

/// 降级蓝图：前 5 条证据各生成一个驱动因素（权重 0.5，引用自身下标）
pub fn fallback_blueprint(evidence: &[EvidenceNote], reason: FallbackReason) -> ModelBlueprint {
    let core_drivers = evidence
        .iter()
        .take(FALLBACK_DRIVERS)
        .enumerate()
        .map(|(i, note)| CoreDriver {
            name: if note.topic.trim().is_empty() {
                truncate_chars(&note.summary, 60)
            } else {
                note.topic.clone()
            },
            description: note.summary.clone(),
            evidence_refs: vec![i],
            weight: 0.5,
        })
        .collect();

    let mut blueprint = ModelBlueprint {
        model_type: "knowledge_graph".to_string(),
        core_drivers,
        ..ModelBlueprint::default()
    };
    blueprint.metadata.insert(
        "warning".to_string(),
        Value::String(format!(
            "Model generated from raw evidence ({})",
            reason.as_str()
        )),
    );
    blueprint
}

#[async_trait]
impl Agent for ModelingAgent {
    fn name(&self) -> &str {
        "modeling"
    }

    fn llm(&self) -> Option<Arc<dyn LlmClient>> {
        self.llm.clone()
    }

    async fn run(&self, payload: AgentPayload, runtime: &AgentRuntime) -> Result<StepResult, AgentError> {
        let (query, focus, evidence) = match payload {
            AgentPayload::Modeling {
                query,
                focus,
                evidence,
            } => (query, focus, evidence),
            other => return Err(invalid_payload(self.name(), &other)),
        };
        if query.trim().is_empty() {
            return Err(AgentError::MissingQuery);
        }

        runtime.progress.report(0.1, "Building model blueprint");
        let prompt = build_prompt(query.trim(), &focus, &evidence);
        let parsed = ask_json(runtime, self.name(), &prompt).await.and_then(|value| {
            ModelBlueprint::from_value(&value, evidence.len()).ok_or_else(|| {
                tracing::warn!("model blueprint has unexpected shape");
                FallbackReason::ParseError
            })
        });

        let mut metadata = StepMetadata::default();
        let blueprint = match parsed {
            Ok((blueprint, dropped_refs)) => {
                if dropped_refs > 0 {
                    tracing::warn!(dropped_refs, "dropped out-of-range evidence refs");
                    metadata.insert("droppedEvidenceRefs", dropped_refs);
                }
                blueprint
            }
            Err(reason) => {
                metadata.mark_fallback(reason);
                metadata.insert("warning", "LLM blueprint unavailable, derived from evidence");
                fallback_blueprint(&evidence, reason)
            }
        };
        metadata.insert("driverCount", blueprint.core_drivers.len());
        metadata.insert("evidenceCount", evidence.len());

        Ok(StepResult::new(Some(AgentOutput::Blueprint(blueprint)), metadata))
    }
}
