//! PlanningAgent：可选的第一步，为搜索提供研究计划摘要

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::{
    ask_json, invalid_payload, Agent, AgentOutput, AgentPayload, AgentRuntime, FallbackReason,
    ResearchPlan, StepMetadata, StepResult,
};
use crate::core::AgentError;
use crate::llm::LlmClient;

#[derive(Default)]
pub struct PlanningAgent {
    llm: Option<Arc<dyn LlmClient>>,
}

impl PlanningAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }
}

#[async_trait]
impl Agent for PlanningAgent {
    fn name(&self) -> &str {
        "planning"
    }

    fn llm(&self) -> Option<Arc<dyn LlmClient>> {
        self.llm.clone()
    }

    async fn run(&self, payload: AgentPayload, runtime: &AgentRuntime) -> Result<StepResult, AgentError> {
        let query = match payload {
            AgentPayload::Planning { query } => query,
            other => return Err(invalid_payload(self.name(), &other)),
        };
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(AgentError::MissingQuery);
        }

        runtime.progress.report(0.1, "Drafting research plan");
        let prompt = format!(
            r#"You are a research planner. Draft a short plan for researching the topic below.

Topic: {}

Output format (JSON only):
{{
    "summary": "2-4 sentence plan of what to investigate and why",
    "objectives": ["objective 1", "objective 2"],
    "questions": ["key question 1", "key question 2"]
}}"#,
            query
        );

        let parsed = ask_json(runtime, self.name(), &prompt)
            .await
            .and_then(|value| ResearchPlan::from_value(&value).ok_or(FallbackReason::ParseError));

        let mut metadata = StepMetadata::default();
        let plan = match parsed {
            Ok(plan) => plan,
            Err(reason) => {
                metadata.mark_fallback(reason);
                ResearchPlan {
                    summary: query.clone(),
                    objectives: Vec::new(),
                    questions: vec![query.clone()],
                }
            }
        };
        metadata.insert("objectiveCount", plan.objectives.len());

        Ok(StepResult::new(Some(AgentOutput::Plan(plan)), metadata))
    }
}
