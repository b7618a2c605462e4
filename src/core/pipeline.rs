//! 流水线描述：步骤 id、标签、权重，以及可选的自定义 handler
//!
//! 默认流水线为 search(0.35) → modeling(0.33) → report(0.32)；
//! 启用 planning 时为 planning(0.12) → search(0.31) → modeling(0.29) → report(0.28)。
//! 权重不要求和为 1，进度按总权重归一化。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::StepResult;
use crate::core::context::{ExecutionContext, StepConfig};
use crate::core::error::AgentError;
use crate::core::events::ProgressReporter;

pub const STEP_PLANNING: &str = "planning";
pub const STEP_SEARCH: &str = "search";
pub const STEP_MODELING: &str = "modeling";
pub const STEP_REPORT: &str = "report";

/// 自定义步骤的调用参数
pub struct StepInvocation<'a> {
    pub step: &'a PipelineStep,
    pub context: &'a ExecutionContext,
    /// 该步骤的任务级配置覆盖
    pub config: &'a StepConfig,
    pub progress: &'a ProgressReporter,
}

/// 自定义步骤 handler：绕过 Agent 注册表，直接产出 StepResult
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, invocation: StepInvocation<'_>) -> Result<StepResult, AgentError>;
}

/// 流水线中的一个步骤
#[derive(Clone)]
pub struct PipelineStep {
    pub id: String,
    pub label: String,
    pub weight: f64,
    pub handler: Option<Arc<dyn StepHandler>>,
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, label: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            weight,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// 参与归一化的权重：非有限或负数按 1 计
    pub fn effective_weight(&self) -> f64 {
        if self.weight.is_finite() && self.weight >= 0.0 {
            self.weight
        } else {
            1.0
        }
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("weight", &self.weight)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// 总权重；为 0 时返回 1，避免除零
pub fn total_weight(steps: &[PipelineStep]) -> f64 {
    let total: f64 = steps.iter().map(PipelineStep::effective_weight).sum();
    if total > 0.0 {
        total
    } else {
        1.0
    }
}

pub fn default_pipeline() -> Vec<PipelineStep> {
    vec![
        PipelineStep::new(STEP_SEARCH, "Searching sources", 0.35),
        PipelineStep::new(STEP_MODELING, "Modeling findings", 0.33),
        PipelineStep::new(STEP_REPORT, "Writing report", 0.32),
    ]
}

pub fn planning_pipeline() -> Vec<PipelineStep> {
    vec![
        PipelineStep::new(STEP_PLANNING, "Planning research", 0.12),
        PipelineStep::new(STEP_SEARCH, "Searching sources", 0.31),
        PipelineStep::new(STEP_MODELING, "Modeling findings", 0.29),
        PipelineStep::new(STEP_REPORT, "Writing report", 0.28),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_order() {
        let ids: Vec<_> = default_pipeline().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![STEP_SEARCH, STEP_MODELING, STEP_REPORT]);
        assert!((total_weight(&default_pipeline()) - 1.0).abs() < 1e-9);
        assert!((total_weight(&planning_pipeline()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_weight_guards() {
        assert_eq!(total_weight(&[]), 1.0);
        let zero = vec![PipelineStep::new("a", "A", 0.0)];
        assert_eq!(total_weight(&zero), 1.0);
        let odd = vec![
            PipelineStep::new("a", "A", f64::NAN),
            PipelineStep::new("b", "B", 3.0),
        ];
        assert_eq!(total_weight(&odd), 4.0);
    }
}
