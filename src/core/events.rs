//! 流水线事件与进度上报
//!
//! 每个步骤依次发出 start →（progress / token）* → complete 或 error；
//! progress 为整体进度 [0,1]，按步骤权重归一化。

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// 步骤事件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Start,
    Progress,
    Complete,
    Error,
    Token,
}

/// 发给调用方（CLI / SSE）的单个事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub step_id: String,
    pub status: StepStatus,
    /// 整体进度 [0,1]
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: i64,
}

impl PipelineEvent {
    pub fn new(step_id: impl Into<String>, status: StepStatus, progress: f64) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            progress: progress.clamp(0.0, 1.0),
            message: None,
            data: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// 事件发送端；接收端关闭后发送静默失败
pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;

pub(crate) fn emit(events: Option<&EventSender>, event: PipelineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// 单个步骤的进度上报器：把步骤内比例 ratio 映射为整体进度 (base + ratio * weight) / total
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    step_id: String,
    base: f64,
    weight: f64,
    total: f64,
    events: Option<EventSender>,
}

impl ProgressReporter {
    pub fn new(
        step_id: impl Into<String>,
        base: f64,
        weight: f64,
        total: f64,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            base,
            weight,
            total: if total > 0.0 { total } else { 1.0 },
            events,
        }
    }

    /// 不发事件的上报器（单独调用 Agent 时使用）
    pub fn detached(step_id: impl Into<String>) -> Self {
        Self::new(step_id, 0.0, 1.0, 1.0, None)
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// 是否有事件接收方
    pub fn has_listener(&self) -> bool {
        self.events.is_some()
    }

    /// 步骤内比例对应的整体进度
    pub fn overall(&self, ratio: f64) -> f64 {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        ((self.base + ratio * self.weight) / self.total).clamp(0.0, 1.0)
    }

    /// 上报步骤内进度，返回整体进度
    pub fn report(&self, ratio: f64, message: impl Into<String>) -> f64 {
        let progress = self.overall(ratio);
        emit(
            self.events.as_ref(),
            PipelineEvent::new(&self.step_id, StepStatus::Progress, progress).with_message(message),
        );
        progress
    }

    /// 转发流式 token（进度停留在步骤起点）
    pub fn token(&self, chunk: &str) {
        emit(
            self.events.as_ref(),
            PipelineEvent::new(&self.step_id, StepStatus::Token, self.overall(0.0))
                .with_data(serde_json::json!({ "token": chunk })),
        );
    }
}
