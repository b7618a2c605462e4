//! 错误类型
//!
//! AgentError：单个步骤（Agent / 自定义 handler）内的硬失败；可降级的失败不走这里，而是写入 StepMetadata。
//! ResearchError：一次研究任务整体失败，StepFailed 携带失败前已完成步骤的上下文。

use thiserror::Error;

use crate::core::ExecutionContext;
use crate::llm::LlmError;
use crate::search::SearchError;

/// 步骤执行错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Missing research query")]
    MissingQuery,

    #[error("Agent '{agent}' cannot handle payload for step '{step}'")]
    InvalidPayload { agent: String, step: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Step handler failed: {0}")]
    Handler(String),
}

/// 研究任务错误
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("A research task is already running")]
    AlreadyRunning,

    #[error("Research topic must not be empty")]
    EmptyTopic,

    #[error("Step '{step_id}' failed: {source}")]
    StepFailed {
        step_id: String,
        #[source]
        source: AgentError,
        /// 失败时的上下文（含已完成步骤的结果）
        partial: Box<ExecutionContext>,
    },
}

impl ResearchError {
    /// 失败步骤 id（仅 StepFailed 有）
    pub fn step_id(&self) -> Option<&str> {
        match self {
            ResearchError::StepFailed { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// 失败前已完成的部分上下文
    pub fn partial_context(&self) -> Option<&ExecutionContext> {
        match self {
            ResearchError::StepFailed { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
