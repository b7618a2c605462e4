//! 核心编排：执行上下文、步骤流水线、事件、状态与研究任务处理器

pub mod context;
pub mod deep_agent;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod state;
pub mod supervisor;

pub use context::{resolve_step_config, ExecutionContext, StepConfig};
pub use deep_agent::{resolve_deep_agent_config, DeepAgentConfig, DeepAgentOptions};
pub use error::{AgentError, ResearchError};
pub use events::{EventSender, PipelineEvent, ProgressReporter, StepStatus};
pub use orchestrator::{create_step_payload, ResearchOptions, ResearchTaskProcessor};
pub use pipeline::{
    default_pipeline, planning_pipeline, total_weight, PipelineStep, StepHandler, StepInvocation,
};
pub use state::ProcessorStatus;
pub use supervisor::TaskSupervisor;
