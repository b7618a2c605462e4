//! 研究任务处理器：主控流程
//!
//! 负责：单任务互斥、构建执行上下文、按权重推进流水线、惰性创建并缓存 Agent、
//! 逐步解析模型/采样/步骤配置、在步骤边界检查取消，以及无论成败都复位处理状态。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::{default_agent, Agent, AgentDefaults, AgentPayload, AgentRuntime, SearchOutput, StepResult};
use crate::config::AppConfig;
use crate::core::context::{resolve_step_config, ExecutionContext, StepConfig};
use crate::core::deep_agent::{resolve_deep_agent_config, DeepAgentOptions};
use crate::core::error::{AgentError, ResearchError};
use crate::core::events::{emit, EventSender, PipelineEvent, ProgressReporter, StepStatus};
use crate::core::pipeline::{
    default_pipeline, planning_pipeline, total_weight, PipelineStep, StepInvocation, STEP_MODELING,
    STEP_PLANNING, STEP_REPORT, STEP_SEARCH,
};
use crate::core::state::ProcessorStatus;
use crate::core::supervisor::TaskSupervisor;
use crate::llm::{TokenEvent, TokenSink};
use crate::runtime::ResearchRuntime;

/// 单次研究任务的选项
#[derive(Clone, Default)]
pub struct ResearchOptions {
    /// 按步骤 id 的配置覆盖
    pub task: HashMap<String, StepConfig>,
    pub deep_agent: DeepAgentOptions,
    /// None 时沿用处理器默认
    pub include_planning: Option<bool>,
    /// 自定义流水线（优先于 include_planning）
    pub pipeline: Option<Vec<PipelineStep>>,
    /// report 步骤的流式 token 回调
    pub on_token: Option<TokenSink>,
    /// 本次运行替换的 LLM / 搜索客户端
    pub runtime: Option<ResearchRuntime>,
}

impl ResearchOptions {
    /// 从请求 JSON 读取：`{task: {stepId: {...}}, deepAgent: {...}, includePlanning}`
    pub fn from_value(value: &Value) -> Self {
        let mut options = Self::default();
        let Some(obj) = value.as_object() else {
            return options;
        };
        if let Some(task) = obj.get("task").and_then(Value::as_object) {
            options.task = task
                .iter()
                .map(|(step, cfg)| (step.clone(), StepConfig::from_value(cfg)))
                .collect();
        }
        if let Some(deep) = obj.get("deepAgent").or_else(|| obj.get("deep_agent")) {
            options.deep_agent = DeepAgentOptions::from_value(deep);
        }
        options.include_planning = obj
            .get("includePlanning")
            .or_else(|| obj.get("include_planning"))
            .and_then(Value::as_bool);
        options
    }

    pub fn with_on_token(mut self, on_token: TokenSink) -> Self {
        self.on_token = Some(on_token);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Vec<PipelineStep>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 运行结束（含 panic / future 被丢弃）时复位处理状态
struct RunGuard {
    status: Arc<Mutex<ProcessorStatus>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.status).finish(Utc::now().timestamp_millis());
    }
}

/// 已占用处理槽、尚未执行的运行
struct ClaimedRun {
    context: ExecutionContext,
    cancel: CancellationToken,
    guard: RunGuard,
}

/// 研究任务处理器；同一实例同一时间只运行一个任务
pub struct ResearchTaskProcessor {
    runtime: ResearchRuntime,
    defaults: AgentDefaults,
    include_planning: bool,
    status: Arc<Mutex<ProcessorStatus>>,
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    supervisor: TaskSupervisor,
}

impl ResearchTaskProcessor {
    pub fn new(runtime: ResearchRuntime) -> Self {
        Self {
            runtime,
            defaults: AgentDefaults::default(),
            include_planning: false,
            status: Arc::new(Mutex::new(ProcessorStatus::default())),
            agents: RwLock::new(HashMap::new()),
            supervisor: TaskSupervisor::new(),
        }
    }

    pub fn from_config(runtime: ResearchRuntime, cfg: &AppConfig) -> Self {
        Self::new(runtime)
            .with_defaults(AgentDefaults::from_config(cfg))
            .with_planning(cfg.research.include_planning)
    }

    pub fn with_defaults(mut self, defaults: AgentDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_planning(mut self, include_planning: bool) -> Self {
        self.include_planning = include_planning;
        self
    }

    pub fn runtime(&self) -> &ResearchRuntime {
        &self.runtime
    }

    /// 为步骤注册（或替换）Agent
    pub fn register_agent(&self, step_id: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(step_id.into(), agent);
    }

    /// 状态快照
    pub fn processing_status(&self) -> ProcessorStatus {
        lock(&self.status).clone()
    }

    pub fn is_processing(&self) -> bool {
        lock(&self.status).is_processing
    }

    /// 请求停止当前任务：正在执行的步骤会跑完，之后的步骤不再调度。返回是否有任务在运行
    pub fn stop_processing(&self) -> bool {
        let running = self.is_processing();
        if running {
            tracing::info!("research stop requested");
            self.supervisor.cancel();
        }
        running
    }

    fn pipeline_for(&self, options: &ResearchOptions) -> Vec<PipelineStep> {
        if let Some(pipeline) = &options.pipeline {
            return pipeline.clone();
        }
        if options.include_planning.unwrap_or(self.include_planning) {
            planning_pipeline()
        } else {
            default_pipeline()
        }
    }

    /// 同步占用处理槽并构建上下文；已有任务在运行时返回 AlreadyRunning
    fn claim(
        &self,
        topic: &str,
        base_model: &str,
        options: &ResearchOptions,
    ) -> Result<ClaimedRun, ResearchError> {
        let mut status = lock(&self.status);
        if status.is_processing {
            return Err(ResearchError::AlreadyRunning);
        }
        let runtime = options
            .runtime
            .clone()
            .unwrap_or_else(|| self.runtime.clone());
        let mut context = ExecutionContext::new(topic, base_model, runtime)?;
        context.task = options.task.clone();
        context.deep_agent = resolve_deep_agent_config(&options.deep_agent, base_model);
        context.on_token = options.on_token.clone();

        *status = ProcessorStatus::started(context.started_at);
        Ok(ClaimedRun {
            context,
            cancel: self.supervisor.begin(),
            guard: RunGuard {
                status: Arc::clone(&self.status),
            },
        })
    }

    /// 运行一次研究任务
    ///
    /// 已有任务在运行时立即返回 AlreadyRunning，不会执行任何步骤；
    /// 被中止时返回 Ok，且 `context.aborted == true`；步骤硬失败时返回 StepFailed 并附带部分上下文。
    pub async fn process_research_task(
        &self,
        topic: &str,
        base_model: &str,
        events: Option<EventSender>,
        options: ResearchOptions,
    ) -> Result<ExecutionContext, ResearchError> {
        let claimed = self.claim(topic, base_model, &options)?;
        self.run_claimed(claimed, events, options).await
    }

    /// 占用处理槽后在后台运行；槽位在返回前已被占用，并发调用只有一个能拿到 JoinHandle
    pub fn spawn_research_task(
        self: &Arc<Self>,
        topic: &str,
        base_model: &str,
        events: Option<EventSender>,
        options: ResearchOptions,
    ) -> Result<JoinHandle<Result<ExecutionContext, ResearchError>>, ResearchError> {
        let claimed = self.claim(topic, base_model, &options)?;
        let processor = Arc::clone(self);
        Ok(tokio::spawn(async move {
            processor.run_claimed(claimed, events, options).await
        }))
    }

    async fn run_claimed(
        &self,
        claimed: ClaimedRun,
        events: Option<EventSender>,
        options: ResearchOptions,
    ) -> Result<ExecutionContext, ResearchError> {
        let ClaimedRun {
            mut context,
            cancel,
            guard: _guard,
        } = claimed;
        let base_model = context.deep_agent.base_model.clone();

        let pipeline = self.pipeline_for(&options);
        tracing::info!(
            topic = context.topic(),
            model = %base_model,
            steps = pipeline.len(),
            "research task started"
        );

        let outcome = self
            .execute_pipeline(&pipeline, &mut context, events.as_ref(), &cancel)
            .await;

        {
            let mut status = lock(&self.status);
            status.aborted = context.aborted;
            if let Err((step_id, e)) = &outcome {
                status.last_error = Some(format!("{}: {}", step_id, e));
            }
        }

        match outcome {
            Ok(()) => {
                tracing::info!(
                    completed = ?context.completed_steps(),
                    aborted = context.aborted,
                    "research task finished"
                );
                Ok(context)
            }
            Err((step_id, source)) => Err(ResearchError::StepFailed {
                step_id,
                source,
                partial: Box::new(context),
            }),
        }
    }

    async fn execute_pipeline(
        &self,
        pipeline: &[PipelineStep],
        context: &mut ExecutionContext,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> Result<(), (String, AgentError)> {
        let total = total_weight(pipeline);
        let mut progress_base = 0.0;

        for step in pipeline {
            if cancel.is_cancelled() {
                context.aborted = true;
                tracing::warn!(step_id = %step.id, "research aborted, skipping remaining steps");
                emit(
                    events,
                    PipelineEvent::new(&step.id, StepStatus::Error, progress_base / total)
                        .with_message("Research aborted")
                        .with_data(json!({ "reason": "aborted" })),
                );
                break;
            }

            let weight = step.effective_weight();
            lock(&self.status).current_step = Some(step.id.clone());
            emit(
                events,
                PipelineEvent::new(&step.id, StepStatus::Start, progress_base / total)
                    .with_message(step.label.clone()),
            );

            let reporter =
                ProgressReporter::new(&step.id, progress_base, weight, total, events.cloned());
            let started = Instant::now();
            match self.execute_step(step, context, &reporter).await {
                Ok(mut result) => {
                    result.metadata.duration_ms = started.elapsed().as_millis() as u64;
                    progress_base += weight;
                    tracing::info!(
                        step_id = %step.id,
                        fallback = result.metadata.is_fallback,
                        duration_ms = result.metadata.duration_ms,
                        "step completed"
                    );
                    emit(
                        events,
                        PipelineEvent::new(&step.id, StepStatus::Complete, progress_base / total)
                            .with_message(step.label.clone())
                            .with_data(json!({
                                "result": result,
                                "fallback": result.metadata.is_fallback,
                                "fallbackReason": result.metadata.fallback_reason,
                            })),
                    );
                    context.record(&step.id, result);
                    lock(&self.status).completed_steps.push(step.id.clone());
                }
                Err(e) => {
                    tracing::error!(step_id = %step.id, error = %e, "step failed");
                    emit(
                        events,
                        PipelineEvent::new(&step.id, StepStatus::Error, progress_base / total)
                            .with_message(e.to_string())
                            .with_data(json!({ "reason": "error" })),
                    );
                    return Err((step.id.clone(), e));
                }
            }
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        step: &PipelineStep,
        context: &ExecutionContext,
        progress: &ProgressReporter,
    ) -> Result<StepResult, AgentError> {
        let overrides = context.step_config(&step.id);
        if let Some(handler) = &step.handler {
            return handler
                .run(StepInvocation {
                    step,
                    context,
                    config: &overrides,
                    progress,
                })
                .await;
        }

        let Some(agent) = self.resolve_agent(&step.id) else {
            tracing::warn!(step_id = %step.id, "no agent registered for step");
            return Ok(StepResult::missing_agent());
        };

        let config = resolve_step_config(&agent.default_config(), &overrides);
        let payload = create_step_payload(&step.id, context, &config);
        let runtime = create_step_runtime(&step.id, context, config, agent.as_ref(), progress);

        let mut result = agent.run(payload, &runtime).await?;
        if result.metadata.model.is_none() {
            result.metadata.model = Some(runtime.model);
        }
        Ok(result)
    }

    /// 取缓存的 Agent，没有则按步骤 id 创建内置 Agent 并缓存
    fn resolve_agent(&self, step_id: &str) -> Option<Arc<dyn Agent>> {
        if let Some(agent) = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(step_id)
        {
            return Some(agent.clone());
        }
        let agent = default_agent(step_id, &self.defaults)?;
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        Some(agents.entry(step_id.to_string()).or_insert(agent).clone())
    }
}

/// 由已完成步骤的结果构造 Agent 输入；只读取当前步骤之前的结果
pub fn create_step_payload(
    step_id: &str,
    context: &ExecutionContext,
    config: &StepConfig,
) -> AgentPayload {
    let query = context.topic().to_string();
    match step_id {
        STEP_PLANNING => AgentPayload::Planning { query },
        STEP_SEARCH => AgentPayload::Search {
            query,
            plan_summary: context.plan().map(|p| p.summary.clone()),
        },
        STEP_MODELING => AgentPayload::Modeling {
            query,
            focus: context
                .search_output()
                .map(SearchOutput::focus)
                .unwrap_or_default(),
            evidence: context.evidence(),
        },
        STEP_REPORT => AgentPayload::Report {
            query,
            audience: config.audience.clone().unwrap_or_default(),
            format: config.format.clone().unwrap_or_default(),
            blueprint: context.blueprint().cloned(),
            evidence: context.evidence(),
        },
        _ => AgentPayload::Custom {
            query,
            upstream: context.results_json(),
        },
    }
}

/// 步骤运行时：模型优先级 步骤配置 > deepAgent 解析结果；采样为 deepAgent 采样叠加步骤采样
fn create_step_runtime(
    step_id: &str,
    context: &ExecutionContext,
    config: StepConfig,
    agent: &dyn Agent,
    progress: &ProgressReporter,
) -> AgentRuntime {
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| context.deep_agent.model_for(step_id).to_string());
    let sampling = context.deep_agent.sampling_options().merge(&config.sampling);
    let llm = agent.llm().unwrap_or_else(|| context.runtime.llm.clone());

    let on_token = if step_id == STEP_REPORT && (context.on_token.is_some() || progress.has_listener()) {
        let forward = context.on_token.clone();
        let reporter = progress.clone();
        let sink: TokenSink = Arc::new(move |event: TokenEvent| {
            if let TokenEvent::Chunk(chunk) = &event {
                reporter.token(chunk);
            }
            if let Some(forward) = &forward {
                forward(event);
            }
        });
        Some(sink)
    } else {
        None
    };

    AgentRuntime::new(llm, context.runtime.search.clone(), model)
        .with_sampling(sampling)
        .with_config(config)
        .with_progress(progress.clone())
        .with_on_token(on_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentOutput, StepMetadata};
    use crate::llm::MockLlmClient;
    use crate::search::{SearchResponse, StaticSearchClient};
    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot, Notify};

    use crate::core::pipeline::StepHandler;

    fn runtime() -> ResearchRuntime {
        ResearchRuntime::new(
            MockLlmClient::new().into_arc(),
            Arc::new(StaticSearchClient::always(SearchResponse::ok(vec![]))),
        )
    }

    fn ok_result(step: &str) -> StepResult {
        StepResult::new(
            Some(AgentOutput::Custom(json!({ "step": step }))),
            StepMetadata::default(),
        )
    }

    struct OkHandler;

    #[async_trait]
    impl StepHandler for OkHandler {
        async fn run(&self, invocation: StepInvocation<'_>) -> Result<StepResult, AgentError> {
            invocation.progress.report(0.5, "halfway");
            Ok(ok_result(&invocation.step.id))
        }
    }

    struct FailHandler;

    #[async_trait]
    impl StepHandler for FailHandler {
        async fn run(&self, _invocation: StepInvocation<'_>) -> Result<StepResult, AgentError> {
            Err(AgentError::Handler("boom".into()))
        }
    }

    /// 开始后通知测试，并等待放行
    struct GateHandler {
        started: Mutex<Option<oneshot::Sender<()>>>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl StepHandler for GateHandler {
        async fn run(&self, invocation: StepInvocation<'_>) -> Result<StepResult, AgentError> {
            let started = self.started.lock().unwrap().take();
            if let Some(tx) = started {
                let _ = tx.send(());
            }
            self.release.notified().await;
            Ok(ok_result(&invocation.step.id))
        }
    }

    fn gate() -> (Arc<GateHandler>, oneshot::Receiver<()>, Arc<Notify>) {
        let (tx, rx) = oneshot::channel();
        let release = Arc::new(Notify::new());
        let handler = Arc::new(GateHandler {
            started: Mutex::new(Some(tx)),
            release: release.clone(),
        });
        (handler, rx, release)
    }

    /// 记录收到的运行时参数
    #[derive(Default)]
    struct RecordingAgent {
        seen: Mutex<Vec<(String, f32, Option<usize>)>>,
    }

    #[async_trait]
    impl Agent for RecordingAgent {
        fn name(&self) -> &str {
            "recording"
        }

        fn default_config(&self) -> StepConfig {
            StepConfig {
                max_queries: Some(4),
                ..StepConfig::default()
            }
        }

        async fn run(&self, payload: AgentPayload, runtime: &AgentRuntime) -> Result<StepResult, AgentError> {
            self.seen.lock().unwrap().push((
                runtime.model.clone(),
                runtime.sampling.temperature.unwrap_or_default(),
                runtime.config.max_queries,
            ));
            Ok(ok_result(payload.query()))
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_progress_normalized_by_weight() {
        let processor = ResearchTaskProcessor::new(runtime());
        let pipeline = vec![
            PipelineStep::new("a", "A", 1.0).with_handler(Arc::new(OkHandler)),
            PipelineStep::new("b", "B", 3.0).with_handler(Arc::new(OkHandler)),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = processor
            .process_research_task(
                "topic",
                "m",
                Some(tx),
                ResearchOptions::default().with_pipeline(pipeline),
            )
            .await
            .unwrap();
        assert_eq!(ctx.completed_steps(), &["a".to_string(), "b".to_string()]);

        let events = drain(&mut rx);
        let completes: Vec<f64> = events
            .iter()
            .filter(|e| e.status == StepStatus::Complete)
            .map(|e| e.progress)
            .collect();
        assert_eq!(completes.len(), 2);
        assert!((completes[0] - 0.25).abs() < 1e-9);
        assert!((completes[1] - 1.0).abs() < 1e-9);

        // b 的中途进度：(1 + 0.5 * 3) / 4
        let b_progress = events
            .iter()
            .find(|e| e.step_id == "b" && e.status == StepStatus::Progress)
            .unwrap();
        assert!((b_progress.progress - 0.625).abs() < 1e-9);

        let status = processor.processing_status();
        assert!(!status.is_processing);
        assert!(status.current_step.is_none());
        assert!(status.finished_at.is_some());
        assert_eq!(status.completed_steps, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_second_task_rejected_while_running() {
        let processor = Arc::new(ResearchTaskProcessor::new(runtime()));
        let (handler, started, release) = gate();
        let pipeline = vec![PipelineStep::new("a", "A", 1.0).with_handler(handler)];

        let first = {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .process_research_task("one", "m", None, ResearchOptions::default().with_pipeline(pipeline))
                    .await
            })
        };
        started.await.unwrap();
        assert!(processor.is_processing());

        let err = processor
            .process_research_task("two", "m", None, ResearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::AlreadyRunning));
        assert_eq!(processor.processing_status().current_step.as_deref(), Some("a"));

        release.notify_one();
        let ctx = first.await.unwrap().unwrap();
        assert_eq!(ctx.topic(), "one");
        assert!(!processor.is_processing());
    }

    #[tokio::test]
    async fn test_spawn_claims_slot_before_returning() {
        let processor = Arc::new(ResearchTaskProcessor::new(runtime()));
        let (handler, started, release) = gate();
        let pipeline = vec![PipelineStep::new("a", "A", 1.0).with_handler(handler)];

        let first = processor
            .spawn_research_task("one", "m", None, ResearchOptions::default().with_pipeline(pipeline.clone()))
            .unwrap();
        // 还未让出执行权，槽位已被占用
        assert!(processor.is_processing());
        let err = processor
            .spawn_research_task("two", "m", None, ResearchOptions::default().with_pipeline(pipeline))
            .unwrap_err();
        assert!(matches!(err, ResearchError::AlreadyRunning));

        started.await.unwrap();
        release.notify_one();
        let ctx = first.await.unwrap().unwrap();
        assert_eq!(ctx.topic(), "one");
        assert!(!processor.is_processing());

        assert!(matches!(
            processor.spawn_research_task(" ", "m", None, ResearchOptions::default()),
            Err(ResearchError::EmptyTopic)
        ));
        assert!(!processor.is_processing());
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_steps() {
        let processor = Arc::new(ResearchTaskProcessor::new(runtime()));
        let (handler, started, release) = gate();
        let pipeline = vec![
            PipelineStep::new("a", "A", 1.0).with_handler(handler),
            PipelineStep::new("b", "B", 1.0).with_handler(Arc::new(OkHandler)),
            PipelineStep::new("c", "C", 1.0).with_handler(Arc::new(OkHandler)),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();

        let run = {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .process_research_task("topic", "m", Some(tx), ResearchOptions::default().with_pipeline(pipeline))
                    .await
            })
        };
        started.await.unwrap();
        assert!(processor.stop_processing());
        release.notify_one();

        let ctx = run.await.unwrap().unwrap();
        assert!(ctx.aborted);
        assert_eq!(ctx.completed_steps(), &["a".to_string()]);
        assert!(ctx.result("b").is_none());

        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.status, StepStatus::Error);
        assert_eq!(last.step_id, "b");
        assert_eq!(last.data.as_ref().unwrap()["reason"], "aborted");

        let status = processor.processing_status();
        assert!(status.aborted);
        assert_eq!(status.completed_steps, vec!["a"]);
        assert!(!processor.stop_processing());
    }

    #[tokio::test]
    async fn test_step_failure_returns_partial_context() {
        let processor = ResearchTaskProcessor::new(runtime());
        let pipeline = vec![
            PipelineStep::new("a", "A", 1.0).with_handler(Arc::new(OkHandler)),
            PipelineStep::new("b", "B", 1.0).with_handler(Arc::new(FailHandler)),
            PipelineStep::new("c", "C", 1.0).with_handler(Arc::new(OkHandler)),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = processor
            .process_research_task("topic", "m", Some(tx), ResearchOptions::default().with_pipeline(pipeline))
            .await
            .unwrap_err();

        assert_eq!(err.step_id(), Some("b"));
        let partial = err.partial_context().unwrap();
        assert_eq!(partial.completed_steps(), &["a".to_string()]);
        assert!(partial.result("a").is_some());

        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.status, StepStatus::Error);
        assert!((last.progress - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(last.message.as_deref(), Some("Step handler failed: boom"));

        let status = processor.processing_status();
        assert!(!status.is_processing);
        assert!(status.last_error.unwrap().contains("boom"));
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_topic_rejected_without_touching_status() {
        let processor = ResearchTaskProcessor::new(runtime());
        let err = processor
            .process_research_task("  ", "m", None, ResearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::EmptyTopic));
        assert_eq!(processor.processing_status(), ProcessorStatus::default());
    }

    #[tokio::test]
    async fn test_unknown_step_yields_missing_agent_fallback() {
        let processor = ResearchTaskProcessor::new(runtime());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = processor
            .process_research_task(
                "topic",
                "m",
                Some(tx),
                ResearchOptions::default().with_pipeline(vec![PipelineStep::new("translate", "T", 1.0)]),
            )
            .await
            .unwrap();
        let result = ctx.result("translate").unwrap();
        assert!(result.output.is_none());
        assert_eq!(result.metadata.fallback_reason.as_deref(), Some("missing_agent"));

        let complete = drain(&mut rx)
            .into_iter()
            .find(|e| e.status == StepStatus::Complete)
            .unwrap();
        let data = complete.data.unwrap();
        assert_eq!(data["fallback"], true);
        assert_eq!(data["fallbackReason"], "missing_agent");
    }

    #[tokio::test]
    async fn test_step_model_and_sampling_resolution() {
        let processor = ResearchTaskProcessor::new(runtime());
        let agent = Arc::new(RecordingAgent::default());
        processor.register_agent(STEP_SEARCH, agent.clone());
        processor.register_agent(STEP_REPORT, agent.clone());

        let options = ResearchOptions::from_value(&json!({
            "deepAgent": {
                "models": { "search": "gpt-4o" },
                "providerMapping": { "enabled": true, "search": "deepseek" },
                "sampling": { "temperature": 3.4 }
            },
            "task": {
                "report": { "model": "override-model", "temperature": 0.1, "maxQueries": 1 }
            }
        }))
        .with_pipeline(vec![
            PipelineStep::new(STEP_SEARCH, "S", 1.0),
            PipelineStep::new(STEP_REPORT, "R", 1.0),
        ]);

        processor
            .process_research_task("topic", "base", None, options)
            .await
            .unwrap();

        let seen = agent.seen.lock().unwrap();
        assert_eq!(seen[0], ("gpt-4o".to_string(), 2.0, Some(4)));
        assert_eq!(seen[1], ("override-model".to_string(), 0.1, Some(1)));
    }

    #[tokio::test]
    async fn test_agents_are_cached_and_reused() {
        let processor = ResearchTaskProcessor::new(runtime());
        let first = processor.resolve_agent(STEP_MODELING).unwrap();
        let second = processor.resolve_agent(STEP_MODELING).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(processor.resolve_agent("nope").is_none());
    }

    #[test]
    fn test_options_from_value() {
        let options = ResearchOptions::from_value(&json!({
            "task": { "search": { "engines": ["google"], "maxResults": 5 } },
            "includePlanning": true,
            "deepAgent": "not an object"
        }));
        assert_eq!(options.include_planning, Some(true));
        assert_eq!(options.task["search"].max_results, Some(5));
        assert_eq!(options.deep_agent, DeepAgentOptions::default());
    }

    #[test]
    fn test_options_keep_valid_deep_agent_fields() {
        let options = ResearchOptions::from_value(&json!({
            "deepAgent": {
                "models": { "report": "gpt-4o" },
                "sampling": { "temperature": "hot" }
            }
        }));
        assert_eq!(options.deep_agent.models.report.as_deref(), Some("gpt-4o"));
        assert_eq!(options.deep_agent.sampling.temperature, None);
    }
}
