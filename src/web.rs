//! HTTP 入口（feature `web`）
//!
//! - `POST /api/research`：`action` 为 start_research（默认，后台运行并立即返回 taskId）/ get_status / stop_research
//! - `POST /api/research/stream`：SSE 推送步骤事件（progress 为 0-100 整数），最后一条为 `{done: true, ...}`
//! - `POST /api/search/keys`：运行时替换搜索引擎凭据
//! - `GET /api/health`

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::{
    ExecutionContext, PipelineEvent, ResearchError, ResearchOptions, ResearchTaskProcessor,
};
use crate::search::ApiKeys;

pub struct AppState {
    pub processor: Arc<ResearchTaskProcessor>,
    /// 请求未带 model 时使用
    pub default_model: String,
}

impl AppState {
    pub fn new(processor: ResearchTaskProcessor, default_model: impl Into<String>) -> Self {
        Self {
            processor: Arc::new(processor),
            default_model: default_model.into(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/research", post(api_research))
        .route("/api/research/stream", post(api_research_stream))
        .route("/api/search/keys", post(api_search_keys))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state)
}

/// 请求体中的主题、模型与选项
struct ResearchRequest {
    action: String,
    query: String,
    model: String,
    options: ResearchOptions,
}

impl ResearchRequest {
    fn parse(body: &Value, default_model: &str) -> Self {
        let text = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        Self {
            action: text("action").unwrap_or_else(|| "start_research".to_string()),
            query: text("query").or_else(|| text("topic")).unwrap_or_default(),
            model: text("model").unwrap_or_else(|| default_model.to_string()),
            options: ResearchOptions::from_value(body.get("options").unwrap_or(body)),
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// 启动被拒绝：已有任务在运行为 409，其余为 400
fn rejection(e: ResearchError) -> Response {
    let status = match e {
        ResearchError::AlreadyRunning => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    error_body(status, e.to_string())
}

fn context_body(context: &ExecutionContext) -> Value {
    json!({
        "topic": context.topic(),
        "aborted": context.aborted,
        "completedSteps": context.completed_steps(),
        "results": context.results_json(),
        "report": context.report().map(|r| r.markdown.clone()),
    })
}

async fn api_research(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let ResearchRequest {
        action,
        query,
        model,
        options,
    } = ResearchRequest::parse(&body, &state.default_model);
    match action.as_str() {
        "get_status" | "status" => Json(state.processor.processing_status()).into_response(),
        "stop_research" | "stop" => {
            Json(json!({ "success": true, "stopped": state.processor.stop_processing() })).into_response()
        }
        "start_research" | "start" => {
            if query.is_empty() {
                return error_body(StatusCode::BAD_REQUEST, "query is required");
            }
            let handle = match state
                .processor
                .spawn_research_task(&query, &model, None, options)
            {
                Ok(handle) => handle,
                Err(e) => return rejection(e),
            };
            let task_id = uuid::Uuid::new_v4().to_string();
            tracing::info!(task_id = %task_id, query = %query, "research task accepted");

            let id = task_id.clone();
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(context)) => tracing::info!(
                        task_id = %id,
                        aborted = context.aborted,
                        "research task done"
                    ),
                    Ok(Err(e)) => tracing::error!(task_id = %id, error = %e, "research task failed"),
                    Err(e) => tracing::error!(task_id = %id, error = %e, "research task panicked"),
                }
            });
            Json(json!({ "success": true, "taskId": task_id, "status": "started" })).into_response()
        }
        other => error_body(StatusCode::BAD_REQUEST, format!("unknown action '{}'", other)),
    }
}

/// SSE 中的单条事件：进度换算为 0-100 整数
fn stream_payload(event: &PipelineEvent) -> Value {
    let mut payload = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
    payload["progress"] = json!((event.progress * 100.0).round() as u8);
    payload
}

fn final_payload(outcome: Result<ExecutionContext, ResearchError>) -> Value {
    match outcome {
        Ok(context) => {
            let mut body = context_body(&context);
            body["done"] = Value::Bool(true);
            body["success"] = Value::Bool(!context.aborted);
            body
        }
        Err(e) => json!({
            "done": true,
            "success": false,
            "error": e.to_string(),
            "stepId": e.step_id(),
            "partial": e.partial_context().map(context_body),
        }),
    }
}

async fn api_research_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>>, Response> {
    let ResearchRequest {
        query,
        model,
        options,
        ..
    } = ResearchRequest::parse(&body, &state.default_model);
    if query.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "query is required"));
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let handle = state
        .processor
        .spawn_research_task(&query, &model, Some(tx), options)
        .map_err(rejection)?;

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        let forward_tx = out_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = forward_tx.send(stream_payload(&event));
            }
        });
        let payload = match handle.await {
            Ok(outcome) => final_payload(outcome),
            Err(e) => json!({ "done": true, "success": false, "error": e.to_string() }),
        };
        if let Err(e) = forward.await {
            tracing::warn!(error = %e, "event forwarder stopped");
        }
        let _ = out_tx.send(payload);
    });

    let event_stream = stream::unfold(out_rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|payload| (Ok::<_, Infallible>(Event::default().data(payload.to_string())), rx))
    });
    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

async fn api_search_keys(
    State(state): State<Arc<AppState>>,
    Json(keys): Json<ApiKeys>,
) -> Response {
    match state.processor.runtime().search.set_api_keys(keys).await {
        Ok(configured) => Json(json!({ "configured": configured })).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
