//! 研究流水线集成测试：默认 search → modeling → report，LLM 与搜索均为本地桩

use std::sync::{Arc, Mutex};
use std::time::Duration;

use deepr::agents::SearchAgent;
use deepr::core::{PipelineEvent, ResearchOptions, ResearchTaskProcessor, StepStatus};
use deepr::llm::{LlmError, MockLlmClient, TokenEvent, TokenSink};
use deepr::search::{SearchResponse, SearchResult, StaticSearchClient};
use deepr::ResearchRuntime;
use serde_json::json;
use tokio::sync::mpsc;

const TOPIC: &str = "LLM adoption in education";

fn scripted_llm(prompt: &str) -> Result<String, LlmError> {
    if prompt.contains("research strategist") {
        return Ok(json!({
            "primaryQuery": TOPIC,
            "queries": [TOPIC, "LLM tutoring outcomes", "school AI policy"],
            "focusAreas": ["learning outcomes", "policy"]
        })
        .to_string());
    }
    if prompt.contains("Compress the search results") {
        return Ok(format!(
            "```json\n{}\n```",
            json!({
                "notes": [
                    { "summary": "Universities pilot LLM tutors", "topic": "Pilots", "sourceUrl": "https://edu.example/1", "confidence": 0.8 },
                    { "summary": "Teachers report time savings", "topic": "Workload", "sourceUrl": "https://edu.example/2" },
                    { "summary": "Policies lag behind usage", "topic": "Policy", "sourceUrl": "https://edu.example/3" }
                ],
                "highlights": ["Adoption is growing"]
            })
        ));
    }
    if prompt.contains("research analyst. Build a structured model") {
        return Ok(json!({
            "modelType": "causal_map",
            "coreDrivers": [
                { "name": "Cost", "description": "Cheaper tutoring", "evidenceRefs": [0, 1], "weight": 0.9 },
                { "name": "Policy", "description": "Regulatory lag", "evidenceRefs": [2, 42], "weight": 1.7 }
            ],
            "risks": ["Academic integrity"]
        })
        .to_string());
    }
    Ok("# LLM Adoption in Education\n\n## Key Findings\n- Pilots are widespread\n- Policy lags\n\n## Sources\n- https://edu.example/1\n".to_string())
}

fn search_client() -> Arc<StaticSearchClient> {
    Arc::new(StaticSearchClient::new(|query, _engines| {
        if query == TOPIC {
            Ok(SearchResponse::ok(
                (1..=3)
                    .map(|i| {
                        SearchResult::new(
                            format!("Result {i}"),
                            format!("https://edu.example/{i}"),
                            "bing",
                        )
                        .with_snippet(format!("snippet {i}"))
                    })
                    .collect(),
            ))
        } else {
            Ok(SearchResponse::failed("quota exceeded"))
        }
    }))
}

fn processor(llm: MockLlmClient) -> (ResearchTaskProcessor, Arc<StaticSearchClient>) {
    let search = search_client();
    let processor = ResearchTaskProcessor::new(ResearchRuntime::new(llm.into_arc(), search.clone()));
    processor.register_agent(
        "search",
        Arc::new(SearchAgent::new().with_query_delay(Duration::ZERO)),
    );
    (processor, search)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_default_pipeline_end_to_end() {
    let (processor, search) = processor(MockLlmClient::from_fn(|prompt, _| scripted_llm(prompt)));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let ctx = processor
        .process_research_task(TOPIC, "test-model", Some(tx), ResearchOptions::default())
        .await
        .unwrap();

    assert_eq!(ctx.completed_steps(), &["search", "modeling", "report"]);
    assert!(!ctx.aborted);
    assert_eq!(search.call_count(), 3);

    let search_result = ctx.result("search").unwrap();
    assert!(!search_result.metadata.is_fallback);
    let output = search_result.as_search().unwrap();
    assert_eq!(output.results.len(), 3);
    assert_eq!(output.notes.len(), 3);
    assert_eq!(output.search_errors.len(), 2);

    let modeling = ctx.result("modeling").unwrap();
    assert!(!modeling.metadata.is_fallback);
    let blueprint = modeling.as_blueprint().unwrap();
    assert_eq!(blueprint.model_type, "causal_map");
    assert_eq!(blueprint.core_drivers[1].evidence_refs, vec![2]);
    assert_eq!(blueprint.core_drivers[1].weight, 1.0);

    let report = ctx.report().unwrap();
    assert!(report.markdown.starts_with("# LLM Adoption in Education"));
    assert!(!report.outline.is_empty());
    assert_eq!(
        ctx.result("report").unwrap().metadata.model.as_deref(),
        Some("test-model")
    );

    let events = drain(&mut rx);
    let mut last = 0.0;
    for event in &events {
        assert!(event.progress + 1e-9 >= last, "progress went backwards");
        last = event.progress;
    }
    let final_event = events.last().unwrap();
    assert_eq!(final_event.status, StepStatus::Complete);
    assert_eq!(final_event.step_id, "report");
    assert!((final_event.progress - 1.0).abs() < 1e-9);

    let status = processor.processing_status();
    assert!(!status.is_processing);
    assert_eq!(status.completed_steps.len(), 3);
}

#[tokio::test]
async fn test_every_step_degrades_when_llm_is_down() {
    let (processor, _) = processor(MockLlmClient::from_fn(|_, _| {
        Err(LlmError::Api("503 service unavailable".into()))
    }));

    let ctx = processor
        .process_research_task(TOPIC, "test-model", None, ResearchOptions::default())
        .await
        .unwrap();

    assert_eq!(ctx.completed_steps().len(), 3);
    let search = ctx.result("search").unwrap();
    assert_eq!(
        search.metadata.fallback_reason.as_deref(),
        Some("summarize_unavailable")
    );
    // 策略失败时只查主题本身
    assert_eq!(search.as_search().unwrap().queries, vec![TOPIC]);

    let modeling = ctx.result("modeling").unwrap();
    assert_eq!(modeling.metadata.fallback_reason.as_deref(), Some("llm_error"));
    assert_eq!(modeling.as_blueprint().unwrap().model_type, "knowledge_graph");

    let report = ctx.result("report").unwrap();
    assert!(report.metadata.is_fallback);
    assert!(report
        .as_report()
        .unwrap()
        .markdown
        .starts_with(&format!("# Research Report: {}", TOPIC)));
}

#[tokio::test]
async fn test_report_tokens_are_streamed() {
    let llm = MockLlmClient::from_fn(|prompt, _| scripted_llm(prompt)).with_streaming(true);
    let (processor, _) = processor(llm);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink_received = received.clone();
    let sink: TokenSink = Arc::new(move |event: TokenEvent| {
        if let TokenEvent::Chunk(chunk) = event {
            sink_received.lock().unwrap().push(chunk);
        }
    });
    let (tx, mut rx) = mpsc::unbounded_channel();

    let ctx = processor
        .process_research_task(
            TOPIC,
            "test-model",
            Some(tx),
            ResearchOptions::default().with_on_token(sink),
        )
        .await
        .unwrap();

    let report = ctx.result("report").unwrap();
    assert_eq!(report.metadata.extra["streamed"], true);
    let chunks = received.lock().unwrap().clone();
    assert!(!chunks.is_empty());

    let token_events = drain(&mut rx)
        .into_iter()
        .filter(|e| e.status == StepStatus::Token)
        .count();
    assert_eq!(token_events, chunks.len());
}

#[tokio::test]
async fn test_planning_pipeline_feeds_search() {
    let llm = MockLlmClient::from_fn(|prompt, _| {
        if prompt.contains("research planner") {
            return Ok(r#"{"summary": "Focus on K-12 pilots", "objectives": ["map pilots"], "questions": ["who adopts?"]}"#.to_string());
        }
        if prompt.contains("research strategist") {
            assert!(prompt.contains("Focus on K-12 pilots"));
        }
        scripted_llm(prompt)
    });
    let (processor, _) = processor(llm);

    let mut options = ResearchOptions::default();
    options.include_planning = Some(true);
    let ctx = processor
        .process_research_task(TOPIC, "test-model", None, options)
        .await
        .unwrap();

    assert_eq!(ctx.completed_steps(), &["planning", "search", "modeling", "report"]);
    assert_eq!(ctx.plan().unwrap().summary, "Focus on K-12 pilots");
}
