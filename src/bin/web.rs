//! Deepr Web 服务：研究接口与 SSE 进度流
//!
//! 运行：`cargo run --bin deepr-web --features web`，监听 `app.bind_addr`（默认 127.0.0.1:8080）

use std::sync::Arc;

use anyhow::Context;
use deepr::config::{load_config, AppConfig};
use deepr::core::ResearchTaskProcessor;
use deepr::web::{router, AppState};
use deepr::{create_runtime, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let processor = ResearchTaskProcessor::from_config(create_runtime(&cfg), &cfg);
    let state = Arc::new(AppState::new(processor, cfg.llm.model.clone()));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.app.bind_addr))?;
    tracing::info!("{} web listening on http://{}", cfg.app.name, cfg.app.bind_addr);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
