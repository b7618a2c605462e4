//! Deepr 命令行入口
//!
//! 用法：`deepr [--config <file>] [--planning] <topic> [model]`
//! 进度输出到 stderr，最终 Markdown 报告输出到 stdout；Ctrl-C 在当前步骤结束后中止。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use deepr::config::{load_config, AppConfig};
use deepr::core::{PipelineEvent, ResearchOptions, ResearchTaskProcessor, StepStatus};
use deepr::{create_runtime, observability};
use tokio::sync::mpsc;

struct CliArgs {
    config: Option<PathBuf>,
    planning: bool,
    topic: String,
    model: Option<String>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut planning = false;
    let mut positional = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(args.next().context("--config requires a path")?));
            }
            "--planning" => planning = true,
            _ => positional.push(arg),
        }
    }
    let mut positional = positional.into_iter();
    let Some(topic) = positional.next() else {
        bail!("usage: deepr [--config <file>] [--planning] <topic> [model]");
    };
    Ok(CliArgs {
        config,
        planning,
        topic,
        model: positional.next(),
    })
}

fn print_event(event: &PipelineEvent) {
    let percent = (event.progress * 100.0).round() as u8;
    match event.status {
        StepStatus::Token => {}
        StepStatus::Error => eprintln!(
            "[{:>3}%] {} failed: {}",
            percent,
            event.step_id,
            event.message.as_deref().unwrap_or("error")
        ),
        _ => eprintln!(
            "[{:>3}%] {} {}",
            percent,
            event.step_id,
            event.message.as_deref().unwrap_or("")
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let model = args.model.clone().unwrap_or_else(|| cfg.llm.model.clone());
    tracing::info!(app = %cfg.app.name, model = %model, "starting research");

    let processor = Arc::new(
        ResearchTaskProcessor::from_config(create_runtime(&cfg), &cfg)
            .with_planning(args.planning || cfg.research.include_planning),
    );

    let stopper = Arc::clone(&processor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current step...");
            stopper.stop_processing();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let outcome = processor
        .process_research_task(&args.topic, &model, Some(tx), ResearchOptions::default())
        .await;
    let _ = printer.await;

    let context = match outcome {
        Ok(context) => context,
        Err(e) => {
            if let Some(partial) = e.partial_context() {
                eprintln!("Completed before failure: {:?}", partial.completed_steps());
            }
            return Err(e).context("Research failed");
        }
    };

    if context.aborted {
        eprintln!("Research aborted after: {:?}", context.completed_steps());
    }
    match context.report() {
        Some(report) => println!("{}", report.markdown),
        None => eprintln!("No report produced"),
    }
    Ok(())
}
