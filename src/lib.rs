//! Deepr - Rust 深度研究编排器
//!
//! 给定研究主题，按 search → modeling → report（可选前置 planning）分步运行 Agent，
//! 每步可降级而不中断，最终产出 Markdown 研究报告。
//!
//! 模块划分：
//! - **agents**: Planning / Search / Modeling / Report 四个 Agent 与结果类型
//! - **config**: 应用配置加载（配置文件 + `DEEPR__` 环境变量）
//! - **core**: 执行上下文、流水线、进度事件、处理状态与 ResearchTaskProcessor
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / 路由 / Mock）、JSON 提取
//! - **search**: 多引擎搜索客户端（Bing / Google）
//! - **runtime**: 按配置装配 LLM 与搜索客户端
//! - **web**: HTTP / SSE 入口（feature `web`）

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod runtime;
pub mod search;
#[cfg(feature = "web")]
pub mod web;

pub use crate::core::{ExecutionContext, ResearchError, ResearchOptions, ResearchTaskProcessor};
pub use crate::runtime::{create_runtime, ResearchRuntime};
