//! 搜索层数据类型

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单条搜索结果（各引擎归一化后的形状）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub display_url: String,
    pub engine: String,
    /// 引擎给出的抓取/发布时间（毫秒时间戳），用于可选的按时间排序
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>, engine: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            display_url: url.clone(),
            url,
            snippet: String::new(),
            engine: engine.into(),
            timestamp: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }
}

/// 单次搜索的附加参数（对所有引擎生效）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    /// 每个引擎请求的结果数
    pub max_results: Option<usize>,
    /// 语言/市场，如 zh-CN、en-US
    pub language: Option<String>,
    /// 合并后按时间戳倒序；None 视为不排序
    pub sort_by_time: Option<bool>,
}

impl SearchOptions {
    /// 以 self 为底，overrides 中已设置的字段覆盖之
    pub fn merge(&self, overrides: &SearchOptions) -> Self {
        Self {
            max_results: overrides.max_results.or(self.max_results),
            language: overrides.language.clone().or_else(|| self.language.clone()),
            sort_by_time: overrides.sort_by_time.or(self.sort_by_time),
        }
    }
}

/// 单个引擎的失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFailure {
    pub engine: String,
    pub error: String,
}

/// 多引擎搜索的合并数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchData {
    pub results: Vec<SearchResult>,
}

/// 多引擎搜索响应：部分引擎失败不影响整体，失败记在 errors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub data: SearchData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EngineFailure>,
}

impl SearchResponse {
    pub fn ok(results: Vec<SearchResult>) -> Self {
        Self {
            success: true,
            data: SearchData { results },
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// 搜索引擎凭据（可在运行时替换）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiKeys {
    pub bing: Option<String>,
    pub google: Option<String>,
    pub google_cx: Option<String>,
}

/// 搜索错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Search engine '{0}' is not configured (missing credentials)")]
    NotConfigured(String),

    #[error("Unknown search engine: {0}")]
    UnknownEngine(String),

    #[error("{engine} search HTTP {status}")]
    Http { engine: String, status: u16 },

    #[error("{engine} request failed: {message}")]
    Transport { engine: String, message: String },

    #[error("{engine} response decode failed: {message}")]
    Decode { engine: String, message: String },

    #[error("Search failed: {0}")]
    Other(String),
}
