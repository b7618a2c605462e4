//! 单引擎抽象与共享 HTTP 客户端

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::search::{ApiKeys, SearchError, SearchOptions, SearchResult};

/// 默认每引擎结果数
pub const DEFAULT_ENGINE_RESULTS: usize = 10;

/// 搜索引擎 trait：每个后端（Bing / Google / 测试桩）实现一个
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// 引擎名（请求中的 engines 列表按此匹配）
    fn name(&self) -> &str;

    /// 是否已具备可用凭据
    fn is_configured(&self) -> bool {
        true
    }

    /// 替换凭据；不关心凭据的引擎忽略即可
    fn set_api_keys(&self, _keys: &ApiKeys) {}

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// 构建搜索用 HTTP 客户端：超时 + 固定 User-Agent
pub fn http_client(timeout_secs: u64) -> Client {
    const USER_AGENT: &str = concat!("deepr/", env!("CARGO_PKG_VERSION"));
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// 把 reqwest 错误映射为 SearchError
pub(crate) fn transport_error(engine: &str, e: reqwest::Error) -> SearchError {
    SearchError::Transport {
        engine: engine.to_string(),
        message: e.to_string(),
    }
}

/// 非 2xx 响应统一报错
pub(crate) fn check_status(engine: &str, resp: &reqwest::Response) -> Result<(), SearchError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SearchError::Http {
            engine: engine.to_string(),
            status: status.as_u16(),
        })
    }
}

/// 空字符串凭据视为缺失
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
