//! 测试用搜索客户端：由闭包决定每个 query 的结果

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::search::{ApiKeys, SearchClient, SearchError, SearchOptions, SearchResponse};

type Responder = dyn Fn(&str, &[String]) -> Result<SearchResponse, SearchError> + Send + Sync;

/// 固定响应的搜索客户端
pub struct StaticSearchClient {
    responder: Box<Responder>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StaticSearchClient {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &[String]) -> Result<SearchResponse, SearchError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(f),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// 所有 query 返回同一组结果
    pub fn always(response: SearchResponse) -> Self {
        Self::new(move |_, _| Ok(response.clone()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 按调用顺序记录的 query
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchClient for StaticSearchClient {
    async fn search(
        &self,
        query: &str,
        engines: &[String],
        _options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.to_string());
        }
        (self.responder)(query, engines)
    }

    async fn set_api_keys(&self, _keys: ApiKeys) -> Result<Vec<String>, SearchError> {
        Ok(vec!["static".to_string()])
    }
}
