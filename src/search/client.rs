//! 多引擎搜索客户端
//!
//! 对外暴露统一的 SearchClient：一个 query 同时发往多个引擎，各引擎独立结算（join_all），
//! 单个引擎失败只记入 errors，不影响其它引擎的结果；合并后按归一化 URL 去重（先到先得）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::search::dedup::dedupe_results;
use crate::search::{
    ApiKeys, EngineFailure, SearchEngine, SearchError, SearchOptions, SearchResponse,
};

/// 搜索客户端 trait（Agent 只依赖此接口）
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// 多引擎搜索；Err 表示整体调用异常（等价于抛出），Ok 中 success=false 表示全部引擎失败
    async fn search(
        &self,
        query: &str,
        engines: &[String],
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError>;

    /// 替换引擎凭据，返回当前已配置的引擎名
    async fn set_api_keys(&self, keys: ApiKeys) -> Result<Vec<String>, SearchError>;
}

/// 基于已注册 SearchEngine 的多引擎客户端
pub struct MultiEngineSearchClient {
    engines: HashMap<String, Arc<dyn SearchEngine>>,
    default_engines: Vec<String>,
    defaults: SearchOptions,
}

impl MultiEngineSearchClient {
    pub fn new(default_engines: Vec<String>) -> Self {
        Self {
            engines: HashMap::new(),
            default_engines,
            defaults: SearchOptions::default(),
        }
    }

    /// 调用方未指定时使用的参数（如每引擎结果数、语言）
    pub fn with_defaults(mut self, defaults: SearchOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn register(&mut self, engine: impl SearchEngine + 'static) {
        let name = engine.name().to_lowercase();
        self.engines.insert(name, Arc::new(engine));
    }

    pub fn engine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn configured_engines(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engines
            .iter()
            .filter(|(_, e)| e.is_configured())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// 请求的引擎列表：为空时用默认列表；去重并保持顺序
    fn requested(&self, engines: &[String]) -> Vec<String> {
        let source = if engines.is_empty() {
            self.default_engines.as_slice()
        } else {
            engines
        };
        let mut out: Vec<String> = Vec::new();
        for name in source {
            let name = name.trim().to_lowercase();
            if !name.is_empty() && !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }
}

#[async_trait]
impl SearchClient for MultiEngineSearchClient {
    async fn search(
        &self,
        query: &str,
        engines: &[String],
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchResponse::failed("empty query"));
        }
        let requested = self.requested(engines);
        if requested.is_empty() {
            return Ok(SearchResponse::failed("no search engines requested"));
        }
        let options = &self.defaults.merge(options);

        let calls = requested.iter().map(|name| async move {
            let outcome = match self.engines.get(name) {
                Some(engine) => engine.search(query, options).await,
                None => Err(SearchError::UnknownEngine(name.clone())),
            };
            (name.clone(), outcome)
        });

        let mut merged = Vec::new();
        let mut errors = Vec::new();
        for (engine, outcome) in join_all(calls).await {
            match outcome {
                Ok(results) => merged.push(results),
                Err(e) => {
                    tracing::warn!(engine = %engine, query, error = %e, "engine search failed");
                    errors.push(EngineFailure {
                        engine,
                        error: e.to_string(),
                    });
                }
            }
        }

        let succeeded = merged.len();
        let mut results = dedupe_results(merged.into_iter().flatten());
        if options.sort_by_time.unwrap_or(false) {
            // 稳定排序：无时间戳的排在最后
            results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        if let Some(max) = options.max_results {
            results.truncate(max);
        }

        let error = if succeeded == 0 {
            Some(
                errors
                    .iter()
                    .map(|f| f.error.clone())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        } else {
            None
        };

        Ok(SearchResponse {
            success: succeeded > 0,
            data: crate::search::SearchData { results },
            error,
            errors,
        })
    }

    async fn set_api_keys(&self, keys: ApiKeys) -> Result<Vec<String>, SearchError> {
        for engine in self.engines.values() {
            engine.set_api_keys(&keys);
        }
        let configured = self.configured_engines();
        tracing::info!(engines = ?configured, "search api keys updated");
        Ok(configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchResult;

    struct FakeEngine {
        name: &'static str,
        results: Result<Vec<SearchResult>, SearchError>,
    }

    #[async_trait]
    impl SearchEngine for FakeEngine {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(
            &self,
            _query: &str,
            _options: &SearchOptions,
        ) -> Result<Vec<SearchResult>, SearchError> {
            self.results.clone()
        }
    }

    fn client() -> MultiEngineSearchClient {
        let mut client = MultiEngineSearchClient::new(vec!["alpha".into()]);
        client.register(FakeEngine {
            name: "alpha",
            results: Ok(vec![
                SearchResult::new("A1", "https://a.com/1", "alpha").with_timestamp(10),
                SearchResult::new("Shared", "https://shared.com", "alpha"),
            ]),
        });
        client.register(FakeEngine {
            name: "beta",
            results: Ok(vec![
                SearchResult::new("Shared again", "https://shared.com/", "beta"),
                SearchResult::new("B1", "https://b.com/1", "beta").with_timestamp(20),
            ]),
        });
        client.register(FakeEngine {
            name: "broken",
            results: Err(SearchError::Http {
                engine: "broken".into(),
                status: 500,
            }),
        });
        client
    }

    #[tokio::test]
    async fn test_merges_and_dedupes_in_engine_order() {
        let client = client();
        let engines = vec!["alpha".to_string(), "beta".to_string()];
        let resp = client
            .search("q", &engines, &SearchOptions::default())
            .await
            .unwrap();
        assert!(resp.success);
        let titles: Vec<_> = resp.data.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A1", "Shared", "B1"]);
    }

    #[tokio::test]
    async fn test_partial_engine_failure_is_isolated() {
        let client = client();
        let engines = vec!["broken".to_string(), "beta".to_string()];
        let resp = client
            .search("q", &engines, &SearchOptions::default())
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.data.results.len(), 2);
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].engine, "broken");
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_all_engines_failing_reports_error() {
        let client = client();
        let engines = vec!["broken".to_string(), "missing".to_string()];
        let resp = client
            .search("q", &engines, &SearchOptions::default())
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.errors.len(), 2);
        assert!(resp.error.unwrap().contains("Unknown search engine"));
    }

    #[tokio::test]
    async fn test_sort_by_time_and_cap() {
        let client = client();
        let engines = vec!["alpha".to_string(), "beta".to_string()];
        let options = SearchOptions {
            max_results: Some(2),
            sort_by_time: Some(true),
            ..SearchOptions::default()
        };
        let resp = client.search("q", &engines, &options).await.unwrap();
        let titles: Vec<_> = resp.data.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["B1", "A1"]);
    }

    #[tokio::test]
    async fn test_call_can_turn_off_default_time_sort() {
        let client = client().with_defaults(SearchOptions {
            sort_by_time: Some(true),
            ..SearchOptions::default()
        });
        let engines = vec!["alpha".to_string(), "beta".to_string()];
        let options = SearchOptions {
            max_results: Some(2),
            sort_by_time: Some(false),
            ..SearchOptions::default()
        };
        let resp = client.search("q", &engines, &options).await.unwrap();
        let titles: Vec<_> = resp.data.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A1", "Shared"]);

        let resp = client
            .search("q", &engines, &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.data.results[0].title, "B1");
    }

    #[tokio::test]
    async fn test_empty_engine_list_uses_defaults() {
        let client = client();
        let resp = client
            .search("q", &[], &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.data.results.len(), 2);
    }
}
