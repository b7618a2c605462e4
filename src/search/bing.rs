//! Bing Web Search v7
//!
//! `Ocp-Apim-Subscription-Key` 鉴权；结果位于 `webPages.value[]`。

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::search::engine::{check_status, non_empty, transport_error, DEFAULT_ENGINE_RESULTS};
use crate::search::{ApiKeys, SearchEngine, SearchError, SearchOptions, SearchResult};

pub const BING_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/search";

pub struct BingEngine {
    client: Client,
    endpoint: String,
    api_key: RwLock<Option<String>>,
}

impl BingEngine {
    pub fn new(client: Client, api_key: Option<String>, endpoint: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| BING_ENDPOINT.to_string()),
            api_key: RwLock::new(non_empty(api_key.or_else(|| std::env::var("BING_API_KEY").ok()))),
        }
    }

    fn api_key(&self) -> Option<String> {
        self.api_key.read().ok().and_then(|k| k.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BingResponse {
    web_pages: Option<BingWebPages>,
}

#[derive(Debug, Deserialize)]
struct BingWebPages {
    #[serde(default)]
    value: Vec<BingWebPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BingWebPage {
    name: Option<String>,
    url: String,
    snippet: Option<String>,
    display_url: Option<String>,
    date_last_crawled: Option<String>,
}

/// 解析 Bing 响应体
pub(crate) fn parse_bing(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let parsed: BingResponse = serde_json::from_str(body).map_err(|e| SearchError::Decode {
        engine: "bing".to_string(),
        message: e.to_string(),
    })?;
    let pages = parsed.web_pages.map(|w| w.value).unwrap_or_default();
    Ok(pages
        .into_iter()
        .map(|p| {
            let timestamp = p
                .date_last_crawled
                .as_deref()
                .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.timestamp_millis());
            SearchResult {
                title: p.name.unwrap_or_else(|| p.url.clone()),
                display_url: p.display_url.unwrap_or_else(|| p.url.clone()),
                url: p.url,
                snippet: p.snippet.unwrap_or_default(),
                engine: "bing".to_string(),
                timestamp,
            }
        })
        .collect())
}

#[async_trait]
impl SearchEngine for BingEngine {
    fn name(&self) -> &str {
        "bing"
    }

    fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }

    fn set_api_keys(&self, keys: &ApiKeys) {
        if let Some(key) = non_empty(keys.bing.clone()) {
            if let Ok(mut slot) = self.api_key.write() {
                *slot = Some(key);
            }
        }
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let api_key = self
            .api_key()
            .ok_or_else(|| SearchError::NotConfigured("bing".to_string()))?;
        let count = options
            .max_results
            .unwrap_or(DEFAULT_ENGINE_RESULTS)
            .min(50)
            .to_string();

        let mut req = self
            .client
            .get(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", api_key)
            .query(&[("q", query), ("count", count.as_str())]);
        if let Some(lang) = options.language.as_deref() {
            req = req.query(&[("mkt", lang)]);
        }

        let resp = req.send().await.map_err(|e| transport_error("bing", e))?;
        check_status("bing", &resp)?;
        let body = resp.text().await.map_err(|e| transport_error("bing", e))?;
        let results = parse_bing(&body)?;
        tracing::debug!(query, count = results.len(), "bing search done");
        Ok(results)
    }
}
