//! Google Custom Search JSON API v1
//!
//! `key` + `cx` 查询参数鉴权；结果位于 `items[]`，单次最多 10 条。

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::search::engine::{check_status, non_empty, transport_error, DEFAULT_ENGINE_RESULTS};
use crate::search::{ApiKeys, SearchEngine, SearchError, SearchOptions, SearchResult};

pub const GOOGLE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Clone, Default)]
struct GoogleCredentials {
    api_key: Option<String>,
    cx: Option<String>,
}

pub struct GoogleEngine {
    client: Client,
    endpoint: String,
    credentials: RwLock<GoogleCredentials>,
}

impl GoogleEngine {
    pub fn new(
        client: Client,
        api_key: Option<String>,
        cx: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.unwrap_or_else(|| GOOGLE_ENDPOINT.to_string()),
            credentials: RwLock::new(GoogleCredentials {
                api_key: non_empty(api_key.or_else(|| std::env::var("GOOGLE_API_KEY").ok())),
                cx: non_empty(cx.or_else(|| std::env::var("GOOGLE_CX").ok())),
            }),
        }
    }

    fn credentials(&self) -> Option<(String, String)> {
        let creds = self.credentials.read().ok()?;
        Some((creds.api_key.clone()?, creds.cx.clone()?))
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleItem {
    title: Option<String>,
    link: String,
    snippet: Option<String>,
    display_link: Option<String>,
}

/// 解析 Google 响应体
pub(crate) fn parse_google(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let parsed: GoogleResponse = serde_json::from_str(body).map_err(|e| SearchError::Decode {
        engine: "google".to_string(),
        message: e.to_string(),
    })?;
    Ok(parsed
        .items
        .into_iter()
        .map(|item| SearchResult {
            title: item.title.unwrap_or_else(|| item.link.clone()),
            display_url: item.display_link.unwrap_or_else(|| item.link.clone()),
            url: item.link,
            snippet: item.snippet.unwrap_or_default().replace('\n', " "),
            engine: "google".to_string(),
            timestamp: None,
        })
        .collect())
}

#[async_trait]
impl SearchEngine for GoogleEngine {
    fn name(&self) -> &str {
        "google"
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    fn set_api_keys(&self, keys: &ApiKeys) {
        if let Ok(mut creds) = self.credentials.write() {
            if let Some(key) = non_empty(keys.google.clone()) {
                creds.api_key = Some(key);
            }
            if let Some(cx) = non_empty(keys.google_cx.clone()) {
                creds.cx = Some(cx);
            }
        }
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let (api_key, cx) = self
            .credentials()
            .ok_or_else(|| SearchError::NotConfigured("google".to_string()))?;
        let num = options
            .max_results
            .unwrap_or(DEFAULT_ENGINE_RESULTS)
            .clamp(1, 10)
            .to_string();

        let mut req = self.client.get(&self.endpoint).query(&[
            ("key", api_key.as_str()),
            ("cx", cx.as_str()),
            ("q", query),
            ("num", num.as_str()),
        ]);
        if let Some(lang) = options.language.as_deref() {
            req = req.query(&[("hl", lang)]);
        }

        let resp = req.send().await.map_err(|e| transport_error("google", e))?;
        check_status("google", &resp)?;
        let body = resp.text().await.map_err(|e| transport_error("google", e))?;
        let results = parse_google(&body)?;
        tracing::debug!(query, count = results.len(), "google search done");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_minimal_google_shape() {
        let body = r#"{
            "items": [
                {"title": "Tokio", "link": "https://tokio.rs", "snippet": "An async\nruntime",
                 "displayLink": "tokio.rs"}
            ]
        }"#;
        let results = parse_google(body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].snippet, "An async runtime");
        assert_eq!(results[0].display_url, "tokio.rs");
        assert_eq!(results[0].engine, "google");
    }

    #[test]
    fn test_no_items_is_empty() {
        assert!(parse_google(r#"{"kind": "customsearch#search"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_requires_both_key_and_cx() {
        let engine = GoogleEngine::new(Client::new(), Some("key".into()), Some(String::new()), None);
        // GOOGLE_CX 可能存在于环境中，这里只校验显式设置后的状态
        engine.set_api_keys(&ApiKeys {
            google_cx: Some("cx-1".into()),
            ..ApiKeys::default()
        });
        assert!(engine.is_configured());
    }
}
