//! 搜索层：多引擎统一接口（Bing / Google），结果归一化、去重与部分失败隔离

pub mod bing;
pub mod client;
pub mod dedup;
pub mod engine;
pub mod google;
pub mod mock;
pub mod types;

pub use bing::BingEngine;
pub use client::{MultiEngineSearchClient, SearchClient};
pub use dedup::{dedupe_results, normalize_url};
pub use engine::{http_client, SearchEngine};
pub use google::GoogleEngine;
pub use mock::StaticSearchClient;
pub use types::{
    ApiKeys, EngineFailure, SearchData, SearchError, SearchOptions, SearchResponse, SearchResult,
};
