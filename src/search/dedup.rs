//! URL 归一化与去重（先到先得，保持原顺序）

use std::collections::HashSet;

use crate::search::SearchResult;

/// 归一化 URL：scheme/host 小写，去掉 fragment 与末尾斜杠；空 URL 返回空串
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    let (scheme, rest) = match url.split_once("://") {
        Some((s, r)) => (s.to_lowercase(), r),
        None => (String::new(), url),
    };
    let (host, path) = match rest.find(['/', '?']) {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = path.trim_end_matches('/');
    // http 与 https 视为同一资源
    let scheme = match scheme.as_str() {
        "http" | "https" => "",
        other => other,
    };
    format!("{scheme}{host}{path}")
}

/// 去重键：归一化 URL；URL 为空时回退为 `url|title`
pub fn dedup_key(result: &SearchResult) -> String {
    let normalized = normalize_url(&result.url);
    if normalized.is_empty() {
        format!("{}|{}", result.url.trim(), result.title.trim().to_lowercase())
    } else {
        normalized
    }
}

/// 去重：首次出现者保留
pub fn dedupe_results(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(dedup_key(r)))
        .collect()
}
