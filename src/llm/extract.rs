//! 从 LLM 自由文本中尽力提取 JSON
//!
//! 分层回退：```json 围栏块 → 首个 `{`/`[` 起的原文 → 截断修复（截到最后一个 `}`/`]`）→ None。
//! 纯函数，除告警日志外无副作用，永不 panic。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```json\s*(.*?)```").expect("valid fence regex"))
}

/// 取待解析正文：有 ```json 围栏则取围栏内，否则整段
fn search_body(text: &str) -> &str {
    fence_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

/// 提取文本中嵌入的 JSON 对象或数组；无法解析时返回 None
pub fn extract_json(text: &str) -> Option<Value> {
    let body = search_body(text);
    let start = body.find(['{', '['])?;
    let candidate = &body[start..];

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    // 修复：截到最后一个闭合符（处理尾部垃圾）
    let end = match (candidate.rfind('}'), candidate.rfind(']')) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => {
            tracing::warn!(len = text.len(), "extract_json: no closing bracket, giving up");
            return None;
        }
    };

    match serde_json::from_str::<Value>(&candidate[..=end]) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, len = text.len(), "extract_json: repair failed");
            None
        }
    }
}

/// 提取并反序列化为具体类型；结构不符同样返回 None
pub fn extract_as<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let value = extract_json(text)?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(error = %e, "extract_as: JSON shape mismatch");
            None
        }
    }
}
