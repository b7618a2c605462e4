//! 采样参数归一化
//!
//! 调用方可能传入 snake_case（`top_p`）或 camelCase（`topP`）两种写法；
//! 这里统一收敛成 [`SamplingOptions`]，非数值或未知键直接丢弃，不报错。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 默认温度
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// 默认 top_p
pub const DEFAULT_TOP_P: f32 = 0.85;

/// 一次 LLM 调用的采样参数（全部可选，None 表示交给后端默认）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl SamplingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认值：temperature 0.7、top_p 0.85
    pub fn defaults() -> Self {
        Self {
            temperature: Some(DEFAULT_TEMPERATURE),
            top_p: Some(DEFAULT_TOP_P),
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn with_top_p(mut self, value: f32) -> Self {
        self.top_p = Some(value);
        self
    }

    pub fn with_max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    /// 从任意 JSON 对象中读取采样参数，两种命名风格都接受；同一参数两种写法并存时 snake_case 优先
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let number = |snake: &str, camel: &str| -> Option<f64> {
            obj.get(snake)
                .and_then(Value::as_f64)
                .or_else(|| obj.get(camel).and_then(Value::as_f64))
                .filter(|n| n.is_finite())
        };
        let count = |snake: &str, camel: &str| -> Option<u32> {
            number(snake, camel)
                .filter(|n| *n >= 0.0)
                .map(|n| n.round().min(u32::MAX as f64) as u32)
        };

        Self {
            temperature: number("temperature", "temperature").map(|n| n as f32),
            top_p: number("top_p", "topP").map(|n| n as f32),
            top_k: count("top_k", "topK"),
            presence_penalty: number("presence_penalty", "presencePenalty").map(|n| n as f32),
            frequency_penalty: number("frequency_penalty", "frequencyPenalty").map(|n| n as f32),
            max_tokens: count("max_tokens", "maxTokens"),
        }
    }

    /// 以 self 为底，overrides 中已设置的字段覆盖之
    pub fn merge(&self, overrides: &SamplingOptions) -> Self {
        Self {
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            top_k: overrides.top_k.or(self.top_k),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
        }
    }

    /// 默认值垫底后的最终参数（发往后端前调用）
    pub fn resolved(&self) -> Self {
        Self::defaults().merge(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_both_naming_styles() {
        let opts = SamplingOptions::from_value(&json!({
            "temperature": 0.2,
            "topP": 0.5,
            "top_k": 40,
            "presencePenalty": 0.1,
            "frequency_penalty": 0.3,
            "maxTokens": 1024
        }));
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.top_p, Some(0.5));
        assert_eq!(opts.top_k, Some(40));
        assert_eq!(opts.presence_penalty, Some(0.1));
        assert_eq!(opts.frequency_penalty, Some(0.3));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[test]
    fn test_drops_non_numeric_values() {
        let opts = SamplingOptions::from_value(&json!({
            "temperature": "hot",
            "top_p": null,
            "maxTokens": -5,
            "seed": 42
        }));
        assert!(opts.is_empty());
    }

    #[test]
    fn test_non_object_is_empty() {
        assert!(SamplingOptions::from_value(&json!([1, 2])).is_empty());
    }

    #[test]
    fn test_defaults_merged_under_overrides() {
        let opts = SamplingOptions::new().with_temperature(0.1).resolved();
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.top_p, Some(DEFAULT_TOP_P));
        assert_eq!(opts.max_tokens, None);
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = SamplingOptions::new().with_temperature(0.3).with_max_tokens(100);
        let over = SamplingOptions::new().with_max_tokens(200);
        let merged = base.merge(&over);
        assert_eq!(merged.temperature, Some(0.3));
        assert_eq!(merged.max_tokens, Some(200));
    }
}
