//! 深度研究的模型与采样配置
//!
//! 请求中的 `deepAgent` 选项在每次运行开始时解析成 [`DeepAgentConfig`]：
//! 步骤模型优先级为 显式 models.<step> > providerMapping.<step>（启用时）> baseModel；
//! 采样参数夹到 temperature∈[0,2]、topP∈[0,1]。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::pipeline::{STEP_MODELING, STEP_PLANNING, STEP_REPORT, STEP_SEARCH};
use crate::llm::sampling::{DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use crate::llm::SamplingOptions;

/// 各步骤的模型名
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepModels {
    pub planning: Option<String>,
    pub search: Option<String>,
    pub modeling: Option<String>,
    pub report: Option<String>,
}

/// 读取某步骤的字符串值；非字符串按缺省处理
fn step_text(obj: &Map<String, Value>, step_id: &str) -> Option<String> {
    obj.get(step_id).and_then(Value::as_str).map(String::from)
}

impl StepModels {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            planning: step_text(obj, STEP_PLANNING),
            search: step_text(obj, STEP_SEARCH),
            modeling: step_text(obj, STEP_MODELING),
            report: step_text(obj, STEP_REPORT),
        }
    }

    fn get(&self, step_id: &str) -> Option<&str> {
        let value = match step_id {
            STEP_PLANNING => self.planning.as_deref(),
            STEP_SEARCH => self.search.as_deref(),
            STEP_MODELING => self.modeling.as_deref(),
            STEP_REPORT => self.report.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// 请求中的采样参数（未夹取）
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingInput {
    pub temperature: Option<f64>,
    #[serde(alias = "top_p")]
    pub top_p: Option<f64>,
}

/// 步骤到后端的映射：值为 provider 名（使用 baseModel）或完整的 `provider:model`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderMapping {
    pub enabled: bool,
    pub planning: Option<String>,
    pub search: Option<String>,
    pub modeling: Option<String>,
    pub report: Option<String>,
}

impl ProviderMapping {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            enabled: obj.get("enabled").and_then(Value::as_bool).unwrap_or(false),
            planning: step_text(obj, STEP_PLANNING),
            search: step_text(obj, STEP_SEARCH),
            modeling: step_text(obj, STEP_MODELING),
            report: step_text(obj, STEP_REPORT),
        }
    }

    fn get(&self, step_id: &str) -> Option<&str> {
        let value = match step_id {
            STEP_PLANNING => self.planning.as_deref(),
            STEP_SEARCH => self.search.as_deref(),
            STEP_MODELING => self.modeling.as_deref(),
            STEP_REPORT => self.report.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// 请求中的 deepAgent 选项
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeepAgentOptions {
    pub enabled: Option<bool>,
    pub models: StepModels,
    pub sampling: SamplingInput,
    pub provider_mapping: ProviderMapping,
}

impl DeepAgentOptions {
    /// 逐字段读取请求 JSON；某个字段类型不对只丢弃该字段，其余照常生效
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let section = |camel: &str, snake: &str| obj.get(camel).or_else(|| obj.get(snake));
        let sampling = section("sampling", "sampling")
            .map(SamplingOptions::from_value)
            .unwrap_or_default();
        Self {
            enabled: obj.get("enabled").and_then(Value::as_bool),
            models: section("models", "models")
                .map(StepModels::from_value)
                .unwrap_or_default(),
            sampling: SamplingInput {
                temperature: sampling.temperature.map(f64::from),
                top_p: sampling.top_p.map(f64::from),
            },
            provider_mapping: section("providerMapping", "provider_mapping")
                .map(ProviderMapping::from_value)
                .unwrap_or_default(),
        }
    }
}

/// 解析后的步骤模型
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedModels {
    pub planning: String,
    pub search: String,
    pub modeling: String,
    pub report: String,
}

/// 解析后的采样参数（已夹取）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepAgentSampling {
    pub temperature: f32,
    pub top_p: f32,
}

/// 解析后的 deepAgent 配置
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepAgentConfig {
    pub enabled: bool,
    pub base_model: String,
    pub models: ResolvedModels,
    pub sampling: DeepAgentSampling,
    pub provider_mapping: ProviderMapping,
}

impl DeepAgentConfig {
    /// 无任何选项时的配置：所有步骤用 base_model、默认采样
    pub fn for_model(base_model: &str) -> Self {
        resolve_deep_agent_config(&DeepAgentOptions::default(), base_model)
    }

    /// 步骤使用的模型；未知步骤回落到 base_model
    pub fn model_for(&self, step_id: &str) -> &str {
        match step_id {
            STEP_PLANNING => &self.models.planning,
            STEP_SEARCH => &self.models.search,
            STEP_MODELING => &self.models.modeling,
            STEP_REPORT => &self.models.report,
            _ => &self.base_model,
        }
    }

    pub fn sampling_options(&self) -> SamplingOptions {
        SamplingOptions::new()
            .with_temperature(self.sampling.temperature)
            .with_top_p(self.sampling.top_p)
    }
}

fn clamp_or(value: Option<f64>, default: f32, min: f32, max: f32) -> f32 {
    match value {
        Some(v) if v.is_finite() => (v as f32).clamp(min, max),
        _ => default,
    }
}

/// 解析 deepAgent 选项；enabled=false 时忽略步骤级模型覆盖
pub fn resolve_deep_agent_config(options: &DeepAgentOptions, base_model: &str) -> DeepAgentConfig {
    let enabled = options.enabled.unwrap_or(true);
    let base_model = base_model.trim().to_string();

    let pick = |step_id: &str| -> String {
        if !enabled {
            return base_model.clone();
        }
        if let Some(model) = options.models.get(step_id) {
            return model.to_string();
        }
        if options.provider_mapping.enabled {
            if let Some(mapped) = options.provider_mapping.get(step_id) {
                return if mapped.contains(':') {
                    mapped.to_string()
                } else {
                    format!("{}:{}", mapped, base_model)
                };
            }
        }
        base_model.clone()
    };

    DeepAgentConfig {
        enabled,
        models: ResolvedModels {
            planning: pick(STEP_PLANNING),
            search: pick(STEP_SEARCH),
            modeling: pick(STEP_MODELING),
            report: pick(STEP_REPORT),
        },
        sampling: DeepAgentSampling {
            temperature: clamp_or(options.sampling.temperature, DEFAULT_TEMPERATURE, 0.0, 2.0),
            top_p: clamp_or(options.sampling.top_p, DEFAULT_TOP_P, 0.0, 1.0),
        },
        provider_mapping: options.provider_mapping.clone(),
        base_model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> DeepAgentOptions {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_sampling_is_clamped() {
        let cfg = resolve_deep_agent_config(
            &parse(json!({ "sampling": { "temperature": 3.4, "topP": 1.5 } })),
            "fallback",
        );
        assert_eq!(cfg.sampling.temperature, 2.0);
        assert_eq!(cfg.sampling.top_p, 1.0);

        let low = resolve_deep_agent_config(
            &parse(json!({ "sampling": { "temperature": -1.0, "top_p": -0.2 } })),
            "fallback",
        );
        assert_eq!(low.sampling.temperature, 0.0);
        assert_eq!(low.sampling.top_p, 0.0);
    }

    #[test]
    fn test_defaults_when_absent() {
        let cfg = DeepAgentConfig::for_model("base");
        assert!(cfg.enabled);
        assert_eq!(cfg.sampling.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(cfg.sampling.top_p, DEFAULT_TOP_P);
        assert_eq!(cfg.model_for(STEP_SEARCH), "base");
        assert_eq!(cfg.model_for("custom"), "base");
    }

    #[test]
    fn test_explicit_model_beats_provider_mapping() {
        let cfg = resolve_deep_agent_config(
            &parse(json!({
                "models": { "search": "gpt-4o" },
                "providerMapping": { "enabled": true, "search": "deepseek", "report": "openai" }
            })),
            "deepseek-chat",
        );
        assert_eq!(cfg.model_for(STEP_SEARCH), "gpt-4o");
        assert_eq!(cfg.model_for(STEP_REPORT), "openai:deepseek-chat");
        assert_eq!(cfg.model_for(STEP_MODELING), "deepseek-chat");
    }

    #[test]
    fn test_mapping_ignored_when_disabled() {
        let cfg = resolve_deep_agent_config(
            &parse(json!({
                "providerMapping": { "enabled": false, "search": "openai:gpt-4o-mini" }
            })),
            "base",
        );
        assert_eq!(cfg.model_for(STEP_SEARCH), "base");
    }

    #[test]
    fn test_bad_field_only_drops_itself() {
        let options = DeepAgentOptions::from_value(&json!({
            "models": { "report": "gpt-4o", "search": 42 },
            "sampling": { "temperature": "hot", "topP": 0.5 },
            "providerMapping": { "enabled": "yes", "modeling": "deepseek" },
            "enabled": true
        }));
        assert_eq!(options.enabled, Some(true));
        assert_eq!(options.models.report.as_deref(), Some("gpt-4o"));
        assert_eq!(options.models.search, None);
        assert_eq!(options.sampling.temperature, None);
        assert_eq!(options.sampling.top_p, Some(0.5));
        assert!(!options.provider_mapping.enabled);
        assert_eq!(options.provider_mapping.modeling.as_deref(), Some("deepseek"));

        let cfg = resolve_deep_agent_config(&options, "base");
        assert_eq!(cfg.model_for(STEP_REPORT), "gpt-4o");
        assert_eq!(cfg.model_for(STEP_MODELING), "base");
        assert_eq!(cfg.sampling.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn test_from_value_accepts_snake_case_sections() {
        let options = DeepAgentOptions::from_value(&json!({
            "provider_mapping": { "enabled": true, "search": "openai" },
            "sampling": { "top_p": 0.25 }
        }));
        assert!(options.provider_mapping.enabled);
        assert_eq!(options.sampling.top_p, Some(0.25));
        assert_eq!(DeepAgentOptions::from_value(&json!("nope")), DeepAgentOptions::default());
    }

    #[test]
    fn test_disabled_deep_agent_uses_base_model() {
        let cfg = resolve_deep_agent_config(
            &parse(json!({ "enabled": false, "models": { "report": "gpt-4o" } })),
            "base",
        );
        assert!(!cfg.enabled);
        assert_eq!(cfg.model_for(STEP_REPORT), "base");
    }
}
