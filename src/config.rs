//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DEEPR__*` 覆盖（双下划线表示嵌套，如 `DEEPR__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub search: SearchSection,
    pub research: ResearchSection,
}

/// [app] 段：应用名与 HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 启动日志中的服务名
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_app_name() -> String {
    "deepr".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// [llm] 段：后端选择、默认模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 默认后端：deepseek / openai；实际可用性由 API Key 决定
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 步骤未单独指定模型时使用
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点（代理 / 自建服务）
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: ProviderSection,
    #[serde(default)]
    pub openai: ProviderSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: ProviderSection::default(),
            openai: ProviderSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

/// 单个后端的 key 与模型覆盖（key 缺省时读环境变量）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSection {
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            stream: default_stream_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

/// [search] 段：默认引擎、超时、各引擎凭据
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_engines")]
    pub engines: Vec<String>,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results_per_engine")]
    pub max_results_per_engine: usize,
    pub language: Option<String>,
    #[serde(default)]
    pub bing: BingSection,
    #[serde(default)]
    pub google: GoogleSection,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            engines: default_engines(),
            timeout_secs: default_search_timeout_secs(),
            max_results_per_engine: default_max_results_per_engine(),
            language: None,
            bing: BingSection::default(),
            google: GoogleSection::default(),
        }
    }
}

fn default_engines() -> Vec<String> {
    vec!["bing".into()]
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_results_per_engine() -> usize {
    10
}

/// [search.bing] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BingSection {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
}

/// [search.google] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleSection {
    pub api_key: Option<String>,
    pub cx: Option<String>,
    pub endpoint: Option<String>,
}

/// [research] 段：流水线默认参数
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchSection {
    /// SearchAgent 最多执行的查询数
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// 去重后保留的最多结果数
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// 是否在 search 前插入 planning 步骤
    #[serde(default)]
    pub include_planning: bool,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            max_results: default_max_results(),
            include_planning: false,
            audience: default_audience(),
            format: default_format(),
        }
    }
}

fn default_max_queries() -> usize {
    4
}

fn default_max_results() -> usize {
    15
}

fn default_audience() -> String {
    "executive".to_string()
}

fn default_format() -> String {
    "markdown".to_string()
}

/// 从 config 目录加载配置，环境变量 DEEPR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DEEPR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DEEPR")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("search.engines")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
