//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DEEPRESEARCH__*` 覆盖
//! （双下划线表示嵌套，如 `DEEPRESEARCH__AGENT__TOKEN_BUDGET=500000`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub search: SearchSection,
    pub reader: ReaderSection,
    pub embedding: EmbeddingSection,
    pub agent: AgentSection,
    pub sandbox: SandboxSection,
}

/// [llm] 段：后端选择与采样参数；[llm.tools.<tool>] 为单个工具覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 键为工具名（agent、evaluator、query_rewriter ...）
    #[serde(default)]
    pub tools: HashMap<String, ToolOverride>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tools: HashMap::new(),
        }
    }
}

/// 单个工具的模型覆盖
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolOverride {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// 解析后的工具模型参数
#[derive(Debug, Clone, PartialEq)]
pub struct ToolModelConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmSection {
    /// 工具覆盖优先，其次 [llm] 全局值
    pub fn tool_config(&self, tool: &str) -> ToolModelConfig {
        let over = self.tools.get(tool);
        ToolModelConfig {
            model: over
                .and_then(|o| o.model.clone())
                .unwrap_or_else(|| self.model.clone()),
            temperature: over
                .and_then(|o| o.temperature)
                .unwrap_or(self.temperature),
            max_tokens: over.and_then(|o| o.max_tokens).unwrap_or(self.max_tokens),
        }
    }
}

/// [search] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// jina / serper
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: Option<String>,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_search_provider() -> String {
    "jina".to_string()
}

fn default_search_timeout_secs() -> u64 {
    30
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key: None,
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

/// [reader] 段：网页读取
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderSection {
    /// jina / http
    #[serde(default = "default_reader_provider")]
    pub provider: String,
    pub api_key: Option<String>,
    #[serde(default = "default_reader_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
}

fn default_reader_provider() -> String {
    "jina".to_string()
}

fn default_reader_timeout_secs() -> u64 {
    60
}

fn default_max_result_chars() -> usize {
    30_000
}

impl Default for ReaderSection {
    fn default() -> Self {
        Self {
            provider: default_reader_provider(),
            api_key: None,
            timeout_secs: default_reader_timeout_secs(),
            max_result_chars: default_max_result_chars(),
        }
    }
}

/// [embedding] 段
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    /// jina / openai
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

fn default_embedding_provider() -> String {
    "jina".to_string()
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            base_url: None,
            api_key: None,
        }
    }
}

/// [agent] 段：研究循环参数
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
    #[serde(default = "default_max_bad_attempts")]
    pub max_bad_attempts: u32,
    #[serde(default = "default_step_sleep_ms")]
    pub step_sleep_ms: u64,
    #[serde(default)]
    pub no_direct_answer: bool,
    #[serde(default = "default_num_returned_urls")]
    pub num_returned_urls: usize,
    #[serde(default = "default_max_ref")]
    pub max_ref: usize,
    #[serde(default = "default_min_rel_score")]
    pub min_rel_score: f32,
    #[serde(default)]
    pub boost_hostnames: Vec<String>,
    #[serde(default)]
    pub bad_hostnames: Vec<String>,
    #[serde(default)]
    pub only_hostnames: Vec<String>,
    /// 单步内搜索/抓取的并发上限
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_token_budget() -> u64 {
    1_000_000
}

fn default_max_bad_attempts() -> u32 {
    2
}

fn default_step_sleep_ms() -> u64 {
    1000
}

fn default_num_returned_urls() -> usize {
    100
}

fn default_max_ref() -> usize {
    10
}

fn default_min_rel_score() -> f32 {
    0.75
}

fn default_max_concurrency() -> usize {
    3
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            max_bad_attempts: default_max_bad_attempts(),
            step_sleep_ms: default_step_sleep_ms(),
            no_direct_answer: false,
            num_returned_urls: default_num_returned_urls(),
            max_ref: default_max_ref(),
            min_rel_score: default_min_rel_score(),
            boost_hostnames: Vec::new(),
            bad_hostnames: Vec::new(),
            only_hostnames: Vec::new(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// [sandbox] 段：coding 动作的代码执行
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_sandbox_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 DEEPRESEARCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DEEPRESEARCH__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("DEEPRESEARCH")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("agent.boost_hostnames")
            .with_list_parse_key("agent.bad_hostnames")
            .with_list_parse_key("agent.only_hostnames")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.token_budget, 1_000_000);
        assert_eq!(cfg.agent.max_bad_attempts, 2);
        assert_eq!(cfg.agent.max_ref, 10);
        assert!((cfg.agent.min_rel_score - 0.75).abs() < f32::EPSILON);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.sandbox.max_attempts, 3);
    }

    #[test]
    fn test_tool_override() {
        let mut llm = LlmSection::default();
        llm.tools.insert(
            "evaluator".into(),
            ToolOverride {
                model: Some("gpt-4o".into()),
                temperature: Some(0.0),
                max_tokens: None,
            },
        );
        let eval = llm.tool_config("evaluator");
        assert_eq!(eval.model, "gpt-4o");
        assert_eq!(eval.temperature, 0.0);
        assert_eq!(eval.max_tokens, 2048);
        assert_eq!(llm.tool_config("agent").model, "gpt-4o-mini");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[agent]
token_budget = 5000
bad_hostnames = ["spam.com"]

[llm.tools.agent_beast_mode]
temperature = 0.2
"#
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.token_budget, 5000);
        assert_eq!(cfg.agent.bad_hostnames, vec!["spam.com".to_string()]);
        assert_eq!(cfg.agent.step_sleep_ms, 1000);
        assert_eq!(cfg.llm.tool_config("agent_beast_mode").temperature, 0.2);
    }
}
