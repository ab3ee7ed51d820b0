//! 按工具路由模型
//!
//! 研究流程中的每类 LLM 调用（决策、评估、查询改写 ...）都有一个工具名，
//! 可在 [llm.tools.<tool>] 中单独指定模型与采样参数；未覆盖的工具使用默认客户端。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{create_deepseek_client, LlmClient, OpenAiClient};
use crate::config::LlmSection;

/// 发起 LLM 调用的工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    Agent,
    AgentBeastMode,
    Evaluator,
    QueryRewriter,
    ErrorAnalyzer,
    MdFixer,
    RefBuilder,
    CodeGenerator,
    BrokenChFixer,
}

impl ToolName {
    pub const ALL: [ToolName; 9] = [
        ToolName::Agent,
        ToolName::AgentBeastMode,
        ToolName::Evaluator,
        ToolName::QueryRewriter,
        ToolName::ErrorAnalyzer,
        ToolName::MdFixer,
        ToolName::RefBuilder,
        ToolName::CodeGenerator,
        ToolName::BrokenChFixer,
    ];

    /// 配置键与 token 统计使用的名字
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::Agent => "agent",
            ToolName::AgentBeastMode => "agent_beast_mode",
            ToolName::Evaluator => "evaluator",
            ToolName::QueryRewriter => "query_rewriter",
            ToolName::ErrorAnalyzer => "error_analyzer",
            ToolName::MdFixer => "md_fixer",
            ToolName::RefBuilder => "ref_builder",
            ToolName::CodeGenerator => "code_generator",
            ToolName::BrokenChFixer => "broken_ch_fixer",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具 → 客户端映射
#[derive(Clone)]
pub struct ToolModels {
    default: Arc<dyn LlmClient>,
    overrides: HashMap<ToolName, Arc<dyn LlmClient>>,
}

impl ToolModels {
    /// 所有工具共用同一个客户端
    pub fn single(client: Arc<dyn LlmClient>) -> Self {
        Self {
            default: client,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, tool: ToolName, client: Arc<dyn LlmClient>) -> Self {
        self.overrides.insert(tool, client);
        self
    }

    pub fn get(&self, tool: ToolName) -> Arc<dyn LlmClient> {
        self.overrides
            .get(&tool)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// 根据 [llm] 段构建：每个出现在 [llm.tools] 中的工具得到独立客户端
    pub fn from_config(llm: &LlmSection) -> Self {
        let build = |model: &str, temperature: f32, max_tokens: u32| -> Arc<dyn LlmClient> {
            let client = match llm.provider.as_str() {
                "deepseek" => create_deepseek_client(Some(model), llm.api_key.as_deref()),
                _ => OpenAiClient::new(llm.base_url.as_deref(), model, llm.api_key.as_deref()),
            };
            Arc::new(client.with_sampling(temperature, max_tokens))
        };

        let mut models = Self::single(build(&llm.model, llm.temperature, llm.max_tokens));
        for tool in ToolName::ALL {
            if llm.tools.contains_key(tool.as_str()) {
                let cfg = llm.tool_config(tool.as_str());
                tracing::debug!(tool = %tool, model = %cfg.model, "Tool model override");
                models = models.with_override(tool, build(&cfg.model, cfg.temperature, cfg.max_tokens));
            }
        }
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_override_and_fallback() {
        let default: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::named("default", vec!["{}"]));
        let eval: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::named("eval", vec!["{}"]));
        let models = ToolModels::single(default).with_override(ToolName::Evaluator, eval);
        assert_eq!(models.get(ToolName::Evaluator).model_name(), "eval");
        assert_eq!(models.get(ToolName::Agent).model_name(), "default");
    }

    #[test]
    fn test_tool_names_are_config_keys() {
        assert_eq!(ToolName::AgentBeastMode.as_str(), "agent_beast_mode");
        assert_eq!(ToolName::ALL.len(), 9);
    }
}
