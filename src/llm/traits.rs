//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：一次非流式完成，返回内容与本次 token 用量。
//! 每次调用显式传入 TaskContext，任务级凭据由具体实现决定如何使用。

use async_trait::async_trait;

use crate::core::{AgentError, TaskContext};
use crate::memory::{Message, TokenUsage};

/// 单次完成结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    /// 提供方报告的用量；为 0 时由调用方估算
    pub usage: TokenUsage,
}

impl Completion {
    pub fn new(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            usage,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, ctx: &TaskContext, messages: &[Message])
        -> Result<Completion, AgentError>;

    /// 模型名（用于日志）
    fn model_name(&self) -> &str {
        "unknown"
    }
}
