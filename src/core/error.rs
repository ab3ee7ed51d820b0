//! Agent 错误类型
//!
//! 研究任务中唯一向外传播的错误是「无法解析出问题」（InvalidQuestion）；
//! 其余错误都在发生的那一层被吸收：单条搜索/抓取失败进入 bad 列表，单步生成失败视为空步，
//! 评估失败走有限重试，后处理失败回退到未处理的答案。

use thiserror::Error;

/// 研究任务运行过程中可能出现的错误（LLM、结构化输出、搜索、读取、嵌入、沙箱等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 无法从输入中确定研究问题（唯一的致命错误）
    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// LLM 返回内容不符合 schema（缺字段、枚举越界等）
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// 结构化决策中出现未知的 action 判别值
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// action 判别值合法，但对应负载缺失或无法解码
    #[error("Missing payload for action {action}: {reason}")]
    MissingPayload { action: String, reason: String },

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Publish failed: {0}")]
    Publish(String),
}

impl AgentError {
    /// 是否为需要向调用方传播的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::InvalidQuestion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_invalid_question_is_fatal() {
        assert!(AgentError::InvalidQuestion("empty".into()).is_fatal());
        assert!(!AgentError::Llm("timeout".into()).is_fatal());
        assert!(!AgentError::UnknownAction("dance".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = AgentError::MissingPayload {
            action: "search".into(),
            reason: "no searchRequests".into(),
        };
        assert_eq!(
            err.to_string(),
            "Missing payload for action search: no searchRequests"
        );
    }
}
