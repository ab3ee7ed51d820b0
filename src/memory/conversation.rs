//! 对话消息：研究任务的输入消息与发往 LLM 的上下文消息
//!
//! 知识条目被展开为 user/assistant 消息对后与原始对话拼接，最后一条 user 消息承载当前问题。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// 从输入消息中解析研究问题：第一条 user 消息，否则最后一条消息；内容为空视为不存在
pub fn resolve_question(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .find(|m| m.is_user() && !m.content.trim().is_empty())
        .or_else(|| messages.iter().rev().find(|m| !m.content.trim().is_empty()))
        .map(|m| m.content.trim().to_string())
}
