//! 记忆层：对话消息、知识条目、动作日志与 Token 预算

pub mod action_log;
pub mod conversation;
pub mod knowledge;
pub mod token_budget;

pub use action_log::{ActionEntry, ActionTracker};
pub use conversation::{resolve_question, Message, Role};
pub use knowledge::{
    build_msgs_from_knowledge, compose_msgs, select_knowledge, KnowledgeItem, KnowledgeKind, Reference,
    MAX_KNOWLEDGE_ITEMS,
};
pub use token_budget::{TokenEstimator, TokenSummary, TokenTracker, TokenUsage};
