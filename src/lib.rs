//! Deep Research - Rust 深度研究智能体
//!
//! 模块划分：
//! - **agent**: 研究 Agent 运行时（process_research_task）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务上下文、研究状态、有界并发调度
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入、结构化生成
//! - **memory**: 对话消息、知识条目、动作日志、Token 预算
//! - **observability**: 日志初始化
//! - **react**: 动作决策、评审、主循环与最终答案后处理
//! - **tools**: 搜索、网页读取、URL 排序、去重、Markdown 修复、引用、代码沙箱

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{ResearchAgent, ResearchRequest, ResearchResult};
pub use config::{load_config, AppConfig};
