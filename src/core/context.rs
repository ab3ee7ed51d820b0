//! 任务上下文：每个研究任务独立的身份与凭据
//!
//! 每次任务构造一个新的 TaskContext，并显式传入所有 Provider 调用（search / read / embed / LLM），
//! 并发任务之间不共享任何可变状态。

use serde::{Deserialize, Serialize};

/// 单个任务可覆盖的凭据；为 None 时 Provider 使用自身配置的 key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCredentials {
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub search_api_key: Option<String>,
    pub reader_api_key: Option<String>,
    pub embedding_api_key: Option<String>,
}

/// 任务上下文：task_id 用于进度事件路由，credentials 用于 Provider 鉴权
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub credentials: TaskCredentials,
}

impl TaskContext {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: None,
            credentials: TaskCredentials::default(),
        }
    }

    /// 使用随机 UUID 作为 task_id
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_credentials(mut self, credentials: TaskCredentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// 在任务凭据与 Provider 默认 key 之间取值：任务级优先，空字符串视为未设置
pub fn pick_key(task_key: Option<&str>, fallback: Option<&str>) -> Option<String> {
    task_key
        .filter(|k| !k.trim().is_empty())
        .or(fallback.filter(|k| !k.trim().is_empty()))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_key_prefers_task() {
        assert_eq!(pick_key(Some("task"), Some("cfg")), Some("task".to_string()));
        assert_eq!(pick_key(Some("  "), Some("cfg")), Some("cfg".to_string()));
        assert_eq!(pick_key(None, None), None);
    }

    #[test]
    fn test_generate_unique_ids() {
        let a = TaskContext::generate();
        let b = TaskContext::generate();
        assert_ne!(a.task_id, b.task_id);
    }
}
