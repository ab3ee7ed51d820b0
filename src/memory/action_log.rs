//! 动作日志：已执行步骤的只追加记录，供外部观察
//!
//! 每步记录 {total_step, action, gaps}；think 记录附加在最近的条目之后。

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// 单条日志
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionEntry {
    Action {
        total_step: usize,
        action: String,
        think: String,
        gaps: Vec<String>,
    },
    Think {
        think: String,
    },
}

/// 任务级动作追踪器；克隆后共享同一份日志
#[derive(Clone, Debug, Default)]
pub struct ActionTracker {
    entries: Arc<Mutex<Vec<ActionEntry>>>,
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: ActionEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn track_action(&self, total_step: usize, action: &str, think: &str, gaps: &[String]) {
        tracing::debug!(total_step, action, "Action tracked");
        self.push(ActionEntry::Action {
            total_step,
            action: action.to_string(),
            think: think.to_string(),
            gaps: gaps.to_vec(),
        });
    }

    pub fn track_think(&self, think: impl Into<String>) {
        self.push(ActionEntry::Think {
            think: think.into(),
        });
    }

    /// 日志快照
    pub fn entries(&self) -> Vec<ActionEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 最近一次 think 内容（Action 或 Think 条目）
    pub fn last_think(&self) -> Option<String> {
        self.entries().into_iter().rev().find_map(|e| match e {
            ActionEntry::Action { think, .. } | ActionEntry::Think { think } => Some(think),
        })
    }
}
