//! Token 预算：用量估算与按工具累计的预算追踪
//!
//! TokenTracker 记录每次 LLM / 读取 / 嵌入调用的 token 用量（只增不减），
//! 主循环以 ⌊budget × 0.85⌋ 为常规预算，剩余 15% 留给 Beast Mode。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// 常规循环可用的预算比例，其余留给最终强制回答
pub const REGULAR_BUDGET_RATIO: f64 = 0.85;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> u64 {
        let mut ascii_chars = 0u64;
        let mut non_ascii_chars = 0u64;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as u64;
        tokens.max(1)
    }

    /// 将文本截断到约 max_tokens 个 token，保留开头部分
    pub fn truncate(text: &str, max_tokens: u64) -> String {
        let estimated = Self::estimate(text);
        if estimated <= max_tokens {
            return text.to_string();
        }
        let ratio = max_tokens as f64 / estimated as f64;
        let target_chars = (text.chars().count() as f64 * ratio * 0.9) as usize;
        let truncated: String = text.chars().take(target_chars).collect();
        format!("{}...", truncated.trim_end())
    }
}

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    usages: Vec<(String, TokenUsage)>,
    total: TokenUsage,
}

/// 任务级 Token 追踪器；克隆后共享同一份计数
#[derive(Debug, Clone)]
pub struct TokenTracker {
    budget: u64,
    inner: Arc<Mutex<TrackerInner>>,
}

/// 用量汇总（任务结束时输出）
#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub budget: u64,
    pub total: TokenUsage,
    pub breakdown: BTreeMap<String, u64>,
}

impl TokenTracker {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            inner: Arc::new(Mutex::new(TrackerInner::default())),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// 常规循环预算：⌊budget × 0.85⌋
    pub fn regular_budget(&self) -> u64 {
        (self.budget as f64 * REGULAR_BUDGET_RATIO).floor() as u64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 记录某个工具（agent / evaluator / read / embed ...）的一次用量
    pub fn track_usage(&self, tool: &str, usage: TokenUsage) {
        let mut inner = self.lock();
        inner.total.accumulate(&usage);
        inner.usages.push((tool.to_string(), usage));
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.lock().total
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_usage().total_tokens
    }

    /// 是否仍在常规预算内（主循环条件）
    pub fn within_regular_budget(&self) -> bool {
        self.total_tokens() < self.regular_budget()
    }

    /// 预算使用百分比（用于日志）
    pub fn used_percentage(&self) -> f64 {
        if self.budget == 0 {
            return 100.0;
        }
        self.total_tokens() as f64 / self.budget as f64 * 100.0
    }

    /// 按工具名聚合的 total_tokens
    pub fn breakdown(&self) -> BTreeMap<String, u64> {
        let inner = self.lock();
        let mut out = BTreeMap::new();
        for (tool, usage) in &inner.usages {
            *out.entry(tool.clone()).or_insert(0) += usage.total_tokens;
        }
        out
    }

    pub fn summary(&self) -> TokenSummary {
        TokenSummary {
            budget: self.budget,
            total: self.total_usage(),
            breakdown: self.breakdown(),
        }
    }
}
