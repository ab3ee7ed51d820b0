//! 研究任务状态：每个任务独占一份 AgentState
//!
//! 任务开始时创建，只由主循环与各动作处理器修改，任务结束即丢弃；并发任务之间不共享。

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::memory::{KnowledgeItem, Message};
use crate::react::{ActionKind, StepAction};
use crate::tools::url::{add_to_all_urls, extract_urls_with_description};
use crate::tools::{BoostedSnippet, SearchSnippet};

/// 每步最多访问的 URL 数
pub const MAX_URLS_PER_STEP: usize = 5;
/// 每步最多执行的搜索查询数
pub const MAX_QUERIES_PER_STEP: usize = 5;
/// 每步最多新增的子问题数；gaps 超过该值时禁用 reflect
pub const MAX_REFLECT_PER_STEP: usize = 2;
/// 排序后的候选 URL 达到该数量时禁用 search
pub const SEARCH_SATURATION_URLS: usize = 50;
/// 每个主机名在排序结果中最多保留的 URL 数
pub const URLS_PER_HOSTNAME: usize = 2;
/// prompt 中展示的 URL 列表长度
pub const PROMPT_URL_LIST_SIZE: usize = 20;
/// 从消息中抽取 URL 时描述的上下文窗口（字符）
const MESSAGE_URL_CONTEXT: usize = 50;

/// 网页内容（引用构建的证据）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebContent {
    pub title: String,
    pub full: String,
    pub chunks: Vec<String>,
    pub chunk_positions: Vec<[usize; 2]>,
}

/// 答案评估维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationType {
    Definitive,
    Freshness,
    Plurality,
    Completeness,
    Strict,
}

impl EvaluationType {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationType::Definitive => "definitive",
            EvaluationType::Freshness => "freshness",
            EvaluationType::Plurality => "plurality",
            EvaluationType::Completeness => "completeness",
            EvaluationType::Strict => "strict",
        }
    }
}

/// 某个问题的一个评估维度及其剩余重试次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationMetric {
    pub kind: EvaluationType,
    pub num_evals_required: u32,
}

/// 动作许可位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub answer: bool,
    pub search: bool,
    pub read: bool,
    pub reflect: bool,
    pub coding: bool,
}

impl Permissions {
    /// 任务开始时：coding 关闭，其余开启
    pub fn initial() -> Self {
        Self {
            coding: false,
            ..Self::all()
        }
    }

    pub fn all() -> Self {
        Self {
            answer: true,
            search: true,
            read: true,
            reflect: true,
            coding: true,
        }
    }

    /// Beast Mode：只允许 answer
    pub fn answer_only() -> Self {
        Self {
            answer: true,
            search: false,
            read: false,
            reflect: false,
            coding: false,
        }
    }

    pub fn allows(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Search => self.search,
            ActionKind::Visit => self.read,
            ActionKind::Answer => self.answer,
            ActionKind::Reflect => self.reflect,
            ActionKind::Coding => self.coding,
        }
    }

    /// 当前允许的动作（固定顺序）
    pub fn allowed(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| self.allows(*k))
            .collect()
    }
}

/// 已执行步骤的记录
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub total_step: usize,
    pub question: String,
    pub action: StepAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// 单个研究任务的全部可变状态
#[derive(Debug, Clone)]
pub struct AgentState {
    pub question: String,
    pub messages: Vec<Message>,
    /// 当前反思周期内的步数（评估失败后归零）
    pub step: usize,
    pub total_step: usize,
    pub gaps: Vec<String>,
    pub all_questions: Vec<String>,
    /// 实际执行过的搜索查询
    pub all_keywords: Vec<String>,
    pub knowledge: Vec<KnowledgeItem>,
    pub diary: Vec<String>,
    pub permissions: Permissions,
    /// 规范化 URL → 条目
    pub all_urls: HashMap<String, SearchSnippet>,
    pub weighted_urls: Vec<BoostedSnippet>,
    pub web_contents: HashMap<String, WebContent>,
    pub visited_urls: Vec<String>,
    pub bad_urls: Vec<String>,
    pub evaluation_metrics: HashMap<String, Vec<EvaluationMetric>>,
    pub final_answer_pip: Vec<String>,
    pub trivial_question: bool,
    pub all_context: Vec<StepRecord>,
    pub this_step: Option<StepAction>,
    /// 文本 → 嵌入向量，URL 排序时复用
    pub embedding_cache: HashMap<String, Vec<f32>>,
}

impl AgentState {
    /// 以问题播种 gaps / all_questions，并把对话中出现的 URL 写入注册表
    pub fn new(question: impl Into<String>, messages: Vec<Message>) -> Self {
        let question = question.into().trim().to_string();
        let mut all_urls = HashMap::new();
        for m in &messages {
            for snippet in extract_urls_with_description(m.content.trim(), MESSAGE_URL_CONTEXT) {
                add_to_all_urls(snippet, &mut all_urls);
            }
        }
        Self {
            gaps: vec![question.clone()],
            all_questions: vec![question.clone()],
            question,
            messages,
            step: 0,
            total_step: 0,
            all_keywords: Vec::new(),
            knowledge: Vec::new(),
            diary: Vec::new(),
            permissions: Permissions::initial(),
            all_urls,
            weighted_urls: Vec::new(),
            web_contents: HashMap::new(),
            visited_urls: Vec::new(),
            bad_urls: Vec::new(),
            evaluation_metrics: HashMap::new(),
            final_answer_pip: Vec::new(),
            trivial_question: false,
            all_context: Vec::new(),
            this_step: None,
            embedding_cache: HashMap::new(),
        }
    }

    /// 轮询 gaps：gaps[total_step % len]
    pub fn current_question(&self) -> String {
        if self.gaps.is_empty() {
            return self.question.clone();
        }
        self.gaps[self.total_step % self.gaps.len()].clone()
    }

    pub fn is_original_question(&self, question: &str) -> bool {
        question.trim() == self.question
    }

    pub fn remove_gap(&mut self, question: &str) {
        if let Some(idx) = self.gaps.iter().position(|g| g == question) {
            self.gaps.remove(idx);
        }
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited_urls.iter().any(|u| u == url)
    }

    /// 访问过的 URL 只记录一次
    pub fn mark_visited(&mut self, url: &str) {
        if !self.is_visited(url) {
            self.visited_urls.push(url.to_string());
        }
    }

    pub fn mark_bad(&mut self, url: &str) {
        if !self.bad_urls.iter().any(|u| u == url) {
            self.bad_urls.push(url.to_string());
        }
    }

    /// 成功读取的 URL = visited - bad
    pub fn read_urls(&self) -> Vec<String> {
        self.visited_urls
            .iter()
            .filter(|u| !self.bad_urls.contains(u))
            .cloned()
            .collect()
    }

    pub fn record_step(&mut self, question: &str, action: StepAction, result: Option<String>) {
        self.all_context.push(StepRecord {
            total_step: self.total_step,
            question: question.to_string(),
            action,
            result,
        });
    }
}
