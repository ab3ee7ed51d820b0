//! 动作决策：StepAction 类型与结构化输出解码
//!
//! LLM 输出形如 {"action": "search", "think": "...", "search": {"searchRequests": [...]}}；
//! decode_step_action 按判别值取对应负载并解码为强类型动作，未知判别值与缺失负载都返回类型化错误。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::memory::Reference;

/// 动作判别值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Search,
    Visit,
    Answer,
    Reflect,
    Coding,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Search,
        ActionKind::Visit,
        ActionKind::Answer,
        ActionKind::Reflect,
        ActionKind::Coding,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Search => "search",
            ActionKind::Visit => "visit",
            ActionKind::Answer => "answer",
            ActionKind::Reflect => "reflect",
            ActionKind::Coding => "coding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// 访问目标：排序列表中的 1 起始下标，或字面 URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum UrlTarget {
    Index(usize),
    Url(String),
}

/// search 负载
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchPayload {
    /// Search queries, each focused on one aspect of the question. Prefer a single query.
    #[serde(rename = "searchRequests")]
    pub search_requests: Vec<String>,
}

/// visit 负载
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct VisitPayload {
    /// URLs to read: either the idx number from the URL list or a full URL
    #[serde(rename = "URLTargets")]
    pub url_targets: Vec<UrlTarget>,
}

/// answer 负载
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnswerPayload {
    /// The final answer in markdown, written in the same language as the question
    pub answer: Value,
    /// Evidence supporting the answer
    #[serde(default)]
    pub references: Vec<Reference>,
}

/// reflect 负载
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReflectPayload {
    /// Clarifying sub-questions that must be answered before the original question
    #[serde(rename = "questionsToAnswer")]
    pub questions_to_answer: Vec<String>,
}

/// coding 负载
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CodingPayload {
    /// The programming problem to solve, with concrete input values
    #[serde(rename = "codingIssue")]
    pub coding_issue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchAction {
    pub think: String,
    pub search_requests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitAction {
    pub think: String,
    pub url_targets: Vec<UrlTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnswerAction {
    pub think: String,
    pub answer: String,
    pub references: Vec<Reference>,
    pub is_final: bool,
    /// 后处理后的 Markdown（含脚注）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md_answer: Option<String>,
}

impl AnswerAction {
    pub fn new(answer: impl Into<String>, think: impl Into<String>) -> Self {
        Self {
            think: think.into(),
            answer: answer.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectAction {
    pub think: String,
    pub questions_to_answer: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodingAction {
    pub think: String,
    pub coding_issue: String,
}

/// 单步动作（同一时刻只有一个变体生效）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StepAction {
    Search(SearchAction),
    Visit(VisitAction),
    Answer(AnswerAction),
    Reflect(ReflectAction),
    Coding(CodingAction),
}

impl StepAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            StepAction::Search(_) => ActionKind::Search,
            StepAction::Visit(_) => ActionKind::Visit,
            StepAction::Answer(_) => ActionKind::Answer,
            StepAction::Reflect(_) => ActionKind::Reflect,
            StepAction::Coding(_) => ActionKind::Coding,
        }
    }

    pub fn think(&self) -> &str {
        match self {
            StepAction::Search(a) => &a.think,
            StepAction::Visit(a) => &a.think,
            StepAction::Answer(a) => &a.think,
            StepAction::Reflect(a) => &a.think,
            StepAction::Coding(a) => &a.think,
        }
    }
}

/// 把任意 JSON 值压成纯文本；对象按数字键升序、其余键字典序拼接
pub fn coerce_to_plain_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(coerce_to_plain_text).collect(),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => a.cmp(b),
            });
            keys.into_iter().map(|k| coerce_to_plain_text(&map[k])).collect()
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(object: &Value, kind: ActionKind) -> Result<T, AgentError> {
    let raw = object.get(kind.as_str()).ok_or_else(|| AgentError::MissingPayload {
        action: kind.as_str().to_string(),
        reason: format!("no '{}' field", kind.as_str()),
    })?;
    serde_json::from_value(raw.clone()).map_err(|e| AgentError::MissingPayload {
        action: kind.as_str().to_string(),
        reason: e.to_string(),
    })
}

/// 解码 LLM 的结构化决策
pub fn decode_step_action(object: &Value) -> Result<StepAction, AgentError> {
    let action = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::SchemaViolation("missing 'action' discriminant".into()))?;
    let kind = ActionKind::parse(action).ok_or_else(|| AgentError::UnknownAction(action.to_string()))?;
    let think = object
        .get("think")
        .map(coerce_to_plain_text)
        .unwrap_or_default();

    Ok(match kind {
        ActionKind::Search => {
            let p: SearchPayload = payload(object, kind)?;
            StepAction::Search(SearchAction {
                think,
                search_requests: p.search_requests,
            })
        }
        ActionKind::Visit => {
            let p: VisitPayload = payload(object, kind)?;
            StepAction::Visit(VisitAction {
                think,
                url_targets: p.url_targets,
            })
        }
        ActionKind::Answer => {
            let p: AnswerPayload = payload(object, kind)?;
            StepAction::Answer(AnswerAction {
                think,
                answer: coerce_to_plain_text(&p.answer).trim().to_string(),
                references: p.references,
                is_final: false,
                md_answer: None,
            })
        }
        ActionKind::Reflect => {
            let p: ReflectPayload = payload(object, kind)?;
            StepAction::Reflect(ReflectAction {
                think,
                questions_to_answer: p.questions_to_answer,
            })
        }
        ActionKind::Coding => {
            let p: CodingPayload = payload(object, kind)?;
            StepAction::Coding(CodingAction {
                think,
                coding_issue: p.coding_issue,
            })
        }
    })
}
