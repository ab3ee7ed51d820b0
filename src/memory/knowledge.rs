//! 知识库：研究过程中累积的证据条目
//!
//! 条目只追加不修改。发往 LLM 时按优先级（qa > url > side-info > coding）选出至多 15 条，
//! 每条展开为 user（问题）/ assistant（答案）消息对。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conversation::Message;
use crate::tools::markdown::remove_extra_line_breaks;

/// 展示给 LLM 的知识条目上限
pub const MAX_KNOWLEDGE_ITEMS: usize = 15;

/// 知识条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnowledgeKind {
    #[serde(rename = "qa")]
    Qa,
    #[serde(rename = "side-info")]
    SideInfo,
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "coding")]
    Coding,
}

impl KnowledgeKind {
    fn priority(self) -> u8 {
        match self {
            KnowledgeKind::Qa => 3,
            KnowledgeKind::Url => 2,
            KnowledgeKind::SideInfo => 1,
            KnowledgeKind::Coding => 0,
        }
    }
}

/// 答案引用
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact_quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f32>,
}

impl Reference {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// 知识条目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub question: String,
    pub answer: String,
    #[serde(rename = "type")]
    pub kind: KnowledgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

impl KnowledgeItem {
    pub fn new(question: impl Into<String>, answer: impl Into<String>, kind: KnowledgeKind) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            kind,
            updated: None,
            source_code: None,
            references: Vec::new(),
        }
    }

    pub fn qa(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self::new(question, answer, KnowledgeKind::Qa)
    }

    /// 附带当前时间戳
    pub fn stamped(mut self) -> Self {
        self.updated = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    pub fn with_updated(mut self, updated: Option<String>) -> Self {
        self.updated = updated;
        self
    }

    pub fn with_source_code(mut self, code: impl Into<String>) -> Self {
        self.source_code = Some(code.into());
        self
    }

    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }
}

/// 按优先级选出至多 MAX_KNOWLEDGE_ITEMS 条，同优先级保持原有顺序
pub fn select_knowledge(knowledge: &[KnowledgeItem]) -> Vec<&KnowledgeItem> {
    if knowledge.len() <= MAX_KNOWLEDGE_ITEMS {
        return knowledge.iter().collect();
    }
    let mut indexed: Vec<(usize, &KnowledgeItem)> = knowledge.iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        b.kind
            .priority()
            .cmp(&a.kind.priority())
            .then_with(|| ia.cmp(ib))
    });
    tracing::debug!(
        total = knowledge.len(),
        kept = MAX_KNOWLEDGE_ITEMS,
        "Knowledge exceeds limit, selecting by priority"
    );
    indexed
        .into_iter()
        .take(MAX_KNOWLEDGE_ITEMS)
        .map(|(_, k)| k)
        .collect()
}

/// 将知识条目展开为 user/assistant 消息对
pub fn build_msgs_from_knowledge<'a, I>(knowledge: I) -> Vec<Message>
where
    I: IntoIterator<Item = &'a KnowledgeItem>,
{
    let mut messages = Vec::new();
    for k in knowledge {
        messages.push(Message::user(k.question.trim()));

        let mut answer = String::new();
        if matches!(k.kind, KnowledgeKind::Url | KnowledgeKind::SideInfo) {
            if let Some(updated) = &k.updated {
                answer.push_str(&format!("<answer-datetime>\n{}\n</answer-datetime>\n\n", updated));
            }
        }
        if k.kind == KnowledgeKind::Url {
            if let Some(r) = k.references.first() {
                answer.push_str(&format!("<url>\n{}\n</url>\n\n", r.url));
            }
        }
        answer.push_str(&k.answer);
        messages.push(Message::assistant(remove_extra_line_breaks(answer.trim())));
    }
    messages
}

/// 组合发往 LLM 的消息：知识消息对 + 原始对话 + 当前问题（附带审阅者改进意见）
pub fn compose_msgs(
    messages: &[Message],
    knowledge: &[KnowledgeItem],
    question: &str,
    final_answer_pip: &[String],
) -> Vec<Message> {
    let mut msgs = build_msgs_from_knowledge(select_knowledge(knowledge));
    msgs.extend(messages.iter().cloned());

    let mut user_content = question.trim().to_string();
    if !final_answer_pip.is_empty() {
        user_content.push_str("\n\n<answer-requirements>\n");
        user_content.push_str("- You provide deep, unexpected insights, identifying hidden patterns and connections, and creating \"aha moments.\".\n");
        user_content.push_str("- You break conventional thinking, establish unique cross-disciplinary connections, and bring new perspectives to the user.\n");
        user_content.push_str("- Follow reviewer's feedback and improve your answer quality.\n");
        for (idx, plan) in final_answer_pip.iter().enumerate() {
            user_content.push_str(&format!(
                "<reviewer-{n}>\n{plan}\n</reviewer-{n}>\n",
                n = idx + 1,
                plan = plan
            ));
        }
        user_content.push_str("</answer-requirements>");
    }
    msgs.push(Message::user(remove_extra_line_breaks(&user_content)));
    msgs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    fn item(kind: KnowledgeKind, n: usize) -> KnowledgeItem {
        KnowledgeItem::new(format!("q{}", n), format!("a{}", n), kind)
    }

    #[test]
    fn test_select_keeps_all_under_limit() {
        let k: Vec<_> = (0..3).map(|i| item(KnowledgeKind::SideInfo, i)).collect();
        assert_eq!(select_knowledge(&k).len(), 3);
    }

    #[test]
    fn test_select_prioritizes_qa_then_url() {
        let mut k: Vec<_> = (0..14).map(|i| item(KnowledgeKind::SideInfo, i)).collect();
        k.push(item(KnowledgeKind::Url, 100));
        k.push(item(KnowledgeKind::Qa, 200));
        k.push(item(KnowledgeKind::Coding, 300));
        let selected = select_knowledge(&k);
        assert_eq!(selected.len(), MAX_KNOWLEDGE_ITEMS);
        assert_eq!(selected[0].question, "q200");
        assert_eq!(selected[1].question, "q100");
        assert_eq!(selected[2].question, "q0");
        assert!(selected.iter().all(|i| i.kind != KnowledgeKind::Coding));
    }

    #[test]
    fn test_url_knowledge_renders_url_tag() {
        let k = KnowledgeItem::new("What do expert say?", "page text", KnowledgeKind::Url)
            .with_references(vec![Reference::url("https://a.com/x")]);
        let msgs = build_msgs_from_knowledge([&k]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert!(msgs[1].content.contains("<url>\nhttps://a.com/x\n</url>"));
        assert!(msgs[1].content.ends_with("page text"));
    }

    #[test]
    fn test_compose_appends_question_with_pip() {
        let msgs = compose_msgs(
            &[Message::user("original")],
            &[KnowledgeItem::qa("sub", "ans")],
            "main question",
            &["be more specific".to_string()],
        );
        assert_eq!(msgs.len(), 4);
        let last = msgs.last().unwrap();
        assert!(last.content.starts_with("main question"));
        assert!(last.content.contains("<reviewer-1>\nbe more specific\n</reviewer-1>"));
    }

    #[test]
    fn test_knowledge_type_wire_names() {
        let json = serde_json::to_value(item(KnowledgeKind::SideInfo, 1)).unwrap();
        assert_eq!(json["type"], "side-info");
    }
}
