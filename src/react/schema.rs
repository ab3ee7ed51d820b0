//! Schema 生成：根据当前许可位构造本步决策的 JSON Schema
//!
//! 只有被允许的动作出现在 action 枚举与属性中；visit 的下标被限制在当前可见 URL 列表范围内。
//! Beast Mode 使用只含 answer 的 schema。

use serde_json::{json, Map, Value};

use crate::core::{Permissions, MAX_QUERIES_PER_STEP, MAX_REFLECT_PER_STEP, MAX_URLS_PER_STEP};
use crate::llm::schema_of;
use crate::react::planner::{
    ActionKind, AnswerPayload, CodingPayload, ReflectPayload, SearchPayload, VisitPayload,
};

/// 按字符集粗略判断问题语言
pub fn detect_language(text: &str) -> &'static str {
    let mut han = 0;
    let mut kana = 0;
    let mut hangul = 0;
    let mut cyrillic = 0;
    for c in text.chars() {
        match c {
            '\u{3040}'..='\u{30ff}' => kana += 1,
            '\u{4e00}'..='\u{9fff}' => han += 1,
            '\u{ac00}'..='\u{d7af}' => hangul += 1,
            '\u{0400}'..='\u{04ff}' => cyrillic += 1,
            _ => {}
        }
    }
    if kana > 0 {
        "Japanese"
    } else if hangul > 0 {
        "Korean"
    } else if han > 0 {
        "Chinese"
    } else if cyrillic > 0 {
        "Russian"
    } else {
        "English"
    }
}

/// 决策 schema 生成器（持有问题语言）
#[derive(Debug, Clone)]
pub struct SchemaGen {
    language: &'static str,
}

impl SchemaGen {
    pub fn for_question(question: &str) -> Self {
        Self {
            language: detect_language(question),
        }
    }

    pub fn language(&self) -> &'static str {
        self.language
    }

    /// 去掉根级元信息，把 definitions 提升到外层
    fn embed(schema: Value, definitions: &mut Map<String, Value>) -> Value {
        let Value::Object(mut obj) = schema else {
            return schema;
        };
        obj.remove("$schema");
        obj.remove("title");
        if let Some(Value::Object(defs)) = obj.remove("definitions") {
            definitions.extend(defs);
        }
        Value::Object(obj)
    }

    fn payload_schema(&self, kind: ActionKind, url_count: usize, defs: &mut Map<String, Value>) -> Value {
        let lang = self.language;
        match kind {
            ActionKind::Search => {
                let mut s = Self::embed(schema_of::<SearchPayload>(), defs);
                s["properties"]["searchRequests"]["description"] = json!(format!(
                    "Required when action='search'. At most {} queries; each query is short keywords in {} or English, focused on one aspect.",
                    MAX_QUERIES_PER_STEP, lang
                ));
                s
            }
            ActionKind::Visit => {
                let mut s = Self::embed(schema_of::<VisitPayload>(), defs);
                s["properties"]["URLTargets"] = json!({
                    "type": "array",
                    "description": format!(
                        "Required when action='visit'. At most {} targets, each is the idx of a URL in the url list (1 to {}) or a full URL.",
                        MAX_URLS_PER_STEP, url_count
                    ),
                    "items": {
                        "anyOf": [
                            {"type": "integer", "minimum": 1, "maximum": url_count.max(1)},
                            {"type": "string"}
                        ]
                    }
                });
                s
            }
            ActionKind::Answer => {
                let mut s = Self::embed(schema_of::<AnswerPayload>(), defs);
                s["properties"]["answer"] = json!({
                    "description": format!(
                        "Required when action='answer'. A complete, definitive answer in {}, written as markdown plain text. \
                         Use footnote markers [^n] to cite references.",
                        lang
                    )
                });
                s
            }
            ActionKind::Reflect => {
                let mut s = Self::embed(schema_of::<ReflectPayload>(), defs);
                s["properties"]["questionsToAnswer"]["description"] = json!(format!(
                    "Required when action='reflect'. At most {} self-contained sub-questions in {} that close the knowledge gaps.",
                    MAX_REFLECT_PER_STEP, lang
                ));
                s
            }
            ActionKind::Coding => Self::embed(schema_of::<CodingPayload>(), defs),
        }
    }

    /// 本步决策 schema；url_count 为 prompt 中可见 URL 列表长度
    pub fn agent_schema(&self, permissions: &Permissions, url_count: usize) -> Value {
        let allowed: Vec<ActionKind> = permissions
            .allowed()
            .into_iter()
            .filter(|k| *k != ActionKind::Visit || url_count > 0)
            .collect();
        let allowed = if allowed.is_empty() {
            vec![ActionKind::Answer]
        } else {
            allowed
        };

        let mut definitions = Map::new();
        let mut properties = Map::new();
        properties.insert(
            "think".into(),
            json!({
                "type": "string",
                "description": format!("Concisely explain your reasoning for the chosen action, in {}.", self.language)
            }),
        );
        properties.insert(
            "action".into(),
            json!({
                "type": "string",
                "enum": allowed.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "description": "Choose exactly one action and fill in the matching field."
            }),
        );
        for kind in &allowed {
            let payload = self.payload_schema(*kind, url_count, &mut definitions);
            properties.insert(kind.as_str().into(), payload);
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "required": ["think", "action"]
        });
        if !definitions.is_empty() {
            schema["definitions"] = Value::Object(definitions);
        }
        schema
    }
}
