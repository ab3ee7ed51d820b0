//! 结构化生成：让 LLM 按 JSON Schema 输出对象
//!
//! Schema 注入到 system prompt 末尾；从回复中提取 JSON（```json 代码块或首尾花括号之间），
//! 再按 schema 校验必填字段、类型与枚举。不合规时把错误反馈给模型重试，重试耗尽后显式返回错误，
//! 绝不静默返回空对象。每次调用的 token 用量按工具名记入 TokenTracker（提供方未报告时估算）。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::core::{AgentError, TaskContext};
use crate::llm::{ToolModels, ToolName};
use crate::memory::{Message, TokenEstimator, TokenTracker, TokenUsage};

/// 结构化生成的默认重试次数（不含首次）
pub const DEFAULT_NUM_RETRIES: usize = 2;

/// 由类型生成 JSON Schema（schemars）
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}))
}

/// 从 LLM 输出中提取 JSON 文本
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with("```") {
        let rest = trimmed.trim_start_matches('`');
        let rest = rest.find('\n').map(|i| &rest[i + 1..]).unwrap_or(rest);
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let path = reference.strip_prefix("#/")?;
    path.split('/').try_fold(root, |node, key| node.get(key))
}

fn type_matches(value: &Value, ty: &str) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check(value: &Value, schema: &Value, root: &Value, path: &str) -> Result<(), String> {
    let Some(obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        let target = resolve_ref(root, reference)
            .ok_or_else(|| format!("{}: unresolved reference {}", path, reference))?;
        return check(value, target, root, path);
    }

    if let Some(all) = obj.get("allOf").and_then(Value::as_array) {
        for s in all {
            check(value, s, root, path)?;
        }
    }
    for key in ["anyOf", "oneOf"] {
        if let Some(alts) = obj.get(key).and_then(Value::as_array) {
            if !alts.iter().any(|s| check(value, s, root, path).is_ok()) {
                return Err(format!("{}: value does not match any allowed variant", path));
            }
        }
    }

    if let Some(allowed) = obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!(
                "{}: {} is not one of {}",
                path,
                value,
                Value::Array(allowed.clone())
            ));
        }
    }

    if let Some(ty) = obj.get("type") {
        let types: Vec<&str> = match ty {
            Value::String(s) => vec![s.as_str()],
            Value::Array(a) => a.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !types.is_empty() && !types.iter().any(|t| type_matches(value, t)) {
            return Err(format!(
                "{}: expected {}, got {}",
                path,
                types.join(" | "),
                type_name(value)
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = obj.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{}: {} is below the minimum {}", path, n, min));
            }
        }
        if let Some(max) = obj.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{}: {} is above the maximum {}", path, n, max));
            }
        }
    }

    match value {
        Value::Object(map) => {
            if let Some(required) = obj.get("required").and_then(Value::as_array) {
                for field in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(field) {
                        return Err(format!("{}: missing required field '{}'", path, field));
                    }
                }
            }
            if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                for (key, sub) in props {
                    if let Some(v) = map.get(key) {
                        check(v, sub, root, &format!("{}.{}", path, key))?;
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = obj.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item, item_schema, root, &format!("{}[{}]", path, i))?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// 按 schema 校验一个 JSON 值（支持 $ref / allOf / anyOf / oneOf / enum / type / minimum / maximum / required / properties / items）
pub fn validate_against_schema(value: &Value, schema: &Value) -> Result<(), AgentError> {
    check(value, schema, schema, "$").map_err(AgentError::SchemaViolation)
}

/// 结构化对象生成器：工具 → 模型映射 + 任务级 token 追踪
#[derive(Clone)]
pub struct ObjectGenerator {
    models: ToolModels,
    tracker: TokenTracker,
}

impl ObjectGenerator {
    pub fn new(models: ToolModels, tracker: TokenTracker) -> Self {
        Self { models, tracker }
    }

    pub fn tracker(&self) -> &TokenTracker {
        &self.tracker
    }

    fn track(&self, tool: ToolName, messages: &[Message], content: &str, usage: TokenUsage) {
        let usage = if usage.total_tokens == 0 {
            let prompt: u64 = messages.iter().map(|m| TokenEstimator::estimate(&m.content)).sum();
            TokenUsage::new(prompt, TokenEstimator::estimate(content))
        } else {
            usage
        };
        self.tracker.track_usage(tool.as_str(), usage);
    }

    /// 纯文本完成（md_fixer / broken_ch_fixer 等）
    pub async fn complete_text(
        &self,
        ctx: &TaskContext,
        tool: ToolName,
        messages: &[Message],
    ) -> Result<String, AgentError> {
        let completion = self.models.get(tool).complete(ctx, messages).await?;
        self.track(tool, messages, &completion.content, completion.usage);
        Ok(completion.content)
    }

    /// 生成符合 schema 的 JSON 值；失败时带错误反馈重试 num_retries 次
    pub async fn generate_value(
        &self,
        ctx: &TaskContext,
        tool: ToolName,
        schema: &Value,
        system: &str,
        messages: &[Message],
        num_retries: usize,
    ) -> Result<Value, AgentError> {
        let schema_text = serde_json::to_string_pretty(schema)
            .map_err(|e| AgentError::SchemaViolation(e.to_string()))?;
        let system = format!(
            "{}\n\nYou must respond with a single JSON object that conforms to the following JSON Schema. \
             Do not add any text outside the JSON.\n```json\n{}\n```",
            system, schema_text
        );

        let mut convo = Vec::with_capacity(messages.len() + 3);
        convo.push(Message::system(system));
        convo.extend_from_slice(messages);

        let llm = self.models.get(tool);
        let mut last_err = AgentError::SchemaViolation("no attempt made".into());
        for attempt in 0..=num_retries {
            let completion = match llm.complete(ctx, &convo).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(tool = %tool, attempt, error = %e, "Structured generation call failed");
                    last_err = e;
                    continue;
                }
            };
            self.track(tool, &convo, &completion.content, completion.usage);

            let parsed = extract_json(&completion.content)
                .ok_or_else(|| AgentError::JsonParseError("no JSON object in response".into()))
                .and_then(|text| {
                    serde_json::from_str::<Value>(text)
                        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, text)))
                })
                .and_then(|value| validate_against_schema(&value, schema).map(|_| value));

            match parsed {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(tool = %tool, attempt, error = %e, "Structured output rejected");
                    convo.push(Message::assistant(completion.content));
                    convo.push(Message::user(format!(
                        "Your previous response was invalid: {}. Respond again with only the JSON object matching the schema.",
                        e
                    )));
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// 按类型生成：schema 由 schemars 推导，结果反序列化为 T
    pub async fn generate<T>(
        &self,
        ctx: &TaskContext,
        tool: ToolName,
        system: &str,
        messages: &[Message],
    ) -> Result<T, AgentError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = schema_of::<T>();
        let value = self
            .generate_value(ctx, tool, &schema, system, messages, DEFAULT_NUM_RETRIES)
            .await?;
        serde_json::from_value(value).map_err(|e| AgentError::SchemaViolation(e.to_string()))
    }
}
