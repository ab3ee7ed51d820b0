//! 嵌入 API：查询去重与引用匹配共用
//!
//! OpenAiEmbedder 调用 OpenAI 兼容 /embeddings 端点，JinaEmbedder 调用 Jina Embeddings HTTP API。
//! 两者都按输入顺序返回向量，并报告本次消耗的 token。

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::{pick_key, AgentError, TaskContext};

pub const JINA_EMBEDDINGS_URL: &str = "https://api.jina.ai/v1/embeddings";
pub const JINA_EMBEDDING_MODEL: &str = "jina-embeddings-v3";

/// 一批文本的嵌入结果（与输入等长、同序）
#[derive(Debug, Clone, Default)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    pub tokens: u64,
}

/// 嵌入提供方
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, ctx: &TaskContext, texts: &[String]) -> Result<Embeddings, AgentError>;
}

/// 余弦相似度；长度不一致或零向量返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    base_url: Option<String>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            base_url: base_url.map(String::from),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, ctx: &TaskContext, texts: &[String]) -> Result<Embeddings, AgentError> {
        if texts.is_empty() {
            return Ok(Embeddings::default());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| AgentError::Embedding(e.to_string()))?;

        let scoped = pick_key(ctx.credentials.embedding_api_key.as_deref(), None).map(|key| {
            let config = match self.base_url.as_deref() {
                Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(key),
                None => OpenAIConfig::new().with_api_key(key),
            };
            Client::with_config(config)
        });
        let client = scoped.as_ref().unwrap_or(&self.client);

        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        Ok(Embeddings {
            vectors: data.into_iter().map(|e| e.embedding).collect(),
            tokens: response.usage.total_tokens as u64,
        })
    }
}

#[derive(Debug, Deserialize)]
struct JinaEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct JinaUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct JinaEmbeddingResponse {
    data: Vec<JinaEmbeddingItem>,
    #[serde(default)]
    usage: JinaUsage,
}

/// Jina Embeddings API（text-matching 任务）
pub struct JinaEmbedder {
    http: reqwest::Client,
    model: String,
    api_key: Option<String>,
}

impl JinaEmbedder {
    pub fn new(model: Option<&str>, api_key: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            model: model.unwrap_or(JINA_EMBEDDING_MODEL).to_string(),
            api_key: api_key
                .map(String::from)
                .or_else(|| std::env::var("JINA_API_KEY").ok()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for JinaEmbedder {
    async fn embed(&self, ctx: &TaskContext, texts: &[String]) -> Result<Embeddings, AgentError> {
        if texts.is_empty() {
            return Ok(Embeddings::default());
        }
        let key = pick_key(
            ctx.credentials.embedding_api_key.as_deref(),
            self.api_key.as_deref(),
        )
        .ok_or_else(|| AgentError::Embedding("JINA_API_KEY not configured".into()))?;

        let body = json!({
            "model": self.model,
            "task": "text-matching",
            "late_chunking": false,
            "embedding_type": "float",
            "input": texts,
        });
        let resp = self
            .http
            .post(JINA_EMBEDDINGS_URL)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::Embedding(format!("HTTP {}", resp.status())));
        }
        let mut parsed: JinaEmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(AgentError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|e| e.index);
        Ok(Embeddings {
            vectors: parsed.data.into_iter().map(|e| e.embedding).collect(),
            tokens: parsed.usage.total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_jina_response_decodes_out_of_order() {
        let raw = r#"{"data":[{"index":1,"embedding":[0.5]},{"index":0,"embedding":[0.1]}],"usage":{"total_tokens":7}}"#;
        let mut parsed: JinaEmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|e| e.index);
        assert_eq!(parsed.data[0].embedding, vec![0.1]);
        assert_eq!(parsed.usage.total_tokens, 7);
    }
}
