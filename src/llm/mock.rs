//! Mock Provider（用于测试，无需 API）
//!
//! ScriptedLlmClient 按顺序返回预置回复（耗尽后重复最后一条），MockEmbedder 用词袋哈希生成确定性向量，
//! MockSearch / MockReader 从内存表取结果，RecordingPublisher 记录所有进度事件。

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::{AgentError, TaskContext};
use crate::llm::{Completion, Embeddings, EmbeddingProvider, LlmClient};
use crate::memory::{Message, TokenEstimator, TokenUsage};
use crate::react::{ProgressPublisher, ResearchEvent};
use crate::tools::{PageReader, ReadResult, SearchProvider, SearchQuery, SearchResponse, SearchResult};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 脚本化 LLM：依次返回预置内容，最后一条会被重复使用
#[derive(Debug)]
pub struct ScriptedLlmClient {
    name: String,
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
    fail: bool,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<impl Into<String>>) -> Self {
        Self::named("mock", responses)
    }

    pub fn named(name: impl Into<String>, responses: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// 每次调用都返回 LLM 错误
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::named("failing", Vec::<String>::new())
        }
    }

    /// 已收到的调用（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        _ctx: &TaskContext,
        messages: &[Message],
    ) -> Result<Completion, AgentError> {
        lock(&self.calls).push(messages.to_vec());
        if self.fail {
            return Err(AgentError::Llm(format!("{}: scripted failure", self.name)));
        }

        let content = {
            let mut queue = lock(&self.responses);
            match queue.len() {
                0 => return Err(AgentError::Llm(format!("{}: no scripted response", self.name))),
                1 => queue.front().cloned().unwrap_or_default(),
                _ => queue.pop_front().unwrap_or_default(),
            }
        };

        let prompt: u64 = messages.iter().map(|m| TokenEstimator::estimate(&m.content)).sum();
        let completion = TokenEstimator::estimate(&content);
        Ok(Completion::new(content, TokenUsage::new(prompt, completion)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

const MOCK_DIMENSIONS: usize = 256;
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "for", "to", "and", "or", "is", "are", "was", "what", "which",
    "who", "how", "does", "do", "with", "by", "at", "from",
];

/// 词袋嵌入：小写分词、去停用词、按词哈希到固定维度。
/// 词集合相同的文本得到相同向量（"capital of France" 与 "France capital" 余弦为 1）。
#[derive(Debug, Default)]
pub struct MockEmbedder {
    fail: bool,
    calls: Mutex<usize>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *lock(&self.calls)
    }

    pub fn vectorize(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; MOCK_DIMENSIONS];
        let words: HashSet<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .collect();
        for word in words {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() as usize) % MOCK_DIMENSIONS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, _ctx: &TaskContext, texts: &[String]) -> Result<Embeddings, AgentError> {
        *lock(&self.calls) += 1;
        if self.fail {
            return Err(AgentError::Embedding("mock embedder failure".into()));
        }
        Ok(Embeddings {
            vectors: texts.iter().map(|t| Self::vectorize(t)).collect(),
            tokens: texts.iter().map(|t| TokenEstimator::estimate(t)).sum(),
        })
    }
}

/// 内存搜索：按查询文本精确匹配，未登记的查询返回 fallback（默认空）
#[derive(Debug, Default)]
pub struct MockSearch {
    results: HashMap<String, Vec<SearchResult>>,
    fallback: Vec<SearchResult>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, query: impl Into<String>, results: Vec<SearchResult>) -> Self {
        self.results.insert(query.into(), results);
        self
    }

    pub fn with_fallback(mut self, results: Vec<SearchResult>) -> Self {
        self.fallback = results;
        self
    }

    /// 实际执行过的查询（含 site: 后缀）
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(
        &self,
        _ctx: &TaskContext,
        query: &SearchQuery,
    ) -> Result<SearchResponse, AgentError> {
        lock(&self.queries).push(query.q.clone());
        let results = self
            .results
            .get(&query.q)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(SearchResponse { results, tokens: 0 })
    }
}

/// 内存网页读取：未登记的 URL 读取失败
#[derive(Debug, Default)]
pub struct MockReader {
    pages: HashMap<String, (String, String)>,
    reads: Mutex<Vec<String>>,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(
        mut self,
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.pages.insert(url.into(), (title.into(), content.into()));
        self
    }

    pub fn reads(&self) -> Vec<String> {
        lock(&self.reads).clone()
    }
}

#[async_trait]
impl PageReader for MockReader {
    async fn read(&self, _ctx: &TaskContext, url: &str) -> Result<ReadResult, AgentError> {
        lock(&self.reads).push(url.to_string());
        let (title, content) = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| AgentError::Read(format!("no mock page for {}", url)))?;
        Ok(ReadResult {
            tokens: TokenEstimator::estimate(&content),
            title,
            url: url.to_string(),
            content,
        })
    }
}

/// 记录所有进度事件
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, ResearchEvent)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, ResearchEvent)> {
        lock(&self.events).clone()
    }

    /// 事件类型序列（think / error / complete ...）
    pub fn kinds(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(|(_, e)| e.kind()).collect()
    }
}

impl ProgressPublisher for RecordingPublisher {
    fn publish(&self, task_id: &str, event: ResearchEvent) -> Result<(), AgentError> {
        lock(&self.events).push((task_id.to_string(), event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::cosine_similarity;

    #[tokio::test]
    async fn test_scripted_repeats_last() {
        let client = ScriptedLlmClient::new(vec!["one", "two"]);
        let ctx = TaskContext::new("t");
        let msgs = vec![Message::user("hi")];
        assert_eq!(client.complete(&ctx, &msgs).await.unwrap().content, "one");
        assert_eq!(client.complete(&ctx, &msgs).await.unwrap().content, "two");
        assert_eq!(client.complete(&ctx, &msgs).await.unwrap().content, "two");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_usage_is_nonzero() {
        let client = ScriptedLlmClient::new(vec!["answer text"]);
        let out = client
            .complete(&TaskContext::new("t"), &[Message::user("question")])
            .await
            .unwrap();
        assert!(out.usage.total_tokens > 0);
    }

    #[test]
    fn test_bag_of_words_ignores_order_and_stopwords() {
        let a = MockEmbedder::vectorize("capital of France");
        let b = MockEmbedder::vectorize("France capital");
        let c = MockEmbedder::vectorize("population of Germany");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c) < 0.86);
    }

    #[tokio::test]
    async fn test_mock_reader_unknown_url_fails() {
        let reader = MockReader::new().with_page("https://a.com/", "A", "content");
        let ctx = TaskContext::new("t");
        assert!(reader.read(&ctx, "https://a.com/").await.is_ok());
        assert!(reader.read(&ctx, "https://b.com/").await.is_err());
        assert_eq!(reader.reads().len(), 2);
    }
}
