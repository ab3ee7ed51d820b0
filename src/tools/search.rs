//! Web 搜索 Provider：Jina Search 与 Serper（Google）
//!
//! 统一返回 {title, url, description, date?}；URL 在这里不做规范化，由调用方写入注册表时处理。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::{pick_key, AgentError, TaskContext};

pub const JINA_SEARCH_URL: &str = "https://s.jina.ai/";
pub const SERPER_SEARCH_URL: &str = "https://google.serper.dev/search";

/// 一条搜索请求；tbs 为时间范围过滤（如 qdr:m）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tbs: Option<String>,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            tbs: None,
        }
    }
}

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// 一次查询的结果与 token 消耗
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub tokens: u64,
}

/// 搜索 Provider
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, ctx: &TaskContext, query: &SearchQuery)
        -> Result<SearchResponse, AgentError>;
}

fn http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

/// Jina Search（s.jina.ai）
pub struct JinaSearch {
    client: Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JinaSearchItem {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    description: String,
    date: Option<String>,
    #[serde(default)]
    usage: Option<JinaTokens>,
}

#[derive(Debug, Deserialize)]
struct JinaTokens {
    #[serde(default)]
    tokens: u64,
}

#[derive(Debug, Deserialize)]
struct JinaSearchBody {
    #[serde(default)]
    data: Vec<JinaSearchItem>,
}

impl JinaSearch {
    pub fn new(api_key: Option<&str>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            api_key: api_key
                .map(String::from)
                .or_else(|| std::env::var("JINA_API_KEY").ok()),
        }
    }
}

#[async_trait]
impl SearchProvider for JinaSearch {
    async fn search(
        &self,
        ctx: &TaskContext,
        query: &SearchQuery,
    ) -> Result<SearchResponse, AgentError> {
        let key = pick_key(ctx.credentials.search_api_key.as_deref(), self.api_key.as_deref())
            .ok_or_else(|| AgentError::Search("JINA_API_KEY not configured".into()))?;

        let resp = self
            .client
            .get(JINA_SEARCH_URL)
            .query(&[("q", query.q.as_str())])
            .bearer_auth(key)
            .header("Accept", "application/json")
            .header("X-Respond-With", "no-content")
            .send()
            .await
            .map_err(|e| AgentError::Search(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::Search(format!("HTTP {}", resp.status())));
        }
        let body: JinaSearchBody = resp
            .json()
            .await
            .map_err(|e| AgentError::Search(e.to_string()))?;

        let tokens = body
            .data
            .iter()
            .filter_map(|d| d.usage.as_ref())
            .map(|u| u.tokens)
            .sum();
        let results = body
            .data
            .into_iter()
            .map(|d| SearchResult {
                title: d.title,
                url: d.url,
                description: d.description,
                date: d.date,
            })
            .collect();
        Ok(SearchResponse { results, tokens })
    }
}

/// Serper（Google 搜索 API）
pub struct SerperSearch {
    client: Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerperBody {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

impl SerperSearch {
    pub fn new(api_key: Option<&str>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            api_key: api_key
                .map(String::from)
                .or_else(|| std::env::var("SERPER_API_KEY").ok()),
        }
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(
        &self,
        ctx: &TaskContext,
        query: &SearchQuery,
    ) -> Result<SearchResponse, AgentError> {
        let key = pick_key(ctx.credentials.search_api_key.as_deref(), self.api_key.as_deref())
            .ok_or_else(|| AgentError::Search("SERPER_API_KEY not configured".into()))?;

        let mut body = json!({ "q": query.q, "autocorrect": false });
        if let Some(tbs) = &query.tbs {
            body["tbs"] = json!(tbs);
        }
        let resp = self
            .client
            .post(SERPER_SEARCH_URL)
            .header("X-API-KEY", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Search(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::Search(format!("HTTP {}", resp.status())));
        }
        let body: SerperBody = resp
            .json()
            .await
            .map_err(|e| AgentError::Search(e.to_string()))?;
        let results = body
            .organic
            .into_iter()
            .map(|o| SearchResult {
                title: o.title,
                url: o.link,
                description: o.snippet,
                date: o.date,
            })
            .collect();
        Ok(SearchResponse { results, tokens: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serper_body_decodes() {
        let raw = r#"{"organic":[{"title":"Paris","link":"https://en.wikipedia.org/wiki/Paris","snippet":"Capital of France"}]}"#;
        let body: SerperBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.organic[0].link, "https://en.wikipedia.org/wiki/Paris");
        assert!(body.organic[0].date.is_none());
    }

    #[test]
    fn test_query_serializes_without_tbs() {
        let json = serde_json::to_string(&SearchQuery::new("rust")).unwrap();
        assert_eq!(json, r#"{"q":"rust"}"#);
    }
}
