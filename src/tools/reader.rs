//! 网页读取 Provider：Jina Reader 与直接 HTTP 抓取
//!
//! HttpReader 对 HTML 响应使用 html2text 提取可读文本，去除标签与脚本；
//! 响应超过 max_result_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, LAST_MODIFIED};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::{pick_key, AgentError, TaskContext};
use crate::memory::TokenEstimator;

pub const JINA_READER_URL: &str = "https://r.jina.ai/";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 读取结果
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub title: String,
    pub url: String,
    pub content: String,
    /// 本次读取计入预算的 token
    pub tokens: u64,
}

/// 网页读取 Provider
#[async_trait]
pub trait PageReader: Send + Sync {
    async fn read(&self, ctx: &TaskContext, url: &str) -> Result<ReadResult, AgentError>;

    /// 页面的 Last-Modified 时间（引用补全 dateTime 用）；未知时返回 None
    async fn last_modified(&self, _ctx: &TaskContext, _url: &str) -> Option<String> {
        None
    }
}

fn validate_url(url: &str) -> Result<(), AgentError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(AgentError::Read("URL cannot be empty".into()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AgentError::Read(
            "Invalid URL, only http and https URLs are supported".into(),
        ));
    }
    Ok(())
}

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

async fn head_last_modified(client: &Client, url: &str) -> Option<String> {
    let resp = client.head(url).send().await.ok()?;
    let raw = resp.headers().get(LAST_MODIFIED)?.to_str().ok()?;
    chrono::DateTime::parse_from_rfc2822(raw)
        .map(|d| d.to_rfc3339())
        .ok()
        .or_else(|| Some(raw.to_string()))
}

fn status_error(status: reqwest::StatusCode) -> AgentError {
    match status.as_u16() {
        402 => AgentError::Read("Insufficient balance (HTTP 402)".into()),
        403 => AgentError::Read("Access denied (HTTP 403)".into()),
        429 => AgentError::Read("Too many requests (HTTP 429)".into()),
        503 => AgentError::Read("Site temporarily unavailable (HTTP 503)".into()),
        _ => AgentError::Read(format!("HTTP {}", status)),
    }
}

#[derive(Debug, Deserialize)]
struct JinaReadUsage {
    #[serde(default)]
    tokens: u64,
}

#[derive(Debug, Deserialize)]
struct JinaReadData {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    usage: Option<JinaReadUsage>,
}

#[derive(Debug, Deserialize)]
struct JinaReadBody {
    data: Option<JinaReadData>,
}

/// Jina Reader（r.jina.ai）
pub struct JinaReader {
    client: Client,
    api_key: Option<String>,
}

impl JinaReader {
    pub fn new(api_key: Option<&str>, timeout_secs: u64) -> Self {
        Self {
            client: build_client(timeout_secs),
            api_key: api_key
                .map(String::from)
                .or_else(|| std::env::var("JINA_API_KEY").ok()),
        }
    }
}

#[async_trait]
impl PageReader for JinaReader {
    async fn read(&self, ctx: &TaskContext, url: &str) -> Result<ReadResult, AgentError> {
        validate_url(url)?;
        let key = pick_key(ctx.credentials.reader_api_key.as_deref(), self.api_key.as_deref())
            .ok_or_else(|| AgentError::Read("JINA_API_KEY not configured".into()))?;

        let resp = self
            .client
            .post(JINA_READER_URL)
            .bearer_auth(key)
            .header(ACCEPT, "application/json")
            .header("X-Retain-Images", "none")
            .header("X-Md-Link-Style", "discarded")
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|e| AgentError::Read(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status()));
        }
        let body: JinaReadBody = resp
            .json()
            .await
            .map_err(|e| AgentError::Read(e.to_string()))?;
        let data = body
            .data
            .ok_or_else(|| AgentError::Read("Invalid response data".into()))?;

        tracing::debug!(url = %data.url, title = %data.title, "Jina read");
        Ok(ReadResult {
            tokens: data.usage.map(|u| u.tokens).unwrap_or(0),
            title: data.title,
            url: if data.url.is_empty() { url.to_string() } else { data.url },
            content: data.content,
        })
    }

    async fn last_modified(&self, _ctx: &TaskContext, url: &str) -> Option<String> {
        head_last_modified(&self.client, url).await
    }
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.to_ascii_lowercase().starts_with("<html")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<meta") || s.contains("<head")))
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html[open_end..close].trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// 直接 GET 页面并提取正文
pub struct HttpReader {
    client: Client,
    max_result_chars: usize,
}

impl HttpReader {
    pub fn new(timeout_secs: u64, max_result_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers({
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    ACCEPT,
                    reqwest::header::HeaderValue::from_static(
                        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                    ),
                );
                h.insert(
                    ACCEPT_LANGUAGE,
                    reqwest::header::HeaderValue::from_static("en,zh-CN;q=0.9,zh;q=0.8"),
                );
                h
            })
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_result_chars,
        }
    }

    fn html_to_text(html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }
}

#[async_trait]
impl PageReader for HttpReader {
    async fn read(&self, _ctx: &TaskContext, url: &str) -> Result<ReadResult, AgentError> {
        validate_url(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::Read(format!("Request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status()));
        }
        let mut body = resp
            .text()
            .await
            .map_err(|e| AgentError::Read(format!("Read body: {}", e)))?;

        // 去除 BOM，避免 HTML 检测失败
        if body.starts_with('\u{FEFF}') {
            body = body['\u{FEFF}'.len_utf8()..].to_string();
        }

        let (title, text) = if looks_like_html(&body) {
            (extract_title(&body).unwrap_or_default(), Self::html_to_text(&body))
        } else {
            (String::new(), body)
        };

        let text = if text.chars().count() > self.max_result_chars {
            text.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            text
        };
        if text.trim().is_empty() {
            return Err(AgentError::Read("Empty page content".into()));
        }

        Ok(ReadResult {
            tokens: TokenEstimator::estimate(&text),
            title,
            url: url.to_string(),
            content: text,
        })
    }

    async fn last_modified(&self, _ctx: &TaskContext, url: &str) -> Option<String> {
        head_last_modified(&self.client, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://a.com").is_ok());
        assert!(validate_url("ftp://a.com").is_err());
        assert!(validate_url("  ").is_err());
    }

    #[test]
    fn test_extract_title_and_strip() {
        let html = "<html><head><title> Rust Book </title></head><body><p>Hello <b>world</b></p></body></html>";
        assert!(looks_like_html(html));
        assert_eq!(extract_title(html), Some("Rust Book".to_string()));
        assert_eq!(strip_html_tags("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn test_jina_body_without_data() {
        let body: JinaReadBody = serde_json::from_str(r#"{"code":200}"#).unwrap();
        assert!(body.data.is_none());
    }
}
