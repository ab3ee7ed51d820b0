//! URL 注册表、排序与多样性控制
//!
//! 注册表以规范化 URL 为键，重复发现时合并权重与描述，不产生重复条目。
//! 排序分数 = 频次 + 域名频次（boost_hostnames 加倍）+ 路径前缀 + 与当前问题的嵌入相关度，截断到 [0, 5]。

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, TaskContext};
use crate::llm::{cosine_similarity, EmbeddingProvider};

const FREQ_FACTOR: f32 = 0.5;
const HOSTNAME_BOOST_FACTOR: f32 = 0.5;
const PATH_BOOST_FACTOR: f32 = 0.4;
const DECAY_FACTOR: f32 = 0.8;
const RELEVANCE_FACTOR: f32 = 0.8;
const MAX_BOOST: f32 = 5.0;

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "ref_src"];

/// 注册表中的 URL 条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSnippet {
    pub title: String,
    pub url: String,
    pub description: String,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl SearchSnippet {
    pub fn new(title: impl Into<String>, url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            description: description.into(),
            weight: 1.0,
            date: None,
        }
    }

    /// 用于相关度计算与 prompt 展示的合并文本
    pub fn merged_text(&self) -> String {
        [self.title.trim(), self.description.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" - ")
    }
}

/// 排序后的 URL（附各项得分）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoostedSnippet {
    #[serde(flatten)]
    pub snippet: SearchSnippet,
    pub freq_boost: f32,
    pub hostname_boost: f32,
    pub path_boost: f32,
    pub relevance_boost: f32,
    pub score: f32,
    pub merged: String,
}

impl BoostedSnippet {
    pub fn url(&self) -> &str {
        &self.snippet.url
    }
}

/// 规范化 URL：仅接受 http/https；去掉 www.、默认端口、片段、跟踪参数与非根路径的末尾斜杠，查询参数按键排序
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut url = url::Url::parse(trimmed).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host)).ok()?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    Some(url.to_string())
}

/// 提取主机名（去掉 www.），解析失败返回 None
pub fn hostname(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn host_matches(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        let p = p.trim().trim_start_matches("www.").to_lowercase();
        !p.is_empty() && (host == p || host.ends_with(&format!(".{}", p)))
    })
}

/// 写入注册表：新 URL 返回 1；已存在则累加权重、合并描述并返回 0。无法规范化的 URL 被忽略
pub fn add_to_all_urls(snippet: SearchSnippet, registry: &mut HashMap<String, SearchSnippet>) -> u32 {
    let Some(url) = normalize_url(&snippet.url) else {
        return 0;
    };
    match registry.get_mut(&url) {
        Some(existing) => {
            existing.weight += snippet.weight;
            let desc = snippet.description.trim();
            if !desc.is_empty() && !existing.description.contains(desc) {
                if existing.description.trim().is_empty() {
                    existing.description = desc.to_string();
                } else {
                    existing.description = format!("{} {}", existing.description, desc);
                }
            }
            if existing.title.trim().is_empty() {
                existing.title = snippet.title;
            }
            if existing.date.is_none() {
                existing.date = snippet.date;
            }
            0
        }
        None => {
            registry.insert(url.clone(), SearchSnippet { url, ..snippet });
            1
        }
    }
}

/// 过滤：去掉已访问、坏域名；only_hostnames 非空时只保留匹配的域名
pub fn filter_urls(
    registry: &HashMap<String, SearchSnippet>,
    visited: &[String],
    bad_hostnames: &[String],
    only_hostnames: &[String],
) -> Vec<SearchSnippet> {
    let visited: HashSet<&str> = visited.iter().map(String::as_str).collect();
    let mut out: Vec<SearchSnippet> = registry
        .values()
        .filter(|s| !visited.contains(s.url.as_str()))
        .filter(|s| {
            let Some(host) = hostname(&s.url) else {
                return false;
            };
            if host_matches(&host, bad_hostnames) {
                return false;
            }
            only_hostnames.is_empty() || host_matches(&host, only_hostnames)
        })
        .cloned()
        .collect();
    // HashMap 无序，按 URL 排序保证同输入同输出
    out.sort_by(|a, b| a.url.cmp(&b.url));
    out
}

fn path_prefixes(url: &str) -> Vec<String> {
    let Ok(parsed) = url::Url::parse(url) else {
        return Vec::new();
    };
    let host = parsed.host_str().unwrap_or_default().to_string();
    let mut prefixes = Vec::new();
    let mut acc = host;
    for seg in parsed.path().split('/').filter(|s| !s.is_empty()) {
        acc = format!("{}/{}", acc, seg);
        prefixes.push(acc.clone());
    }
    prefixes
}

/// 打分并按分数降序排序；relevance 为 URL → 相关度（0..1），缺失视为 0
pub fn rank_urls(
    snippets: Vec<SearchSnippet>,
    boost_hostnames: &[String],
    relevance: &HashMap<String, f32>,
) -> Vec<BoostedSnippet> {
    let total: f32 = snippets.iter().map(|s| s.weight).sum::<f32>().max(1.0);

    let mut hostname_counts: HashMap<String, f32> = HashMap::new();
    let mut prefix_counts: HashMap<String, f32> = HashMap::new();
    for s in &snippets {
        if let Some(h) = hostname(&s.url) {
            *hostname_counts.entry(h).or_insert(0.0) += s.weight;
        }
        for p in path_prefixes(&s.url) {
            *prefix_counts.entry(p).or_insert(0.0) += s.weight;
        }
    }

    let mut ranked: Vec<BoostedSnippet> = snippets
        .into_iter()
        .map(|s| {
            let freq_boost = s.weight / total * FREQ_FACTOR;
            let host = hostname(&s.url).unwrap_or_default();
            let host_multiplier = if host_matches(&host, boost_hostnames) { 2.0 } else { 1.0 };
            let hostname_boost = hostname_counts.get(&host).copied().unwrap_or(0.0) / total
                * HOSTNAME_BOOST_FACTOR
                * host_multiplier;
            let path_boost: f32 = path_prefixes(&s.url)
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    prefix_counts.get(p).copied().unwrap_or(0.0) / total
                        * PATH_BOOST_FACTOR
                        * DECAY_FACTOR.powi(i as i32)
                })
                .sum();
            let relevance_boost = relevance.get(&s.url).copied().unwrap_or(0.0).max(0.0) * RELEVANCE_FACTOR;
            let score =
                (freq_boost + hostname_boost + path_boost + relevance_boost).clamp(0.0, MAX_BOOST);
            let merged = s.merged_text();
            BoostedSnippet {
                snippet: s,
                freq_boost,
                hostname_boost,
                path_boost,
                relevance_boost,
                score,
                merged,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.snippet.url.cmp(&b.snippet.url))
    });
    ranked
}

/// 每个主机名最多保留 k 条，保持原有顺序
pub fn keep_k_per_hostname(ranked: Vec<BoostedSnippet>, k: usize) -> Vec<BoostedSnippet> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    ranked
        .into_iter()
        .filter(|r| {
            let host = hostname(r.url()).unwrap_or_default();
            let c = counts.entry(host).or_insert(0);
            *c += 1;
            *c <= k
        })
        .collect()
}

/// 按分数取前 max 条（prompt 中展示的 URL 列表）
pub fn sort_select_urls(ranked: &[BoostedSnippet], max: usize) -> Vec<BoostedSnippet> {
    let mut list: Vec<BoostedSnippet> = ranked.to_vec();
    list.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    list.truncate(max);
    list
}

/// 计算候选 URL 与问题的嵌入相关度；向量按文本缓存，返回 (相关度表, 本次消耗 token)
pub async fn relevance_scores(
    embedder: &dyn EmbeddingProvider,
    ctx: &TaskContext,
    question: &str,
    snippets: &[SearchSnippet],
    cache: &mut HashMap<String, Vec<f32>>,
) -> Result<(HashMap<String, f32>, u64), AgentError> {
    if snippets.is_empty() {
        return Ok((HashMap::new(), 0));
    }
    let mut missing: Vec<String> = Vec::new();
    let question = question.trim().to_string();
    if !cache.contains_key(&question) {
        missing.push(question.clone());
    }
    for s in snippets {
        let text = s.merged_text();
        if !text.is_empty() && !cache.contains_key(&text) && !missing.contains(&text) {
            missing.push(text);
        }
    }

    let mut tokens = 0;
    if !missing.is_empty() {
        let embedded = embedder.embed(ctx, &missing).await?;
        if embedded.vectors.len() != missing.len() {
            return Err(AgentError::Embedding("embedding count mismatch".into()));
        }
        tokens = embedded.tokens;
        for (text, vec) in missing.into_iter().zip(embedded.vectors) {
            cache.insert(text, vec);
        }
    }

    let Some(q_vec) = cache.get(&question) else {
        return Ok((HashMap::new(), tokens));
    };
    let scores = snippets
        .iter()
        .filter_map(|s| {
            let v = cache.get(&s.merged_text())?;
            Some((s.url.clone(), cosine_similarity(q_vec, v)))
        })
        .collect();
    Ok((scores, tokens))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"'\)\]\}]+"#).expect("valid url regex")
    })
}

/// 从文本中抽取 URL，描述取 URL 前后各 context_window 个字符
pub fn extract_urls_with_description(text: &str, context_window: usize) -> Vec<SearchSnippet> {
    let mut out: Vec<SearchSnippet> = Vec::new();
    let mut seen = HashSet::new();
    for m in url_regex().find_iter(text) {
        let raw = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        let Some(url) = normalize_url(raw) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let before: String = {
            let head = &text[..m.start()];
            let chars: Vec<char> = head.chars().collect();
            chars[chars.len().saturating_sub(context_window)..].iter().collect()
        };
        let after: String = text[m.end()..].chars().take(context_window).collect();
        let description = format!("{} {}", before.trim(), after.trim())
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        out.push(SearchSnippet::new(String::new(), url, description));
    }
    out
}

fn md_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("valid md link regex"))
}

/// 把文本等于 URL 本身的 markdown 链接改写为 [标题 - 主机名](url)
pub fn fix_bad_url_md_links(markdown: &str, registry: &HashMap<String, SearchSnippet>) -> String {
    md_link_regex()
        .replace_all(markdown, |caps: &regex::Captures| {
            let text = &caps[1];
            let href = &caps[2];
            let looks_bad = text.starts_with("http://") || text.starts_with("https://") || text == href;
            if !looks_bad {
                return caps[0].to_string();
            }
            let host = hostname(href).unwrap_or_else(|| href.to_string());
            let title = normalize_url(href)
                .and_then(|u| registry.get(&u))
                .map(|s| s.title.trim().to_string())
                .filter(|t| !t.is_empty());
            match title {
                Some(t) => format!("[{} - {}]({})", t, host, href),
                None => format!("[{}]({})", host, href),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boosted(url: &str, score: f32) -> BoostedSnippet {
        BoostedSnippet {
            snippet: SearchSnippet::new("t", url, "d"),
            freq_boost: 0.0,
            hostname_boost: 0.0,
            path_boost: 0.0,
            relevance_boost: 0.0,
            score,
            merged: "t - d".into(),
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://WWW.Example.com:443/a/b/?utm_source=x&b=2&a=1#frag"),
            Some("https://example.com/a/b?a=1&b=2".to_string())
        );
        assert_eq!(
            normalize_url("http://example.com"),
            Some("http://example.com/".to_string())
        );
        assert_eq!(normalize_url("mailto:someone@example.com"), None);
        assert_eq!(normalize_url("not a url"), None);
    }

    #[test]
    fn test_add_to_all_urls_merges() {
        let mut reg = HashMap::new();
        assert_eq!(add_to_all_urls(SearchSnippet::new("A", "https://www.a.com/x/", "first"), &mut reg), 1);
        assert_eq!(add_to_all_urls(SearchSnippet::new("", "https://a.com/x", "second"), &mut reg), 0);
        assert_eq!(reg.len(), 1);
        let s = reg.get("https://a.com/x").unwrap();
        assert_eq!(s.weight, 2.0);
        assert_eq!(s.description, "first second");
        assert_eq!(s.title, "A");
    }

    #[test]
    fn test_filter_urls() {
        let mut reg = HashMap::new();
        for u in ["https://a.com/1", "https://spam.com/2", "https://docs.rs/3", "https://sub.spam.com/4"] {
            add_to_all_urls(SearchSnippet::new("", u, ""), &mut reg);
        }
        let out = filter_urls(&reg, &["https://a.com/1".into()], &["spam.com".into()], &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://docs.rs/3");

        let only = filter_urls(&reg, &[], &[], &["a.com".into()]);
        assert_eq!(only.len(), 1);
    }

    #[test]
    fn test_rank_prefers_weight_and_relevance() {
        let mut heavy = SearchSnippet::new("", "https://a.com/x", "");
        heavy.weight = 3.0;
        let light = SearchSnippet::new("", "https://b.com/y", "");
        let ranked = rank_urls(vec![light.clone(), heavy], &[], &HashMap::new());
        assert_eq!(ranked[0].url(), "https://a.com/x");

        let relevance = HashMap::from([("https://b.com/y".to_string(), 1.0)]);
        let mut heavy = SearchSnippet::new("", "https://a.com/x", "");
        heavy.weight = 2.0;
        let ranked = rank_urls(vec![light, heavy], &[], &relevance);
        assert_eq!(ranked[0].url(), "https://b.com/y");
        assert!(ranked.iter().all(|r| r.score <= MAX_BOOST));
    }

    #[test]
    fn test_boost_hostnames() {
        let a = SearchSnippet::new("", "https://a.com/x", "");
        let b = SearchSnippet::new("", "https://b.com/x", "");
        let ranked = rank_urls(vec![a, b], &["b.com".into()], &HashMap::new());
        assert_eq!(ranked[0].url(), "https://b.com/x");
    }

    #[test]
    fn test_keep_k_per_hostname() {
        let ranked = vec![
            boosted("https://a.com/1", 3.0),
            boosted("https://a.com/2", 2.9),
            boosted("https://a.com/3", 2.8),
            boosted("https://b.com/1", 1.0),
        ];
        let kept = keep_k_per_hostname(ranked, 2);
        let urls: Vec<_> = kept.iter().map(|r| r.url()).collect();
        assert_eq!(urls, vec!["https://a.com/1", "https://a.com/2", "https://b.com/1"]);
    }

    #[test]
    fn test_extract_urls_with_description() {
        let text = "See https://docs.rs/tokio, it explains runtimes. Also https://docs.rs/tokio again.";
        let urls = extract_urls_with_description(text, 20);
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].url, "https://docs.rs/tokio");
        assert!(urls[0].description.contains("it explains"));
    }

    #[test]
    fn test_fix_bad_url_md_links() {
        let mut reg = HashMap::new();
        add_to_all_urls(SearchSnippet::new("Tokio", "https://docs.rs/tokio", ""), &mut reg);
        let md = "see [https://docs.rs/tokio](https://docs.rs/tokio) and [ok](https://x.com)";
        let fixed = fix_bad_url_md_links(md, &reg);
        assert_eq!(fixed, "see [Tokio - docs.rs](https://docs.rs/tokio) and [ok](https://x.com)");
    }
}
