//! 引用构建：把答案片段与已收集网页片段按嵌入相似度配对，生成脚注
//!
//! 答案与网页内容都按段分块，只保留长度 ≥ min_chunk_len 的块；每对 (答案块, 网页块) 计算余弦，
//! 按分数降序贪心选取：每个答案块、每个 URL 最多用一次，分数须 ≥ min_rel_score，最多 max_ref 条。
//! 选中的答案块末尾插入 [^n] 标记，编号按答案中出现的先后。

use std::collections::{HashMap, HashSet};

use crate::core::{AgentError, TaskContext, WebContent};
use crate::llm::{cosine_similarity, EmbeddingProvider};
use crate::memory::{Reference, TokenTracker, TokenUsage};
use crate::tools::markdown::{chunk_text, CHUNK_MAX_CHARS};

/// 参与匹配的最小分块长度（字符）
pub const MIN_CHUNK_LEN: usize = 80;

/// 一次匹配：答案块下标、网页块下标、相似度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkMatch {
    pub answer_idx: usize,
    pub web_idx: usize,
    pub score: f32,
}

/// 纯函数部分：web_urls[i] 为第 i 个网页块所属 URL
pub fn select_references(
    answer_embeddings: &[Vec<f32>],
    web_embeddings: &[Vec<f32>],
    web_urls: &[&str],
    min_rel_score: f32,
    max_ref: usize,
) -> Vec<ChunkMatch> {
    let mut pairs: Vec<ChunkMatch> = Vec::new();
    for (a, a_emb) in answer_embeddings.iter().enumerate() {
        for (w, w_emb) in web_embeddings.iter().enumerate() {
            let score = cosine_similarity(a_emb, w_emb);
            if score >= min_rel_score {
                pairs.push(ChunkMatch {
                    answer_idx: a,
                    web_idx: w,
                    score,
                });
            }
        }
    }
    pairs.sort_by(|x, y| y.score.partial_cmp(&x.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut used_answer = HashSet::new();
    let mut used_url = HashSet::new();
    let mut selected = Vec::new();
    for p in pairs {
        if selected.len() >= max_ref {
            break;
        }
        let url = web_urls.get(p.web_idx).copied().unwrap_or_default();
        if used_answer.contains(&p.answer_idx) || used_url.contains(url) {
            continue;
        }
        used_answer.insert(p.answer_idx);
        used_url.insert(url);
        selected.push(p);
    }
    selected
}

/// 引用构建结果：带脚注标记的答案 + 引用列表
#[derive(Debug, Clone, Default)]
pub struct BuiltReferences {
    pub answer: String,
    pub references: Vec<Reference>,
}

/// 构建引用；没有可用网页内容时原样返回答案，嵌入失败返回错误（由调用方回退）
#[allow(clippy::too_many_arguments)]
pub async fn build_references(
    embedder: &dyn EmbeddingProvider,
    ctx: &TaskContext,
    tracker: &TokenTracker,
    answer: &str,
    web_contents: &HashMap<String, WebContent>,
    min_chunk_len: usize,
    max_ref: usize,
    min_rel_score: f32,
) -> Result<BuiltReferences, AgentError> {
    let (answer_chunks, answer_positions) = chunk_text(answer, CHUNK_MAX_CHARS);
    let answer_sel: Vec<usize> = (0..answer_chunks.len())
        .filter(|&i| answer_chunks[i].trim().chars().count() >= min_chunk_len)
        .collect();

    let mut urls: Vec<&String> = web_contents.keys().collect();
    urls.sort();
    let mut web_chunks: Vec<String> = Vec::new();
    let mut web_urls: Vec<&str> = Vec::new();
    for url in urls {
        let content = &web_contents[url];
        for chunk in &content.chunks {
            if chunk.trim().chars().count() >= min_chunk_len {
                web_chunks.push(chunk.clone());
                web_urls.push(url.as_str());
            }
        }
    }

    if answer_sel.is_empty() || web_chunks.is_empty() || max_ref == 0 {
        tracing::debug!(
            answer_chunks = answer_sel.len(),
            web_chunks = web_chunks.len(),
            "Nothing to match, skipping references"
        );
        return Ok(BuiltReferences {
            answer: answer.to_string(),
            references: Vec::new(),
        });
    }

    let texts: Vec<String> = answer_sel
        .iter()
        .map(|&i| answer_chunks[i].clone())
        .chain(web_chunks.iter().cloned())
        .collect();
    let embedded = embedder.embed(ctx, &texts).await?;
    if embedded.vectors.len() != texts.len() {
        return Err(AgentError::Embedding("embedding count mismatch".into()));
    }
    tracker.track_usage("ref_builder", TokenUsage::new(embedded.tokens, 0));

    let (answer_emb, web_emb) = embedded.vectors.split_at(answer_sel.len());
    let mut matches = select_references(answer_emb, web_emb, &web_urls, min_rel_score, max_ref);
    // 脚注编号按答案中出现的顺序
    matches.sort_by_key(|m| answer_sel[m.answer_idx]);

    let references: Vec<Reference> = matches
        .iter()
        .map(|m| {
            let url = web_urls[m.web_idx];
            Reference {
                url: url.to_string(),
                title: web_contents.get(url).map(|c| c.title.clone()),
                exact_quote: Some(web_chunks[m.web_idx].trim().to_string()),
                date_time: None,
                relevance_score: Some(m.score),
            }
        })
        .collect();

    // 从后往前插入标记，前面的字符位置不受影响
    let mut chars: Vec<char> = answer.chars().collect();
    for (n, m) in matches.iter().enumerate().rev() {
        let end = answer_positions[answer_sel[m.answer_idx]][1].min(chars.len());
        let marker: Vec<char> = format!("[^{}]", n + 1).chars().collect();
        chars.splice(end..end, marker);
    }

    tracing::info!(references = references.len(), "References built");
    Ok(BuiltReferences {
        answer: chars.into_iter().collect(),
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;

    #[test]
    fn test_select_unique_url_and_threshold() {
        let a = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let w = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]];
        let urls = ["https://a.com/", "https://a.com/", "https://b.com/"];
        let sel = select_references(&a, &w, &urls, 0.75, 10);
        assert_eq!(sel.len(), 2);
        let used: HashSet<&str> = sel.iter().map(|m| urls[m.web_idx]).collect();
        assert_eq!(used.len(), 2);
        assert!(sel.iter().all(|m| m.score >= 0.75));
    }

    #[test]
    fn test_select_respects_max_ref() {
        let a = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let w = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let urls = ["https://a.com/", "https://b.com/"];
        assert_eq!(select_references(&a, &w, &urls, 0.5, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_build_references_inserts_markers() {
        let paragraph = "Paris is the capital and most populous city of France, located on the river Seine in the north.";
        let answer = format!("{}\n\nUnrelated closing remark that talks about weather patterns in the southern hemisphere today.", paragraph);
        let (chunks, positions) = chunk_text(paragraph, CHUNK_MAX_CHARS);
        let mut contents = HashMap::new();
        contents.insert(
            "https://en.wikipedia.org/wiki/Paris".to_string(),
            WebContent {
                title: "Paris".into(),
                full: paragraph.to_string(),
                chunks,
                chunk_positions: positions,
            },
        );
        let tracker = TokenTracker::new(10_000);
        let built = build_references(
            &MockEmbedder::new(),
            &TaskContext::new("t"),
            &tracker,
            &answer,
            &contents,
            MIN_CHUNK_LEN,
            10,
            0.75,
        )
        .await
        .unwrap();
        assert_eq!(built.references.len(), 1);
        assert!(built.answer.contains("Seine in the north.[^1]"));
        assert!(tracker.breakdown().contains_key("ref_builder"));
    }

    #[tokio::test]
    async fn test_no_web_content_returns_answer_unchanged() {
        let built = build_references(
            &MockEmbedder::new(),
            &TaskContext::new("t"),
            &TokenTracker::new(100),
            "short answer",
            &HashMap::new(),
            MIN_CHUNK_LEN,
            10,
            0.75,
        )
        .await
        .unwrap();
        assert_eq!(built.answer, "short answer");
        assert!(built.references.is_empty());
    }
}
