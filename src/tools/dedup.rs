//! 基于嵌入相似度的查询 / 子问题去重
//!
//! 新查询与已有查询、以及本批已接受的新查询比较，余弦相似度 ≥ 0.86 视为重复。
//! 嵌入失败时退化为文本去重：忽略大小写与首尾空白后完全相同的查询仍会被丢弃。

use crate::core::TaskContext;
use crate::llm::{cosine_similarity, EmbeddingProvider};
use crate::memory::{TokenTracker, TokenUsage};

pub const SIMILARITY_THRESHOLD: f32 = 0.86;

/// 纯函数部分：给定向量后筛出不重复的新查询下标
pub fn dedup_by_embeddings(
    new_embeddings: &[Vec<f32>],
    existing_embeddings: &[Vec<f32>],
    threshold: f32,
) -> Vec<usize> {
    let mut accepted: Vec<usize> = Vec::new();
    for (i, emb) in new_embeddings.iter().enumerate() {
        let dup_existing = existing_embeddings
            .iter()
            .any(|e| cosine_similarity(emb, e) >= threshold);
        if dup_existing {
            continue;
        }
        let dup_new = accepted
            .iter()
            .any(|&j| cosine_similarity(emb, &new_embeddings[j]) >= threshold);
        if !dup_new {
            accepted.push(i);
        }
    }
    accepted
}

/// 嵌入不可用时的兜底：按 trim + 小写后的文本精确去重
pub fn dedup_exact(new_queries: &[String], existing_queries: &[String]) -> Vec<String> {
    let key = |q: &str| q.trim().to_lowercase();
    let mut seen: Vec<String> = existing_queries.iter().map(|q| key(q.as_str())).collect();
    let mut unique = Vec::new();
    for q in new_queries {
        let k = key(q.as_str());
        if !seen.contains(&k) {
            seen.push(k);
            unique.push(q.clone());
        }
    }
    unique
}

/// 去重新查询；tracker 记录嵌入消耗（工具名 "dedup"）
pub async fn dedup_queries(
    embedder: &dyn EmbeddingProvider,
    ctx: &TaskContext,
    new_queries: &[String],
    existing_queries: &[String],
    tracker: Option<&TokenTracker>,
) -> Vec<String> {
    let new_queries: Vec<String> = new_queries
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if new_queries.len() <= 1 && existing_queries.is_empty() {
        return new_queries;
    }

    let combined: Vec<String> = new_queries
        .iter()
        .chain(existing_queries.iter())
        .cloned()
        .collect();
    let embedded = match embedder.embed(ctx, &combined).await {
        Ok(e) if e.vectors.len() == combined.len() => e,
        Ok(e) => {
            tracing::warn!(
                expected = combined.len(),
                got = e.vectors.len(),
                "Dedup embedding count mismatch, falling back to exact matching"
            );
            return dedup_exact(&new_queries, existing_queries);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dedup embedding failed, falling back to exact matching");
            return dedup_exact(&new_queries, existing_queries);
        }
    };
    if let Some(t) = tracker {
        t.track_usage("dedup", TokenUsage::new(embedded.tokens, 0));
    }

    let (new_emb, existing_emb) = embedded.vectors.split_at(new_queries.len());
    let kept = dedup_by_embeddings(new_emb, existing_emb, SIMILARITY_THRESHOLD);
    let unique: Vec<String> = kept.into_iter().map(|i| new_queries[i].clone()).collect();
    tracing::debug!(unique = ?unique, "Dedup");
    unique
}
