//! 查询改写：把 LLM 给出的搜索请求扩展为更有效的关键词查询
//!
//! 结合已搜到的片段（soundbites）调整方向；改写失败时由调用方回退到原始请求。

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{AgentError, TaskContext};
use crate::llm::{ObjectGenerator, ToolName};
use crate::memory::Message;
use crate::react::planner::SearchAction;
use crate::tools::SearchQuery;

#[derive(Debug, Deserialize, JsonSchema)]
struct RewrittenQuery {
    /// Keyword-based search query, 2 to 5 words preferred
    q: String,
    /// Optional time filter: qdr:h, qdr:d, qdr:w, qdr:m or qdr:y
    #[serde(default)]
    tbs: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RewriteOutput {
    /// Analyze the intent behind the requests before rewriting
    think: String,
    /// Rewritten queries, each covering a different angle
    queries: Vec<RewrittenQuery>,
}

fn system_prompt() -> String {
    format!(
        "Current date: {}\n\n\
         You are an expert search query expander. Rewrite the given search requests into effective web search queries.\n\
         - Keep the user's intent; expand with synonyms, official names, and the angles an expert would check.\n\
         - Prefer short keyword queries over full sentences.\n\
         - Add a tbs time filter only when recency matters.\n\
         - Use the provided soundbites to avoid queries that would return what is already known.\n\
         - Return at most 5 queries.",
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

/// 改写搜索请求；返回的查询去掉了空白项
pub async fn rewrite_query(
    generator: &ObjectGenerator,
    ctx: &TaskContext,
    action: &SearchAction,
    soundbites: &str,
) -> Result<Vec<SearchQuery>, AgentError> {
    let mut user = format!(
        "<think>\n{}\n</think>\n<requests>\n{}\n</requests>",
        action.think,
        action.search_requests.join("\n")
    );
    if !soundbites.trim().is_empty() {
        user.push_str(&format!("\n<soundbites>\n{}\n</soundbites>", soundbites.trim()));
    }
    let out: RewriteOutput = generator
        .generate(ctx, ToolName::QueryRewriter, &system_prompt(), &[Message::user(user)])
        .await?;
    tracing::debug!(think = %out.think, count = out.queries.len(), "Queries rewritten");
    Ok(out
        .queries
        .into_iter()
        .filter(|r| !r.q.trim().is_empty())
        .map(|r| SearchQuery {
            q: r.q.trim().to_string(),
            tbs: r.tbs.filter(|t| !t.trim().is_empty()),
        })
        .collect())
}
