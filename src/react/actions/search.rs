//! search：去重 -> 首轮搜索 -> 基于 soundbites 改写 -> 再去重 -> 次轮搜索

use crate::core::{AgentState, WebContent, MAX_QUERIES_PER_STEP};
use crate::memory::{KnowledgeItem, KnowledgeKind, TokenUsage};
use crate::react::actions::{StepFlow, THINK_DIFFERENTLY};
use crate::react::events::ResearchEvent;
use crate::react::loop_::TaskEnv;
use crate::react::planner::{SearchAction, StepAction};
use crate::react::rewriter::rewrite_query;
use crate::tools::markdown::{choose_k, remove_html_tags};
use crate::tools::url::{add_to_all_urls, normalize_url};
use crate::tools::{dedup_queries, SearchQuery, SearchSnippet};

/// 一批查询的收获：实际执行成功的查询与对应的 side-info 知识
#[derive(Debug, Default)]
pub struct SearchHarvest {
    pub searched: Vec<String>,
    pub knowledge: Vec<KnowledgeItem>,
}

fn site_filter(only_hostnames: &[String]) -> String {
    let sites: Vec<String> = only_hostnames
        .iter()
        .map(|h| h.trim())
        .filter(|h| !h.is_empty())
        .map(|h| format!("site:{}", h))
        .collect();
    if sites.is_empty() {
        String::new()
    } else {
        format!(" {}", sites.join(" OR "))
    }
}

/// 并发执行一批查询，把结果写入 URL 注册表与 web_contents；
/// 失败或无结果的查询不计入 searched
pub async fn execute_search_queries(
    env: &TaskEnv<'_>,
    state: &mut AgentState,
    queries: Vec<SearchQuery>,
    restrict_hostnames: bool,
) -> SearchHarvest {
    let suffix = if restrict_hostnames {
        site_filter(&env.options.only_hostnames)
    } else {
        String::new()
    };
    env.publish(ResearchEvent::SearchQuery {
        queries: queries.iter().map(|q| q.q.clone()).collect(),
    });

    let search = env.search;
    let ctx = env.ctx;
    let suffix = suffix.as_str();
    let responses = env
        .scheduler
        .run_bounded(queries, |query| async move {
            let executed = SearchQuery {
                q: format!("{}{}", query.q, suffix),
                tbs: query.tbs.clone(),
            };
            let result = search.search(ctx, &executed).await;
            (query, result)
        })
        .await;

    let mut harvest = SearchHarvest::default();
    for (query, result) in responses {
        let response = match result {
            Ok(r) if !r.results.is_empty() => r,
            Ok(_) => {
                tracing::warn!(query = %query.q, "Search returned no results");
                continue;
            }
            Err(e) => {
                tracing::warn!(query = %query.q, error = %e, "Search failed");
                env.publish(ResearchEvent::error(format!("Search failed for \"{}\": {}", query.q, e)));
                continue;
            }
        };
        env.tracker.track_usage("search", TokenUsage::new(response.tokens, 0));

        let mut added = 0;
        for r in &response.results {
            let Some(url) = normalize_url(&r.url) else {
                continue;
            };
            let mut snippet = SearchSnippet::new(r.title.as_str(), url.as_str(), r.description.as_str());
            snippet.date = r.date.clone();
            added += add_to_all_urls(snippet, &mut state.all_urls);
            state.web_contents.entry(url).or_insert_with(|| WebContent {
                title: r.title.clone(),
                full: r.description.clone(),
                chunks: vec![r.description.clone()],
                chunk_positions: vec![[0, r.description.chars().count()]],
            });
        }
        tracing::debug!(query = %query.q, results = response.results.len(), new_urls = added, "Search harvested");

        let descriptions: Vec<&str> = response.results.iter().map(|r| r.description.as_str()).collect();
        let updated = query
            .tbs
            .as_ref()
            .map(|_| chrono::Utc::now().format("%Y-%m-%d").to_string());
        harvest.knowledge.push(
            KnowledgeItem::new(
                format!("What do Internet say about \"{}\"?", query.q),
                remove_html_tags(&descriptions.join("; ")),
                KnowledgeKind::SideInfo,
            )
            .with_updated(updated),
        );
        harvest.searched.push(query.q);
    }
    tracing::info!(searched = harvest.searched.len(), "Search batch finished");
    harvest
}

/// 处理 search 动作
pub async fn handle_search(
    env: &TaskEnv<'_>,
    state: &mut AgentState,
    mut action: SearchAction,
    question: &str,
) -> StepFlow {
    env.think(format!("Step {}: searching", state.step));

    let requests = dedup_queries(
        env.embedder,
        env.ctx,
        &action.search_requests,
        &state.all_keywords,
        Some(&env.tracker),
    )
    .await;
    action.search_requests = choose_k(&requests, MAX_QUERIES_PER_STEP);

    let mut first_knowledge: Vec<KnowledgeItem> = Vec::new();
    if !action.search_requests.is_empty() {
        let queries = action.search_requests.iter().map(SearchQuery::new).collect();
        let harvest = execute_search_queries(env, state, queries, false).await;
        state.all_keywords.extend(harvest.searched);
        state.knowledge.extend(harvest.knowledge.iter().cloned());
        first_knowledge = harvest.knowledge;
    }

    let soundbites = first_knowledge
        .iter()
        .map(|k| k.answer.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let rewritten = match rewrite_query(&env.generator, env.ctx, &action, &soundbites).await {
        Ok(q) if !q.is_empty() => q,
        Ok(_) => action.search_requests.iter().map(SearchQuery::new).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Query rewrite failed, reusing original requests");
            action.search_requests.iter().map(SearchQuery::new).collect()
        }
    };

    let q_only: Vec<String> = rewritten.iter().map(|q| q.q.clone()).collect();
    let unique = dedup_queries(
        env.embedder,
        env.ctx,
        &q_only,
        &state.all_keywords,
        Some(&env.tracker),
    )
    .await;
    let keyword_queries: Vec<SearchQuery> = choose_k(&unique, MAX_QUERIES_PER_STEP)
        .into_iter()
        .map(|q| {
            let mut matches = rewritten.iter().filter(|r| r.q == q);
            match (matches.next(), matches.next()) {
                (Some(only), None) => only.clone(),
                _ => SearchQuery::new(q),
            }
        })
        .collect();

    let mut searched: Vec<String> = Vec::new();
    if !keyword_queries.is_empty() {
        let harvest = execute_search_queries(env, state, keyword_queries.clone(), true).await;
        searched = harvest.searched;
        state.all_keywords.extend(searched.iter().cloned());
        state.knowledge.extend(harvest.knowledge);
    }

    let keywords = keyword_queries
        .iter()
        .map(|q| q.q.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let result = if !searched.is_empty() {
        state.diary.push(format!(
            "At step {}, you took the **search** action and look for external information for the question: \"{}\".\n\
             In particular, you tried to search for the following keywords: \"{}\".\n\
             You found quite some information and add them to your URL list and **visit** them later when needed.",
            state.step, question, keywords
        ));
        Some(format!("Searched queries: {}", searched.join(", ")))
    } else {
        state.diary.push(format!(
            "At step {}, you took the **search** action and look for external information for the question: \"{}\".\n\
             In particular, you tried to search for the following keywords: \"{}\".\n\
             But then you realized you have already searched for these keywords before, or the rewritten queries yielded no results. No new information is returned.\n\
             You decided to think out of the box or cut from a completely different angle.",
            state.step, question, keywords
        ));
        Some(format!(
            "You have tried all possible queries and found no new information. {}",
            THINK_DIFFERENTLY
        ))
    };
    state.record_step(question, StepAction::Search(action), result);

    state.permissions.search = false;
    state.permissions.answer = false;
    StepFlow::Continue
}

#[cfg(test)]
mod tests {
    use super::site_filter;

    #[test]
    fn test_site_filter() {
        assert_eq!(site_filter(&[]), "");
        assert_eq!(
            site_filter(&["a.com".into(), " ".into(), "b.org".into()]),
            " site:a.com OR site:b.org"
        );
    }
}
