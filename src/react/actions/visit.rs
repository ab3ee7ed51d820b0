//! visit：解析目标 URL，补齐高权重未访问 URL，并发读取并写入知识与 web_contents

use crate::core::{AgentState, WebContent, MAX_URLS_PER_STEP};
use crate::memory::{KnowledgeItem, KnowledgeKind, Reference, TokenUsage};
use crate::react::actions::{StepFlow, THINK_DIFFERENTLY};
use crate::react::events::ResearchEvent;
use crate::react::loop_::TaskEnv;
use crate::react::planner::{StepAction, UrlTarget, VisitAction};
use crate::tools::markdown::{chunk_text, CHUNK_MAX_CHARS};
use crate::tools::url::normalize_url;

const READ_PREVIEW_CHARS: usize = 200;

/// 目标解析：下标对应 ranked 列表（1 起始），字面 URL 规范化；与 ranked 前 K 个合并去重，
/// 排除已访问，最多 MAX_URLS_PER_STEP 个
pub fn resolve_visit_targets(targets: &[UrlTarget], ranked: &[String], visited: &[String]) -> Vec<String> {
    let is_visited = |u: &str| visited.iter().any(|v| v == u);
    let initial = targets.iter().filter_map(|t| match t {
        UrlTarget::Index(i) if *i >= 1 && *i <= ranked.len() => normalize_url(&ranked[*i - 1]),
        UrlTarget::Index(_) => None,
        UrlTarget::Url(u) => normalize_url(u),
    });

    let mut out: Vec<String> = Vec::new();
    for url in initial.chain(ranked.iter().take(MAX_URLS_PER_STEP).cloned()) {
        if !is_visited(&url) && !out.contains(&url) {
            out.push(url);
        }
    }
    out.truncate(MAX_URLS_PER_STEP);
    out
}

/// 处理 visit 动作
pub async fn handle_visit(env: &TaskEnv<'_>, state: &mut AgentState, action: VisitAction) -> StepFlow {
    let question = state.current_question();
    let ranked: Vec<String> = state.weighted_urls.iter().map(|r| r.url().to_string()).collect();
    let targets = resolve_visit_targets(&action.url_targets, &ranked, &state.visited_urls);
    let recorded = VisitAction {
        think: action.think,
        url_targets: targets.iter().cloned().map(UrlTarget::Url).collect(),
    };

    if targets.is_empty() {
        state.diary.push(format!(
            "At step {}, you took the **visit** action. But then you realized you have already visited these URLs or there were no relevant URLs to visit.\n\
             You decided to think out of the box or cut from a completely different angle.",
            state.step
        ));
        state.record_step(
            &question,
            StepAction::Visit(recorded),
            Some(format!(
                "You have visited all possible URLs or found no relevant ones. {}",
                THINK_DIFFERENTLY
            )),
        );
        state.permissions.read = false;
        return StepFlow::Continue;
    }

    tracing::info!(urls = ?targets, "Visiting URLs");
    env.publish(ResearchEvent::VisitUrl { urls: targets.clone() });

    let reader = env.reader;
    let ctx = env.ctx;
    let results = env
        .scheduler
        .run_bounded(targets, |url| async move {
            let result = reader.read(ctx, &url).await;
            (url, result)
        })
        .await;

    let mut read_ok: Vec<String> = Vec::new();
    for (url, result) in results {
        state.mark_visited(&url);
        let page = match result {
            Ok(p) if !p.content.trim().is_empty() => p,
            Ok(_) => {
                tracing::warn!(url = %url, "Page has no readable content");
                state.mark_bad(&url);
                continue;
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to read URL");
                state.mark_bad(&url);
                continue;
            }
        };
        env.tracker.track_usage("read", TokenUsage::new(page.tokens, 0));
        env.publish(ResearchEvent::ReadContent {
            url: url.clone(),
            title: page.title.clone(),
            preview: page.content.chars().take(READ_PREVIEW_CHARS).collect(),
        });

        let reference = Reference {
            title: Some(page.title.clone()).filter(|t| !t.is_empty()),
            ..Reference::url(url.as_str())
        };
        state.knowledge.push(
            KnowledgeItem::new(
                format!("What do expert say about {}?", question),
                page.content.clone(),
                KnowledgeKind::Url,
            )
            .stamped()
            .with_references(vec![reference]),
        );
        let (chunks, chunk_positions) = chunk_text(&page.content, CHUNK_MAX_CHARS);
        state.web_contents.insert(
            url.clone(),
            WebContent {
                title: page.title,
                full: page.content,
                chunks,
                chunk_positions,
            },
        );
        read_ok.push(url);
    }
    tracing::info!(read = read_ok.len(), bad = state.bad_urls.len(), "Visit batch finished");

    let result = if !read_ok.is_empty() {
        state.diary.push(format!(
            "At step {}, you took the **visit** action and deep dive into the following URLs:\n{}\n\
             You found some useful information on the web and add them to your knowledge for future reference.",
            state.step,
            read_ok.join("\n")
        ));
        Some(format!("Read URLs: {}", read_ok.join(", ")))
    } else {
        state.diary.push(format!(
            "At step {}, you took the **visit** action and try to visit some URLs but failed to read the content. \
             You need to think out of the box or cut from a completely different angle.",
            state.step
        ));
        Some(format!(
            "You have tried all possible URLs and found no new information. {}",
            THINK_DIFFERENTLY
        ))
    };
    state.record_step(&question, StepAction::Visit(recorded), result);

    state.permissions.read = false;
    StepFlow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_index_and_literal_targets_resolved() {
        let ranked = urls(&["https://a.com/", "https://b.com/"]);
        let out = resolve_visit_targets(
            &[UrlTarget::Index(2), UrlTarget::Url("https://c.com/".into()), UrlTarget::Index(9)],
            &ranked,
            &[],
        );
        assert_eq!(out[0], "https://b.com/");
        assert_eq!(out[1], normalize_url("https://c.com/").unwrap());
        assert!(out.contains(&"https://a.com/".to_string()));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_visited_urls_excluded_and_capped() {
        let ranked = urls(&[
            "https://a.com/", "https://b.com/", "https://c.com/", "https://d.com/",
            "https://e.com/", "https://f.com/",
        ]);
        let out = resolve_visit_targets(&[UrlTarget::Index(1)], &ranked, &urls(&["https://a.com/"]));
        assert!(!out.contains(&"https://a.com/".to_string()));
        assert!(out.len() <= MAX_URLS_PER_STEP);
        let mut dedup = out.clone();
        dedup.dedup();
        assert_eq!(dedup, out);
    }
}
