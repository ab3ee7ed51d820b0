//! 最终答案：Beast Mode 生成与后处理
//!
//! 后处理链：乱码修复 -> 脚注修复 -> 代码块缩进 -> 坏链接修复 -> HTML 表格转换 -> 收尾修复，
//! 然后可选的 LLM 润色、引用构建与引用补全，最后渲染带脚注的 Markdown。
//! 任一环节失败都回退到上一步的结果，不让任务失败。

use serde_json::Value;

use crate::core::{AgentError, AgentState, Permissions};
use crate::llm::{ToolName, DEFAULT_NUM_RETRIES};
use crate::memory::{compose_msgs, Message, Reference};
use crate::react::loop_::TaskEnv;
use crate::react::planner::{decode_step_action, AnswerAction, StepAction};
use crate::react::prompt::get_prompt;
use crate::tools::markdown::{
    build_md_from_answer, convert_html_tables_to_md, fix_code_block_indentation,
    repair_markdown_final, repair_markdown_footnotes_outer,
};
use crate::tools::url::{fix_bad_url_md_links, normalize_url};
use crate::tools::{build_references, validate_answer, MIN_CHUNK_LEN};

/// 空答案的占位
pub const EMPTY_ANSWER_PLACEHOLDER: &str =
    "I couldn't find a definitive answer, but here's what I gathered.";

const FALLBACK_KNOWLEDGE_ITEMS: usize = 5;

fn fallback_answer(state: &AgentState) -> AnswerAction {
    let question = &state.question;
    let start = state.knowledge.len().saturating_sub(FALLBACK_KNOWLEDGE_ITEMS);
    let summary = state.knowledge[start..]
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{}. {}", i + 1, k.answer))
        .collect::<Vec<_>>()
        .join("\n");
    let answer = if summary.is_empty() {
        format!(
            "The collected material on \"{}\" is still too thin for a conclusive answer; \
             further research on authoritative sources is needed.",
            question
        )
    } else {
        format!("{} key points:\n{}", question, summary)
    };
    AnswerAction {
        think: "Summarized from the collected knowledge.".into(),
        answer,
        is_final: true,
        ..AnswerAction::default()
    }
}

/// 解码 Beast Mode 输出：必须是通过校验的 answer，保留模型给出的引用
fn decode_beast_answer(value: &Value) -> Result<AnswerAction, AgentError> {
    match decode_step_action(value)? {
        StepAction::Answer(mut answer) => {
            validate_answer(&answer.answer)
                .map_err(|r| AgentError::SchemaViolation(format!("answer rejected: {}", r.reason)))?;
            answer.is_final = true;
            Ok(answer)
        }
        other => Err(AgentError::SchemaViolation(format!(
            "expected answer, got {}",
            other.kind().as_str()
        ))),
    }
}

/// Beast Mode：只允许 answer 的一次强制生成，结果无条件 is_final
pub async fn generate_final_answer(env: &TaskEnv<'_>, state: &AgentState) -> AnswerAction {
    let question = state.question.as_str();
    let permissions = Permissions::answer_only();
    let prompt = get_prompt(&state.diary, &state.all_keywords, &permissions, &[], true);
    let schema = env.schema.agent_schema(&permissions, 0);
    let messages = compose_msgs(&state.messages, &state.knowledge, question, &state.final_answer_pip);
    env.actions.track_think("Beast mode: forcing a final answer");

    let generated = env
        .generator
        .generate_value(
            env.ctx,
            ToolName::AgentBeastMode,
            &schema,
            &prompt.system,
            &messages,
            DEFAULT_NUM_RETRIES,
        )
        .await
        .and_then(|value: Value| decode_beast_answer(&value));

    match generated {
        Ok(a) => {
            tracing::info!("Beast mode answer accepted");
            a
        }
        Err(e) => {
            tracing::error!(error = %e, "Beast mode failed, falling back to knowledge summary");
            fallback_answer(state)
        }
    }
}

/// 含 � 时用 LLM 修复乱码
pub async fn repair_unknown_chars(env: &TaskEnv<'_>, text: &str) -> String {
    if !text.contains('\u{FFFD}') {
        return text.to_string();
    }
    let messages = [
        Message::system(
            "The text below contains corrupted characters shown as �. Restore the most likely original characters \
             from context. Return only the repaired text, changing nothing else.",
        ),
        Message::user(text),
    ];
    match env
        .generator
        .complete_text(env.ctx, ToolName::BrokenChFixer, &messages)
        .await
    {
        Ok(fixed) if !fixed.trim().is_empty() => fixed.trim().to_string(),
        Ok(_) => text.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Broken character repair failed");
            text.to_string()
        }
    }
}

/// LLM 润色；结果未通过校验或预算已耗尽时保留原文
pub async fn revise(env: &TaskEnv<'_>, answer: &str) -> String {
    if env.tracker.total_tokens() >= env.tracker.budget() {
        tracing::debug!("Budget exhausted, skipping revise");
        return answer.to_string();
    }
    let messages = [
        Message::system(
            "You are a senior editor. Improve the coherence and formatting of the markdown answer below. \
             Keep every fact, number, link and footnote marker [^n] exactly as they are, keep the language, \
             and do not add new content. Return only the revised markdown.",
        ),
        Message::user(answer),
    ];
    match env
        .generator
        .complete_text(env.ctx, ToolName::MdFixer, &messages)
        .await
    {
        Ok(revised) => {
            let revised = revised.trim();
            match validate_answer(revised) {
                Ok(()) => revised.to_string(),
                Err(r) => {
                    tracing::warn!(reason = %r.reason, "Revised answer rejected, keeping original");
                    answer.to_string()
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Revise failed");
            answer.to_string()
        }
    }
}

fn sanitize_quote(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 引用补全：规范化 URL，从注册表补 title / exact_quote / date_time，仍缺日期的查 Last-Modified
pub async fn update_references(env: &TaskEnv<'_>, state: &AgentState, references: Vec<Reference>) -> Vec<Reference> {
    let mut updated: Vec<Reference> = references
        .into_iter()
        .filter_map(|r| {
            let url = normalize_url(&r.url)?;
            let entry = state.all_urls.get(&url);
            let quote = r
                .exact_quote
                .filter(|q| !q.trim().is_empty())
                .or_else(|| entry.map(|e| e.description.clone()).filter(|d| !d.trim().is_empty()))
                .or_else(|| entry.map(|e| e.title.clone()))
                .unwrap_or_default();
            Some(Reference {
                exact_quote: Some(sanitize_quote(&quote)),
                title: entry
                    .map(|e| e.title.clone())
                    .filter(|t| !t.is_empty())
                    .or(r.title),
                date_time: r
                    .date_time
                    .filter(|d| !d.is_empty())
                    .or_else(|| entry.and_then(|e| e.date.clone())),
                relevance_score: r.relevance_score,
                url,
            })
        })
        .collect();

    let missing: Vec<(usize, String)> = updated
        .iter()
        .enumerate()
        .filter(|(_, r)| r.date_time.is_none())
        .map(|(i, r)| (i, r.url.clone()))
        .collect();
    if !missing.is_empty() {
        let reader = env.reader;
        let ctx = env.ctx;
        let dates = env
            .scheduler
            .run_bounded(missing, |(i, url)| async move {
                (i, reader.last_modified(ctx, &url).await)
            })
            .await;
        for (i, date) in dates {
            updated[i].date_time = date;
        }
    }
    updated
}

/// 后处理最终答案，写入 answer / references / md_answer
pub async fn process_final_answer(env: &TaskEnv<'_>, state: &AgentState, action: &mut AnswerAction) {
    if state.trivial_question {
        action.md_answer = Some(convert_html_tables_to_md(&fix_code_block_indentation(
            &build_md_from_answer(&action.answer, &action.references),
        )));
        return;
    }

    if action.answer.trim().is_empty() {
        action.answer = EMPTY_ANSWER_PLACEHOLDER.to_string();
    }

    let repaired = repair_unknown_chars(env, &action.answer).await;
    let repaired = repair_markdown_final(&convert_html_tables_to_md(&fix_bad_url_md_links(
        &fix_code_block_indentation(&repair_markdown_footnotes_outer(&repaired)),
        &state.all_urls,
    )));
    action.answer = revise(env, &repaired).await;

    match build_references(
        env.embedder,
        env.ctx,
        &env.tracker,
        &action.answer,
        &state.web_contents,
        MIN_CHUNK_LEN,
        env.options.max_ref,
        env.options.min_rel_score,
    )
    .await
    {
        Ok(built) => {
            action.answer = built.answer;
            action.references = update_references(env, state, built.references).await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Reference building failed, keeping unreferenced answer");
        }
    }
    action.md_answer = Some(repair_markdown_footnotes_outer(&build_md_from_answer(
        &action.answer,
        &action.references,
    )));
    tracing::info!(references = action.references.len(), "Final answer processed");
}
