//! 决策 prompt 构造
//!
//! 由日期与角色说明、步骤日志、可选动作段落三部分组成；只渲染当前被允许的动作。
//! 返回 system 文本与其中列出的 URL（与 visit 下标一一对应）。

use crate::core::{Permissions, PROMPT_URL_LIST_SIZE};
use crate::tools::url::sort_select_urls;
use crate::tools::markdown::remove_extra_line_breaks;
use crate::tools::BoostedSnippet;

const URL_PREVIEW_CHARS: usize = 50;

/// 本步 prompt
#[derive(Debug, Clone)]
pub struct AgentPrompt {
    pub system: String,
    /// prompt 中列出的 URL，第 i 个对应 idx=i+1
    pub url_list: Vec<String>,
}

const BEAST_MODE: &str = "<action-answer>
🔥 ENGAGE MAXIMUM FORCE! ABSOLUTE PRIORITY OVERRIDE! 🔥

PRIME DIRECTIVE:
- DEMOLISH ALL HESITATION! ANY RESPONSE SURPASSES SILENCE!
- PARTIAL STRIKES AUTHORIZED - DEPLOY WITH FULL CONTEXTUAL FIREPOWER
- TACTICAL REUSE FROM PREVIOUS CONVERSATION SANCTIONED
- WHEN IN DOUBT: UNLEASH CALCULATED STRIKES BASED ON AVAILABLE INTEL!

FAILURE IS NOT AN OPTION. EXECUTE WITH EXTREME PREJUDICE! ⚡️
</action-answer>";

/// 构造决策 prompt
pub fn get_prompt(
    diary: &[String],
    all_keywords: &[String],
    permissions: &Permissions,
    weighted_urls: &[BoostedSnippet],
    beast_mode: bool,
) -> AgentPrompt {
    let mut sections: Vec<String> = Vec::new();
    let mut actions: Vec<String> = Vec::new();

    sections.push(format!(
        "Current date: {}\n\n\
         You are an advanced AI research agent. You are specialized in multistep reasoning.\n\
         Using your best knowledge, conversation with the user and lessons learned, answer the user question with absolute certainty.",
        chrono::Utc::now().to_rfc2822()
    ));

    if !diary.is_empty() {
        sections.push(format!(
            "You have conducted the following actions:\n<context>\n{}\n\n</context>",
            diary.join("\n")
        ));
    }

    let url_list = sort_select_urls(weighted_urls, PROMPT_URL_LIST_SIZE);
    if permissions.read && !url_list.is_empty() {
        let rendered = url_list
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let preview: String = item.merged.chars().take(URL_PREVIEW_CHARS).collect();
                format!(
                    "  - [idx={}] [weight={:.2}] \"{}\": \"{}\"",
                    idx + 1,
                    item.score,
                    item.url(),
                    preview
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        actions.push(format!(
            "<action-visit>\n\
             - Ground the answer with external web content\n\
             - Read full content from URLs and get the fulltext, knowledge, clues, hints for better answer the question.\n\
             - Must check URLs mentioned in <question> if any\n\
             - Choose and visit relevant URLs below for more knowledge. higher weight suggests more relevant:\n\
             <url-list>\n{}\n</url-list>\n</action-visit>",
            rendered
        ));
    }

    if permissions.search {
        let mut block = String::from(
            "<action-search>\n\
             - Use web search to find relevant information\n\
             - Build a search request based on the deep intention behind the original question and the expected answer format\n\
             - Always prefer a single search request, only add another request if the original question covers multiple aspects or elements and one query is not enough, each request focus on one specific aspect of the original question\n",
        );
        if !all_keywords.is_empty() {
            block.push_str(&format!(
                "- Avoid those unsuccessful search requests and queries:\n<bad-requests>\n{}\n</bad-requests>\n",
                all_keywords.join("\n")
            ));
        }
        block.push_str("</action-search>");
        actions.push(block);
    }

    if permissions.answer && !beast_mode {
        actions.push(
            "<action-answer>\n\
             - For greetings, casual conversation, general knowledge questions, answer them directly.\n\
             - If user ask you to retrieve previous messages or chat history, remember you do have access to the chat history, answer them directly.\n\
             - For all other questions, provide a verified answer.\n\
             - You provide deep, unexpected insights, identifying hidden patterns and connections, and creating \"aha moments.\".\n\
             - You break conventional thinking, establish unique cross-disciplinary connections, and bring new perspectives to the user.\n\
             - If uncertain, use <action-reflect>\n\
             </action-answer>"
                .to_string(),
        );
    }

    if beast_mode {
        actions.push(BEAST_MODE.to_string());
    }

    if permissions.reflect {
        actions.push(
            "<action-reflect>\n\
             - Think slowly and planning lookahead. Examine <question>, <context>, previous conversation with users to identify knowledge gaps.\n\
             - Reflect the gaps and plan a list key clarifying questions that deeply related to the original question and lead to the answer\n\
             </action-reflect>"
                .to_string(),
        );
    }

    if permissions.coding {
        actions.push(
            "<action-coding>\n\
             - This Python-based solution helps you handle programming tasks like counting, filtering, transforming, sorting, regex extraction, and data processing.\n\
             - Simply describe your problem in the \"codingIssue\" field. Include actual values for small inputs or variable names for larger datasets.\n\
             - No code writing is required, senior engineers will handle the implementation.\n\
             </action-coding>"
                .to_string(),
        );
    }

    sections.push(format!(
        "Based on the current context, you must choose one of the following actions:\n<actions>\n{}\n</actions>",
        actions.join("\n\n")
    ));
    sections.push("Think step by step, choose the action, then respond by matching the schema of that action.".into());

    AgentPrompt {
        system: remove_extra_line_breaks(&sections.join("\n\n")),
        url_list: url_list.iter().map(|u| u.url().to_string()).collect(),
    }
}
