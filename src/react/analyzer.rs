//! 错误分析：主问题答案评审失败后，回顾本轮步骤日志并总结教训

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{AgentError, TaskContext};
use crate::llm::{ObjectGenerator, ToolName};
use crate::memory::Message;

/// 对本轮步骤的复盘
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ErrorAnalysis {
    /// Summarize the key actions in chronological order and the pattern they followed
    pub recap: String,
    /// Point out which specific steps or patterns led to the inadequate answer
    pub blame: String,
    /// Concrete, actionable suggestions for the next attempt
    pub improvement: String,
}

const SYSTEM: &str = "You are an expert at analyzing search and reasoning processes. \
Review the sequence of steps below, which ended with an answer the evaluator rejected.\n\
1. Recap the key actions chronologically and the pattern they followed.\n\
2. Blame the specific steps that caused the bad answer, such as repetitive queries or skipped verification.\n\
3. Suggest improvements that would lead to a better answer next time.";

/// 分析步骤日志
pub async fn analyze_steps(
    generator: &ObjectGenerator,
    ctx: &TaskContext,
    diary: &[String],
) -> Result<ErrorAnalysis, AgentError> {
    let steps = diary
        .iter()
        .enumerate()
        .map(|(i, d)| format!("<step-{n}>\n{}\n</step-{n}>", d.trim(), n = i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let analysis: ErrorAnalysis = generator
        .generate(
            ctx,
            ToolName::ErrorAnalyzer,
            SYSTEM,
            &[Message::user(format!("<steps>\n{}\n</steps>", steps))],
        )
        .await?;
    tracing::debug!(blame = %analysis.blame, "Steps analyzed");
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedLlmClient, ToolModels};
    use crate::memory::TokenTracker;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_analyze_steps_sends_numbered_steps() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            r#"{"recap":"searched twice","blame":"no visit","improvement":"read sources"}"#,
        ]));
        let gen = ObjectGenerator::new(ToolModels::single(client.clone()), TokenTracker::new(10_000));
        let diary = vec!["searched a".to_string(), "answered".to_string()];
        let out = analyze_steps(&gen, &TaskContext::new("t"), &diary).await.unwrap();
        assert_eq!(out.blame, "no visit");
        let calls = client.calls();
        let last = calls[0].last().unwrap();
        assert!(last.content.contains("<step-2>\nanswered\n</step-2>"));
    }
}
