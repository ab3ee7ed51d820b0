//! Evaluator：问题评估与答案多维度评审
//!
//! evaluate_question 判断一个问题适用哪些评估维度；evaluate_answer 按维度顺序逐项评审，
//! 第一个未通过的维度即为结果。评审使用独立的 evaluator 模型（ToolName::Evaluator），避免自我认同。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, EvaluationType, TaskContext};
use crate::llm::{ObjectGenerator, ToolName};
use crate::memory::{KnowledgeItem, Message};
use crate::react::planner::AnswerAction;

/// 单次评审结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResponse {
    #[serde(rename = "type")]
    pub kind: EvaluationType,
    pub pass: bool,
    pub think: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_plan: Option<String>,
}

impl EvaluationResponse {
    /// 没有评估维度时的默认结果：通过
    pub fn default_pass() -> Self {
        Self {
            kind: EvaluationType::Strict,
            pass: true,
            think: "Evaluation skipped or passed by default.".into(),
            improvement_plan: None,
        }
    }

    /// 评审调用本身失败时按 strict 未通过处理
    pub fn from_error(err: &AgentError) -> Self {
        Self {
            kind: EvaluationType::Strict,
            pass: false,
            think: format!("Evaluation failed with error: {}", err),
            improvement_plan: None,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct QuestionEvaluation {
    /// Explain which checks the question needs and why, briefly
    think: String,
    /// The question asks for a definitive, certain answer
    needs_definitive: bool,
    /// The answer depends on up-to-date information
    needs_freshness: bool,
    /// The question asks for several items or examples
    needs_plurality: bool,
    /// The question names multiple aspects that must all be covered
    needs_completeness: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct Verdict {
    /// Step-by-step reasoning behind the verdict
    think: String,
    /// Whether the answer passes this check
    pass: bool,
    /// Concrete, actionable steps to improve the answer; required when it fails
    #[serde(default)]
    improvement_plan: Option<String>,
}

const QUESTION_SYSTEM: &str = "You are an evaluator that determines which checks a question requires.\n\
- definitive: almost always true, except for opinion-based or purely hypothetical questions.\n\
- freshness: the answer depends on recent events, prices, versions, schedules or anything that changes over time.\n\
- plurality: the question explicitly asks for multiple items, examples or a specific count.\n\
- completeness: the question explicitly names several elements that all need to be addressed.\n\
Greetings and casual chat need no checks.";

fn criteria(kind: EvaluationType) -> &'static str {
    match kind {
        EvaluationType::Definitive => {
            "Check whether the answer is definitive. It fails if it contains hedging, \
             says the information is unavailable, or asks the user for more context instead of answering."
        }
        EvaluationType::Freshness => {
            "Check whether the answer is based on sufficiently recent information for the question, \
             given today's date. It fails if it relies on outdated facts or gives no time frame where one matters."
        }
        EvaluationType::Plurality => {
            "Check whether the answer provides the number of items the question asks for. \
             It fails if it gives fewer items than requested or only a single example when several are expected."
        }
        EvaluationType::Completeness => {
            "Check whether the answer addresses every aspect explicitly named in the question. \
             It fails if any named aspect is missing."
        }
        EvaluationType::Strict => {
            "You are a ruthless reviewer. Find every weakness in the answer: missing depth, unsupported claims, \
             lack of specifics or insight. Only pass an answer that is truly excellent, otherwise fail it and \
             give a detailed improvement plan starting with \"For the best answer, you must...\"."
        }
    }
}

/// 答案评估器
#[derive(Clone)]
pub struct Evaluator {
    generator: ObjectGenerator,
}

impl Evaluator {
    pub fn new(generator: ObjectGenerator) -> Self {
        Self { generator }
    }

    /// 判断问题适用的评估维度；失败时返回空列表
    pub async fn evaluate_question(&self, ctx: &TaskContext, question: &str) -> Vec<EvaluationType> {
        let messages = [Message::user(question.trim())];
        let result: Result<QuestionEvaluation, _> = self
            .generator
            .generate(ctx, ToolName::Evaluator, QUESTION_SYSTEM, &messages)
            .await;
        match result {
            Ok(e) => {
                let mut types = Vec::new();
                if e.needs_definitive {
                    types.push(EvaluationType::Definitive);
                }
                if e.needs_freshness {
                    types.push(EvaluationType::Freshness);
                }
                if e.needs_plurality {
                    types.push(EvaluationType::Plurality);
                }
                if e.needs_completeness {
                    types.push(EvaluationType::Completeness);
                }
                tracing::debug!(think = %e.think, ?types, "Question evaluated");
                types
            }
            Err(e) => {
                tracing::warn!(error = %e, "Question evaluation failed, using no metrics");
                Vec::new()
            }
        }
    }

    fn answer_prompt(
        kind: EvaluationType,
        question: &str,
        answer: &AnswerAction,
        knowledge: &[KnowledgeItem],
    ) -> (String, String) {
        let system = format!(
            "Current date: {}\n\n{}",
            chrono::Utc::now().format("%Y-%m-%d"),
            criteria(kind)
        );
        let mut user = format!(
            "<question>\n{}\n</question>\n\n<answer>\n{}\n</answer>",
            question.trim(),
            answer.answer
        );
        if kind == EvaluationType::Strict && !knowledge.is_empty() {
            user.push_str("\n\nThe answer was written with the following knowledge:\n<knowledge>\n");
            for k in knowledge {
                user.push_str(&format!("- {}: {}\n", k.question, k.answer));
            }
            user.push_str("</knowledge>");
        }
        (system, user)
    }

    /// 按维度顺序评审答案，返回第一个未通过的结果；全部通过时返回最后一个结果
    pub async fn evaluate_answer(
        &self,
        ctx: &TaskContext,
        question: &str,
        answer: &AnswerAction,
        types: &[EvaluationType],
        knowledge: &[KnowledgeItem],
    ) -> Result<EvaluationResponse, AgentError> {
        let mut last = EvaluationResponse::default_pass();
        for &kind in types {
            let (system, user) = Self::answer_prompt(kind, question, answer, knowledge);
            let verdict: Verdict = self
                .generator
                .generate(ctx, ToolName::Evaluator, &system, &[Message::user(user)])
                .await?;
            tracing::info!(kind = kind.as_str(), pass = verdict.pass, "Answer evaluated");
            last = EvaluationResponse {
                kind,
                pass: verdict.pass,
                think: verdict.think,
                improvement_plan: verdict.improvement_plan.filter(|p| !p.trim().is_empty()),
            };
            if !last.pass {
                break;
            }
        }
        Ok(last)
    }
}
