//! answer：简单问题直答 / 多维度评审 / 主问题与子问题分别处理
//!
//! 主问题未通过时扣减失败维度的剩余次数，维度耗尽即放弃（is_final=false）并交给 Beast Mode；
//! 否则做一次步骤复盘写入知识，清空日志开始新一轮。子问题失败不消耗重试次数。

use crate::core::{AgentState, EvaluationType};
use crate::memory::KnowledgeItem;
use crate::react::actions::StepFlow;
use crate::react::analyzer::analyze_steps;
use crate::react::evaluator::EvaluationResponse;
use crate::react::loop_::TaskEnv;
use crate::react::planner::{AnswerAction, StepAction};

fn finish(state: &mut AgentState, question: &str, action: AnswerAction, result: Option<String>) {
    state.this_step = Some(StepAction::Answer(action.clone()));
    state.record_step(question, StepAction::Answer(action), result);
}

pub async fn handle_answer(
    env: &TaskEnv<'_>,
    state: &mut AgentState,
    mut action: AnswerAction,
    question: &str,
) -> StepFlow {
    env.think(format!("Step {}: answering", state.total_step));

    if state.total_step == 1 && !env.options.no_direct_answer {
        tracing::info!("Direct answer accepted on first step");
        action.is_final = true;
        state.trivial_question = true;
        finish(state, question, action, None);
        return StepFlow::Break;
    }

    let types: Vec<EvaluationType> = state
        .evaluation_metrics
        .get(question)
        .map(|metrics| {
            metrics
                .iter()
                .filter(|m| m.num_evals_required > 0)
                .map(|m| m.kind)
                .collect()
        })
        .unwrap_or_default();

    let evaluation = if types.is_empty() {
        EvaluationResponse::default_pass()
    } else {
        env.actions.track_think("Evaluating the answer");
        match env
            .evaluator
            .evaluate_answer(env.ctx, question, &action, &types, &state.knowledge)
            .await
        {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Answer evaluation failed, counting as strict failure");
                EvaluationResponse::from_error(&e)
            }
        }
    };
    let verdict = serde_json::to_string(&evaluation).ok();

    if state.is_original_question(question) {
        if evaluation.pass {
            state.diary.push(format!(
                "At step {}, you took **answer** action and finally found the answer to the original question:\n\
                 Original question: {}\n\
                 Your answer: {}\n\
                 The evaluator thinks your answer is good because: {}\n\
                 Your journey ends here. Congratulations! 🎉",
                state.step, question, action.answer, evaluation.think
            ));
            action.is_final = true;
            finish(state, question, action, verdict);
            return StepFlow::Break;
        }

        state.diary.push(format!(
            "At step {}, you took **answer** action but evaluator thinks it is not a good answer:\n\
             Original question: {}\n\
             Your answer: {}\n\
             The evaluator thinks your answer is bad because: {}",
            state.step, question, action.answer, evaluation.think
        ));
        env.think(format!("Step {}: answer to the main question rejected", state.total_step));
        tracing::info!(kind = evaluation.kind.as_str(), "Main question answer rejected");

        let remaining = {
            let metrics = state.evaluation_metrics.entry(question.to_string()).or_default();
            for m in metrics.iter_mut() {
                if m.kind == evaluation.kind {
                    m.num_evals_required = m.num_evals_required.saturating_sub(1);
                }
            }
            metrics.retain(|m| m.num_evals_required > 0);
            metrics.len()
        };

        if evaluation.kind == EvaluationType::Strict {
            if let Some(plan) = &evaluation.improvement_plan {
                state.final_answer_pip.push(plan.clone());
            }
        }

        if remaining == 0 {
            tracing::warn!(question, "No evaluation attempts left for the main question");
            action.is_final = false;
            finish(state, question, action, verdict);
            return StepFlow::Break;
        }

        let reflection = match analyze_steps(&env.generator, env.ctx, &state.diary).await {
            Ok(analysis) => KnowledgeItem::qa(
                format!(
                    "Why is the following answer bad for the question? Please reflect\n<question>{}</question>\n<answer>{}</answer>",
                    question, action.answer
                ),
                format!(
                    "{}\n\n{}\n\n{}\n\n{}",
                    evaluation.think, analysis.recap, analysis.blame, analysis.improvement
                ),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Step analysis failed");
                KnowledgeItem::qa(
                    format!(
                        "Reflection on why the answer failed evaluation for question: {}",
                        question
                    ),
                    format!(
                        "The answer was evaluated as needing improvement for reason: {}. Step analysis failed.",
                        evaluation.think
                    ),
                )
            }
        };
        state.knowledge.push(reflection);

        state.diary.clear();
        state.step = 0;
        state.permissions.answer = false;
        state.record_step(question, StepAction::Answer(action), verdict);
        return StepFlow::Continue;
    }

    if evaluation.pass {
        state.diary.push(format!(
            "At step {}, you took **answer** action. You found a good answer to the sub-question:\n\
             Sub-question: {}\n\
             Your answer: {}\n\
             The evaluator thinks your answer is good because: {}\n\
             Adding this to knowledge.",
            state.step, question, action.answer, evaluation.think
        ));
        state
            .knowledge
            .push(KnowledgeItem::qa(question, action.answer.clone()).stamped());
        state.remove_gap(question);
    } else {
        state.diary.push(format!(
            "At step {}, you took **answer** action for the sub-question: {}.\n\
             Your answer: {}\n\
             However, the evaluator thinks your answer is bad because: {}\n\
             This answer will not be added to the knowledge base.",
            state.step, question, action.answer, evaluation.think
        ));
    }
    state.record_step(question, StepAction::Answer(action), verdict);
    StepFlow::Continue
}
