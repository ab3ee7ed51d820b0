//! reflect：子问题与历史问题去重后加入 gaps

use crate::core::{AgentState, MAX_REFLECT_PER_STEP};
use crate::react::actions::{StepFlow, THINK_DIFFERENTLY};
use crate::react::loop_::TaskEnv;
use crate::react::planner::{ReflectAction, StepAction};
use crate::tools::dedup_queries;
use crate::tools::markdown::choose_k;

pub async fn handle_reflect(
    env: &TaskEnv<'_>,
    state: &mut AgentState,
    action: ReflectAction,
    question: &str,
) -> StepFlow {
    let unique = dedup_queries(
        env.embedder,
        env.ctx,
        &action.questions_to_answer,
        &state.all_questions,
        Some(&env.tracker),
    )
    .await;
    let new_gaps = choose_k(&unique, MAX_REFLECT_PER_STEP);

    if !new_gaps.is_empty() {
        tracing::info!(new_gaps = ?new_gaps, "Sub-questions added");
        let listed = new_gaps
            .iter()
            .map(|q| format!("- {}", q))
            .collect::<Vec<_>>()
            .join("\n");
        state.diary.push(format!(
            "At step {}, you took **reflect** and think about the knowledge gaps. You found some sub-questions are important to the question: \"{}\"\n\
             You realize you need to know the answers to the following sub-questions:\n{}\n\n\
             You will now figure out the answers to these sub-questions and see if they can help you find the answer to the original question.",
            state.step, question, listed
        ));
        state.gaps.extend(new_gaps.iter().cloned());
        state.all_questions.extend(new_gaps.iter().cloned());
        state.record_step(
            question,
            StepAction::Reflect(ReflectAction {
                think: action.think,
                questions_to_answer: new_gaps,
            }),
            None,
        );
    } else {
        state.diary.push(format!(
            "At step {}, you took **reflect** and think about the knowledge gaps. You tried to break down the question \"{}\" into sub-questions like this: {}\n\
             But then you realized you have asked them before or they were duplicates. You decided to to think out of the box or cut from a completely different angle.",
            state.step,
            question,
            action.questions_to_answer.join(", ")
        ));
        state.record_step(
            question,
            StepAction::Reflect(ReflectAction {
                think: action.think,
                questions_to_answer: Vec::new(),
            }),
            Some(format!(
                "You have tried all possible questions and found no useful information. {}",
                THINK_DIFFERENTLY
            )),
        );
    }

    state.permissions.reflect = false;
    StepFlow::Continue
}
