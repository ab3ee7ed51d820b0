//! coding：交给代码沙箱生成并执行程序，输出写入 coding 知识

use crate::core::AgentState;
use crate::memory::{select_knowledge, KnowledgeItem, KnowledgeKind, TokenEstimator};
use crate::react::actions::{StepFlow, THINK_DIFFERENTLY};
use crate::react::loop_::TaskEnv;
use crate::react::planner::{CodingAction, StepAction};

/// 每条知识在沙箱上下文中的 token 上限
const CONTEXT_TOKENS_PER_ITEM: u64 = 300;

fn sandbox_context(state: &AgentState) -> String {
    select_knowledge(&state.knowledge)
        .into_iter()
        .map(|k| {
            format!(
                "<knowledge>\n{}\n{}\n</knowledge>",
                k.question,
                TokenEstimator::truncate(&k.answer, CONTEXT_TOKENS_PER_ITEM)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn handle_coding(env: &TaskEnv<'_>, state: &mut AgentState, action: CodingAction) -> StepFlow {
    let question = state.current_question();
    let context = sandbox_context(state);

    let result = match env.sandbox.solve(env.ctx, &action.coding_issue, &context).await {
        Ok(solution) => {
            state.knowledge.push(
                KnowledgeItem::new(
                    format!("What is the solution to the coding issue: {}?", action.coding_issue),
                    solution.output.clone(),
                    KnowledgeKind::Coding,
                )
                .with_source_code(solution.code)
                .stamped(),
            );
            state.diary.push(format!(
                "At step {}, you took the **coding** action and try to solve the coding issue: {}.\n\
                 You found the solution and add it to your knowledge for future reference.",
                state.step, action.coding_issue
            ));
            Some(format!("Output: {}", solution.output))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Coding issue not solved");
            state.diary.push(format!(
                "At step {}, you took the **coding** action and try to solve the coding issue: {}.\n\
                 But unfortunately, you failed to solve the issue. You need to think out of the box or cut from a completely different angle.",
                state.step, action.coding_issue
            ));
            Some(format!("Failed to solve coding issue: {}. {}", e, THINK_DIFFERENTLY))
        }
    };
    state.record_step(&question, StepAction::Coding(action), result);

    state.permissions.coding = false;
    StepFlow::Continue
}
