//! 研究主循环
//!
//! 每步：选当前问题 -> 初始化评估维度 -> URL 排序 -> 重算许可位 -> LLM 结构化决策 -> 分派处理器。
//! token 用量达到常规预算（85%）后退出，未得到最终答案时进入 Beast Mode，最后统一做答案后处理。
//! 循环严格串行；单步内的搜索与抓取由 TaskScheduler 做有界并发。

use std::collections::HashMap;
use std::time::Duration;

use crate::config::AgentSection;
use crate::core::{
    AgentError, AgentState, EvaluationMetric, EvaluationType, Permissions, TaskContext, TaskScheduler,
    MAX_REFLECT_PER_STEP, SEARCH_SATURATION_URLS, URLS_PER_HOSTNAME,
};
use crate::llm::{EmbeddingProvider, ObjectGenerator, ToolName, DEFAULT_NUM_RETRIES};
use crate::memory::{compose_msgs, ActionTracker, TokenTracker, TokenUsage};
use crate::react::actions::{
    handle_answer, handle_coding, handle_reflect, handle_search, handle_visit, StepFlow,
};
use crate::react::events::{publish_quietly, ProgressPublisher, ResearchEvent};
use crate::react::evaluator::Evaluator;
use crate::react::finalize::{generate_final_answer, process_final_answer};
use crate::react::planner::{decode_step_action, AnswerAction, StepAction};
use crate::react::prompt::get_prompt;
use crate::react::schema::SchemaGen;
use crate::tools::url::{filter_urls, keep_k_per_hostname, rank_urls, relevance_scores};
use crate::tools::{BoostedSnippet, CodeSandbox, PageReader, SearchProvider};

/// 连续生成失败达到该次数时提前结束循环。
/// 输出不合 schema 的重试仍会计入 token 用量，只有 Provider 整体不可用时预算才不增长。
const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// 单个任务的运行环境：共享的 Provider 引用 + 任务私有的追踪器与生成器
pub struct TaskEnv<'a> {
    pub ctx: &'a TaskContext,
    pub options: AgentSection,
    pub search: &'a dyn SearchProvider,
    pub reader: &'a dyn PageReader,
    pub embedder: &'a dyn EmbeddingProvider,
    pub publisher: &'a dyn ProgressPublisher,
    pub generator: ObjectGenerator,
    pub evaluator: Evaluator,
    pub sandbox: CodeSandbox,
    pub tracker: TokenTracker,
    pub actions: ActionTracker,
    pub scheduler: TaskScheduler,
    pub schema: SchemaGen,
}

impl<'a> TaskEnv<'a> {
    pub fn publish(&self, event: ResearchEvent) {
        publish_quietly(self.publisher, &self.ctx.task_id, event);
    }

    pub fn think(&self, text: impl Into<String>) {
        self.publish(ResearchEvent::think(text));
    }

    pub fn step_sleep(&self) -> Duration {
        Duration::from_millis(self.options.step_sleep_ms)
    }
}

/// 为问题排序候选 URL：过滤 -> 嵌入相关度 -> 打分排序 -> 每主机名限量
pub async fn rank_candidate_urls(
    env: &TaskEnv<'_>,
    state: &mut AgentState,
    question: &str,
) -> Vec<BoostedSnippet> {
    let candidates = filter_urls(
        &state.all_urls,
        &state.visited_urls,
        &env.options.bad_hostnames,
        &env.options.only_hostnames,
    );
    let relevance = match relevance_scores(
        env.embedder,
        env.ctx,
        question,
        &candidates,
        &mut state.embedding_cache,
    )
    .await
    {
        Ok((scores, tokens)) => {
            if tokens > 0 {
                env.tracker.track_usage("embeddings", TokenUsage::new(tokens, 0));
            }
            scores
        }
        Err(e) => {
            tracing::warn!(error = %e, "Relevance scoring failed, ranking without it");
            HashMap::new()
        }
    };
    keep_k_per_hostname(
        rank_urls(candidates, &env.options.boost_hostnames, &relevance),
        URLS_PER_HOSTNAME,
    )
}

/// 首次遇到问题时初始化评估维度：原始问题由评估器判定并追加 strict，子问题为空列表
async fn init_evaluation_metrics(env: &TaskEnv<'_>, state: &mut AgentState, question: &str) {
    if state.is_original_question(question) && state.total_step == 1 {
        let mut types = env.evaluator.evaluate_question(env.ctx, question).await;
        types.push(EvaluationType::Strict);
        env.publish(ResearchEvent::QuestionEvaluation {
            question: question.to_string(),
            metrics: types.iter().map(|t| t.as_str().to_string()).collect(),
        });
        let metrics = types
            .into_iter()
            .map(|kind| EvaluationMetric {
                kind,
                num_evals_required: env.options.max_bad_attempts,
            })
            .collect();
        state.evaluation_metrics.insert(question.to_string(), metrics);
    } else if !state.is_original_question(question) {
        state
            .evaluation_metrics
            .entry(question.to_string())
            .or_default();
    }
}

/// 请求本步决策
async fn determine_next_action(
    env: &TaskEnv<'_>,
    state: &AgentState,
    question: &str,
) -> Result<StepAction, AgentError> {
    let prompt = get_prompt(
        &state.diary,
        &state.all_keywords,
        &state.permissions,
        &state.weighted_urls,
        false,
    );
    let schema = env
        .schema
        .agent_schema(&state.permissions, prompt.url_list.len());
    let pip: &[String] = if state.is_original_question(question) {
        &state.final_answer_pip
    } else {
        &[]
    };
    let messages = compose_msgs(&state.messages, &state.knowledge, question, pip);
    let value = env
        .generator
        .generate_value(
            env.ctx,
            ToolName::Agent,
            &schema,
            &prompt.system,
            &messages,
            DEFAULT_NUM_RETRIES,
        )
        .await?;
    let action = decode_step_action(&value)?;
    if !state.permissions.allows(action.kind()) {
        return Err(AgentError::SchemaViolation(format!(
            "action '{}' is not allowed in this step",
            action.kind().as_str()
        )));
    }
    Ok(action)
}

/// 主循环；返回时 state.this_step 为最后一步动作
pub async fn run_main_loop(env: &TaskEnv<'_>, state: &mut AgentState) {
    let mut consecutive_failures = 0;
    while env.tracker.within_regular_budget() {
        state.step += 1;
        state.total_step += 1;
        tracing::info!(
            task_id = %env.ctx.task_id,
            step = state.total_step,
            budget_used = format!("{:.2}%", env.tracker.used_percentage()),
            gaps = state.gaps.len(),
            "Research step"
        );

        state.permissions.reflect &= state.gaps.len() <= MAX_REFLECT_PER_STEP;
        let question = state.current_question();

        init_evaluation_metrics(env, state, &question).await;
        let needs_freshness = state
            .evaluation_metrics
            .get(&question)
            .is_some_and(|m| m.iter().any(|e| e.kind == EvaluationType::Freshness));
        if state.total_step == 1 && needs_freshness {
            state.permissions.answer = false;
            state.permissions.reflect = false;
        }

        state.weighted_urls = rank_candidate_urls(env, state, &question).await;
        state.permissions.read &= !state.weighted_urls.is_empty();
        state.permissions.search &= state.weighted_urls.len() < SEARCH_SATURATION_URLS;

        let action = match determine_next_action(env, state, &question).await {
            Ok(a) => {
                consecutive_failures = 0;
                a
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(step = state.total_step, error = %e, "Failed to determine next action, skipping step");
                env.publish(ResearchEvent::error(format!(
                    "Step {}: failed to decide next action: {}",
                    state.total_step, e
                )));
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(failures = consecutive_failures, "Action generation keeps failing, leaving main loop");
                    break;
                }
                tokio::time::sleep(env.step_sleep()).await;
                continue;
            }
        };

        let allowed: Vec<&str> = state.permissions.allowed().iter().map(|k| k.as_str()).collect();
        tracing::info!(
            question = %question,
            action = action.kind().as_str(),
            allowed = %allowed.join(", "),
            "Action chosen"
        );
        env.actions
            .track_action(state.total_step, action.kind().as_str(), action.think(), &state.gaps);
        env.think(action.think());
        state.this_step = Some(action.clone());

        state.permissions = Permissions::all();

        let flow = match action {
            StepAction::Answer(a) => handle_answer(env, state, a, &question).await,
            StepAction::Search(a) => handle_search(env, state, a, &question).await,
            StepAction::Visit(a) => handle_visit(env, state, a).await,
            StepAction::Reflect(a) => handle_reflect(env, state, a, &question).await,
            StepAction::Coding(a) => handle_coding(env, state, a).await,
        };
        if flow == StepFlow::Break {
            break;
        }

        tokio::time::sleep(env.step_sleep()).await;
    }
}

/// 完整执行：主循环 -> 必要时 Beast Mode -> 答案后处理
pub async fn run_research(env: &TaskEnv<'_>, state: &mut AgentState) -> AnswerAction {
    run_main_loop(env, state).await;

    let mut answer = match state.this_step.take() {
        Some(StepAction::Answer(a)) if a.is_final => a,
        _ => {
            tracing::info!(
                budget_used = format!("{:.2}%", env.tracker.used_percentage()),
                "No final answer from main loop, entering beast mode"
            );
            env.think("Entering beast mode to produce the final answer");
            generate_final_answer(env, state).await
        }
    };

    process_final_answer(env, state, &mut answer).await;
    state.this_step = Some(StepAction::Answer(answer.clone()));
    answer
}
