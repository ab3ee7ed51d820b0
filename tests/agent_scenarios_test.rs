//! 研究循环场景测试：全部使用 Mock Provider，不访问网络

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use deep_research::config::AgentSection;
use deep_research::core::{
    AgentError, AgentState, EvaluationMetric, EvaluationType, TaskContext, TaskScheduler,
    MAX_REFLECT_PER_STEP,
};
use deep_research::llm::{
    MockEmbedder, MockReader, MockSearch, ObjectGenerator, RecordingPublisher, ScriptedLlmClient,
    ToolModels, ToolName,
};
use deep_research::memory::{ActionTracker, KnowledgeKind, Message, TokenTracker};
use deep_research::react::actions::{
    handle_answer, handle_coding, handle_reflect, handle_search, handle_visit, StepFlow,
};
use deep_research::react::loop_::run_main_loop;
use deep_research::react::{
    AnswerAction, CodingAction, Evaluator, ReflectAction, ResearchEvent, SchemaGen, SearchAction,
    StepAction, TaskEnv, UrlTarget, VisitAction,
};
use deep_research::tools::url::normalize_url;
use deep_research::tools::{dedup_queries, CodeRunner, CodeSandbox, ProcessRunner, SearchResult};
use deep_research::{ResearchAgent, ResearchRequest};

const QUESTION: &str = "How tall is the Eiffel Tower?";
const PAGE_URL: &str = "https://example.com/eiffel";
const PAGE_TEXT: &str = "The Eiffel Tower in Paris is 330 metres tall including its antennas, \
and it was completed in 1889 for the World's Fair.";

fn options() -> AgentSection {
    AgentSection {
        step_sleep_ms: 0,
        no_direct_answer: true,
        ..AgentSection::default()
    }
}

fn question_eval(freshness: bool) -> String {
    json!({
        "think": "factual question",
        "needsDefinitive": false,
        "needsFreshness": freshness,
        "needsPlurality": false,
        "needsCompleteness": false
    })
    .to_string()
}

fn verdict(pass: bool) -> String {
    if pass {
        json!({"think": "well supported", "pass": true}).to_string()
    } else {
        json!({
            "think": "too shallow",
            "pass": false,
            "improvementPlan": "For the best answer, you must cite the measured height."
        })
        .to_string()
    }
}

fn answer_step(text: &str) -> String {
    json!({"think": "I know this", "action": "answer", "answer": {"answer": text}}).to_string()
}

/// Provider 集合；TaskEnv 借用其中的引用
struct Fixture {
    ctx: TaskContext,
    search: MockSearch,
    reader: MockReader,
    embedder: MockEmbedder,
    publisher: RecordingPublisher,
    runner: Arc<dyn CodeRunner>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            ctx: TaskContext::new("scenario"),
            search: MockSearch::new(),
            reader: MockReader::new(),
            embedder: MockEmbedder::new(),
            publisher: RecordingPublisher::new(),
            runner: Arc::new(ProcessRunner::new("python3", 5)),
        }
    }

    fn with_embedder(mut self, embedder: MockEmbedder) -> Self {
        self.embedder = embedder;
        self
    }

    fn with_reader(mut self, reader: MockReader) -> Self {
        self.reader = reader;
        self
    }

    fn with_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.runner = runner;
        self
    }

    fn env(&self, models: ToolModels, options: AgentSection) -> TaskEnv<'_> {
        let tracker = TokenTracker::new(options.token_budget);
        let generator = ObjectGenerator::new(models, tracker.clone());
        TaskEnv {
            ctx: &self.ctx,
            search: &self.search,
            reader: &self.reader,
            embedder: &self.embedder,
            publisher: &self.publisher,
            evaluator: Evaluator::new(generator.clone()),
            sandbox: CodeSandbox::new(generator.clone(), self.runner.clone(), 1),
            generator,
            tracker,
            actions: ActionTracker::new(),
            scheduler: TaskScheduler::new(options.max_concurrency, 0),
            schema: SchemaGen::for_question(QUESTION),
            options,
        }
    }
}

fn base_models() -> ToolModels {
    ToolModels::single(Arc::new(ScriptedLlmClient::failing()))
}

/// 固定返回一个结果的代码执行器
struct FixedRunner(Result<String, AgentError>);

#[async_trait]
impl CodeRunner for FixedRunner {
    async fn run(&self, _code: &str) -> Result<String, AgentError> {
        self.0.clone()
    }
}

#[tokio::test]
async fn test_tiny_budget_goes_straight_to_beast_mode() {
    let agent_llm = Arc::new(ScriptedLlmClient::named("agent", vec![answer_step("unused")]));
    let beast = Arc::new(ScriptedLlmClient::named(
        "beast",
        vec![answer_step("The Eiffel Tower is about 330 metres tall, antennas included.")],
    ));
    let models = base_models()
        .with_override(ToolName::Agent, agent_llm.clone())
        .with_override(ToolName::AgentBeastMode, beast.clone());
    let publisher = Arc::new(RecordingPublisher::new());
    let agent = ResearchAgent::new(
        models,
        Arc::new(MockSearch::new()),
        Arc::new(MockReader::new()),
        Arc::new(MockEmbedder::new()),
    )
    .with_options(options())
    .with_publisher(publisher.clone());

    let ctx = TaskContext::new("budget-1");
    let out = agent
        .process_research_task(&ctx, ResearchRequest::question(QUESTION).with_token_budget(1))
        .await
        .unwrap();

    assert!(out.result.is_final);
    assert!(out.result.answer.contains("330 metres"));
    assert!(out.result.md_answer.is_some());
    assert_eq!(agent_llm.call_count(), 0);
    assert_eq!(beast.call_count(), 1);
    assert!(out.visited_urls.is_empty());

    let events = publisher.events();
    assert!(events.iter().all(|(task, _)| task == "budget-1"));
    assert!(matches!(events.last(), Some((_, ResearchEvent::Complete { .. }))));
}

#[tokio::test]
async fn test_first_step_answer_is_accepted_as_trivial() {
    let agent_llm = Arc::new(ScriptedLlmClient::named(
        "agent",
        vec![answer_step("Hello! I am a research assistant, ask me anything.")],
    ));
    let evaluator = Arc::new(ScriptedLlmClient::named("evaluator", vec![question_eval(false)]));
    let models = base_models()
        .with_override(ToolName::Agent, agent_llm.clone())
        .with_override(ToolName::Evaluator, evaluator.clone());
    let agent = ResearchAgent::new(
        models,
        Arc::new(MockSearch::new()),
        Arc::new(MockReader::new()),
        Arc::new(MockEmbedder::new()),
    )
    .with_options(options())
    .with_publisher(Arc::new(RecordingPublisher::new()));

    let out = agent
        .process_research_task(
            &TaskContext::new("trivial"),
            ResearchRequest::question("hi there").with_no_direct_answer(false),
        )
        .await
        .unwrap();

    assert!(out.result.is_final);
    assert_eq!(out.result.answer, "Hello! I am a research assistant, ask me anything.");
    assert!(out.result.references.is_empty());
    assert_eq!(agent_llm.call_count(), 1);
    // 只有问题评估，没有答案评估
    assert_eq!(evaluator.call_count(), 1);
}

#[tokio::test]
async fn test_missing_question_is_rejected() {
    let agent = ResearchAgent::new(
        base_models(),
        Arc::new(MockSearch::new()),
        Arc::new(MockReader::new()),
        Arc::new(MockEmbedder::new()),
    );
    let err = agent
        .process_research_task(&TaskContext::new("empty"), ResearchRequest::from_messages(vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::InvalidQuestion(_)));
}

#[tokio::test]
async fn test_question_resolved_from_messages() {
    let beast = Arc::new(ScriptedLlmClient::named(
        "beast",
        vec![answer_step("Rust ownership moves values unless they implement Copy.")],
    ));
    let models = base_models().with_override(ToolName::AgentBeastMode, beast.clone());
    let agent = ResearchAgent::new(
        models,
        Arc::new(MockSearch::new()),
        Arc::new(MockReader::new()),
        Arc::new(MockEmbedder::new()),
    )
    .with_options(options());

    let messages = vec![
        Message::system("be precise"),
        Message::user("How does Rust ownership work?"),
    ];
    let out = agent
        .process_research_task(
            &TaskContext::new("msgs"),
            ResearchRequest::from_messages(messages).with_token_budget(1),
        )
        .await
        .unwrap();
    assert!(out.result.is_final);
    let prompt = beast.calls().remove(0);
    assert!(prompt
        .iter()
        .any(|m| m.content.contains("How does Rust ownership work?")));
}

#[tokio::test]
async fn test_passing_sub_question_becomes_knowledge() {
    let fx = Fixture::new();
    let env = fx.env(base_models(), options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    let sub = "When was the Eiffel Tower completed?";
    state.gaps.push(sub.to_string());
    state.all_questions.push(sub.to_string());
    state.evaluation_metrics.insert(sub.to_string(), Vec::new());
    state.total_step = 2;
    state.step = 2;

    let flow = handle_answer(
        &env,
        &mut state,
        AnswerAction::new("It was completed in 1889 for the World's Fair.", "from the page"),
        sub,
    )
    .await;

    assert_eq!(flow, StepFlow::Continue);
    assert_eq!(state.gaps, vec![QUESTION.to_string()]);
    let item = state.knowledge.last().unwrap();
    assert_eq!(item.kind, KnowledgeKind::Qa);
    assert_eq!(item.question, sub);
    assert_eq!(item.answer, "It was completed in 1889 for the World's Fair.");
    assert!(state.diary[0].contains("good answer to the sub-question"));
}

#[tokio::test]
async fn test_single_strict_failure_abandons_main_question() {
    let fx = Fixture::new();
    let agent_llm = Arc::new(ScriptedLlmClient::named(
        "agent",
        vec![answer_step("It is fairly tall, several hundred metres probably.")],
    ));
    let evaluator = Arc::new(ScriptedLlmClient::named(
        "evaluator",
        vec![question_eval(false), verdict(false)],
    ));
    let models = base_models()
        .with_override(ToolName::Agent, agent_llm)
        .with_override(ToolName::Evaluator, evaluator.clone());
    let env = fx.env(
        models,
        AgentSection {
            max_bad_attempts: 1,
            ..options()
        },
    );
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);

    run_main_loop(&env, &mut state).await;

    assert_eq!(state.total_step, 1);
    match &state.this_step {
        Some(StepAction::Answer(a)) => assert!(!a.is_final),
        other => panic!("unexpected last step {:?}", other),
    }
    assert!(state.evaluation_metrics[QUESTION].is_empty());
    assert_eq!(state.diary.len(), 1);
    assert!(state.diary[0].contains("not a good answer"));
    // 问题评估 + 一次 strict 评审
    assert_eq!(evaluator.call_count(), 2);
}

#[tokio::test]
async fn test_failed_evaluations_bounded_by_max_bad_attempts() {
    let fx = Fixture::new();
    let evaluator = Arc::new(ScriptedLlmClient::named("evaluator", vec![verdict(false)]));
    let models = base_models().with_override(ToolName::Evaluator, evaluator.clone());
    let env = fx.env(models, options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    state.evaluation_metrics.insert(
        QUESTION.to_string(),
        vec![EvaluationMetric {
            kind: EvaluationType::Strict,
            num_evals_required: 2,
        }],
    );
    state.total_step = 2;

    let answer = || AnswerAction::new("It is a tall tower in Paris, France.", "guess");
    let first = handle_answer(&env, &mut state, answer(), QUESTION).await;
    assert_eq!(first, StepFlow::Continue);
    assert_eq!(state.evaluation_metrics[QUESTION][0].num_evals_required, 1);
    assert_eq!(state.final_answer_pip.len(), 1);
    assert!(!state.permissions.answer);
    assert!(state.diary.is_empty());
    assert_eq!(state.step, 0);
    // 复盘失败时仍写入一条反思知识
    assert!(state.knowledge.iter().any(|k| k.kind == KnowledgeKind::Qa));

    state.total_step = 3;
    let second = handle_answer(&env, &mut state, answer(), QUESTION).await;
    assert_eq!(second, StepFlow::Break);
    match &state.this_step {
        Some(StepAction::Answer(a)) => assert!(!a.is_final),
        other => panic!("unexpected last step {:?}", other),
    }
    assert_eq!(evaluator.call_count(), 2);
}

#[tokio::test]
async fn test_freshness_question_cannot_answer_on_first_step() {
    let fx = Fixture::new();
    let agent_llm = Arc::new(ScriptedLlmClient::named("agent", vec![answer_step("Right now it is sunny.")]));
    let evaluator = Arc::new(ScriptedLlmClient::named("evaluator", vec![question_eval(true)]));
    let models = base_models()
        .with_override(ToolName::Agent, agent_llm.clone())
        .with_override(ToolName::Evaluator, evaluator);
    let env = fx.env(models, options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);

    run_main_loop(&env, &mut state).await;

    // answer 不在允许列表中：每步 3 次生成都被拒绝，连续 3 步失败后退出
    assert!(state.this_step.is_none());
    assert!(state.all_context.is_empty());
    assert_eq!(state.total_step, 3);
    assert_eq!(agent_llm.call_count(), 9);
    // 被拒绝的生成同样计入用量
    assert!(env.tracker.total_tokens() > 0);
    let metrics: Vec<EvaluationType> = state.evaluation_metrics[QUESTION].iter().map(|m| m.kind).collect();
    assert_eq!(metrics, vec![EvaluationType::Freshness, EvaluationType::Strict]);
}

#[tokio::test]
async fn test_loop_not_reentered_after_regular_budget() {
    let fx = Fixture::new();
    let agent_llm = Arc::new(ScriptedLlmClient::named(
        "agent",
        vec![json!({"think": "look it up", "action": "search", "search": {"searchRequests": ["eiffel tower height"]}}).to_string()],
    ));
    let evaluator = Arc::new(ScriptedLlmClient::named("evaluator", vec![question_eval(false)]));
    let models = base_models()
        .with_override(ToolName::Agent, agent_llm)
        .with_override(ToolName::Evaluator, evaluator);
    let env = fx.env(
        models,
        AgentSection {
            token_budget: 200,
            ..options()
        },
    );
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);

    let before = env.tracker.total_tokens();
    run_main_loop(&env, &mut state).await;

    assert_eq!(state.total_step, 1);
    assert!(env.tracker.total_tokens() >= before);
    assert!(env.tracker.total_tokens() >= env.tracker.regular_budget());
}

#[tokio::test]
async fn test_search_visit_answer_with_reference() {
    let search = Arc::new(MockSearch::new().with_fallback(vec![SearchResult {
        title: "Eiffel Tower facts".into(),
        url: "https://www.example.com/eiffel?utm_source=feed".into(),
        description: "Height and history of the tower".into(),
        date: None,
    }]));
    let reader = Arc::new(MockReader::new().with_page(PAGE_URL, "Eiffel Tower", PAGE_TEXT));
    let agent_llm = Arc::new(ScriptedLlmClient::named(
        "agent",
        vec![
            json!({"think": "need sources", "action": "search", "search": {"searchRequests": ["eiffel tower height"]}}).to_string(),
            json!({"think": "read the top hit", "action": "visit", "visit": {"URLTargets": [1]}}).to_string(),
            answer_step(PAGE_TEXT),
        ],
    ));
    let evaluator = Arc::new(ScriptedLlmClient::named(
        "evaluator",
        vec![question_eval(false), verdict(true)],
    ));
    let models = base_models()
        .with_override(ToolName::Agent, agent_llm.clone())
        .with_override(ToolName::Evaluator, evaluator);
    let publisher = Arc::new(RecordingPublisher::new());
    let agent = ResearchAgent::new(models, search.clone(), reader.clone(), Arc::new(MockEmbedder::new()))
        .with_options(options())
        .with_publisher(publisher.clone());

    let out = agent
        .process_research_task(&TaskContext::new("full"), ResearchRequest::question(QUESTION))
        .await
        .unwrap();

    assert!(out.result.is_final);
    assert_eq!(agent_llm.call_count(), 3);
    assert_eq!(search.queries(), vec!["eiffel tower height".to_string()]);
    assert_eq!(reader.reads(), vec![PAGE_URL.to_string()]);
    assert_eq!(out.read_urls, vec![PAGE_URL.to_string()]);
    assert_eq!(out.all_urls, vec![PAGE_URL.to_string()]);

    assert_eq!(out.result.references.len(), 1);
    let reference = &out.result.references[0];
    assert_eq!(reference.url, PAGE_URL);
    assert_eq!(reference.title.as_deref(), Some("Eiffel Tower facts"));
    let md = out.result.md_answer.as_deref().unwrap();
    assert!(md.contains("[^1]"));
    assert!(md.contains(PAGE_URL));

    let kinds = publisher.kinds();
    assert!(kinds.contains(&"search_query"));
    assert!(kinds.contains(&"visit_url"));
    assert!(kinds.contains(&"read_content"));
    assert_eq!(kinds.last(), Some(&"complete"));

    let steps: Vec<String> = out
        .actions
        .iter()
        .filter_map(|e| match serde_json::to_value(e).ok()? {
            v if v["kind"] == "action" => v["action"].as_str().map(String::from),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec!["search", "visit", "answer"]);
}

#[tokio::test]
async fn test_visited_urls_never_repeat() {
    let search = Arc::new(MockSearch::new().with_fallback(vec![
        SearchResult {
            title: "A".into(),
            url: "https://a.com/page".into(),
            description: "page a".into(),
            date: None,
        },
        SearchResult {
            title: "A again".into(),
            url: "https://www.a.com/page/".into(),
            description: "page a duplicate".into(),
            date: None,
        },
    ]));
    let reader = Arc::new(MockReader::new().with_page("https://a.com/page", "A", PAGE_TEXT));
    let visit = json!({"think": "read it", "action": "visit", "visit": {"URLTargets": [1, "https://a.com/page"]}}).to_string();
    let agent_llm = Arc::new(ScriptedLlmClient::named(
        "agent",
        vec![
            json!({"think": "search", "action": "search", "search": {"searchRequests": ["page a"]}}).to_string(),
            visit,
            answer_step(PAGE_TEXT),
        ],
    ));
    let evaluator = Arc::new(ScriptedLlmClient::named(
        "evaluator",
        vec![question_eval(false), verdict(true)],
    ));
    let models = base_models()
        .with_override(ToolName::Agent, agent_llm)
        .with_override(ToolName::Evaluator, evaluator);
    let agent = ResearchAgent::new(models, search, reader.clone(), Arc::new(MockEmbedder::new()))
        .with_options(options());

    let out = agent
        .process_research_task(&TaskContext::new("dup"), ResearchRequest::question(QUESTION))
        .await
        .unwrap();

    assert_eq!(reader.reads(), vec!["https://a.com/page".to_string()]);
    let unique: HashSet<&String> = out.read_urls.iter().collect();
    assert_eq!(unique.len(), out.read_urls.len());
    assert_eq!(out.all_urls.len(), 1);
}

#[tokio::test]
async fn test_near_identical_queries_deduplicated() {
    let embedder = MockEmbedder::new();
    let ctx = TaskContext::new("dedup");
    let queries = vec!["capital of France".to_string(), "France capital".to_string()];
    let unique = dedup_queries(&embedder, &ctx, &queries, &[], None).await;
    assert_eq!(unique, vec!["capital of France".to_string()]);
}

#[tokio::test]
async fn test_dedup_is_idempotent() {
    let embedder = MockEmbedder::new();
    let ctx = TaskContext::new("dedup");
    let existing = vec!["rust async runtime".to_string()];
    let queries: Vec<String> = [
        "tokio runtime internals",
        "runtime async rust",
        "internals of the tokio runtime",
        "green threads history",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let once = dedup_queries(&embedder, &ctx, &queries, &existing, None).await;
    let twice = dedup_queries(&embedder, &ctx, &once, &existing, None).await;
    assert_eq!(once, twice);
    assert!(!once.contains(&"runtime async rust".to_string()));
}

#[tokio::test]
async fn test_reflect_dedups_and_caps_sub_questions() {
    let fx = Fixture::new();
    let env = fx.env(base_models(), options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    let known = "When was the Eiffel Tower built?";
    state.all_questions.push(known.to_string());
    state.permissions.reflect = true;

    let action = ReflectAction {
        think: "break it down".into(),
        questions_to_answer: vec![
            known.to_string(),
            "Who designed the Eiffel Tower?".into(),
            "What material is the Eiffel Tower made of?".into(),
            "How much does a ticket cost?".into(),
        ],
    };
    let flow = handle_reflect(&env, &mut state, action, QUESTION).await;

    assert_eq!(flow, StepFlow::Continue);
    let added = vec![
        "Who designed the Eiffel Tower?".to_string(),
        "What material is the Eiffel Tower made of?".to_string(),
    ];
    assert_eq!(state.gaps[1..], added[..]);
    assert_eq!(state.all_questions.len(), 2 + MAX_REFLECT_PER_STEP);
    assert!(state.all_questions.ends_with(&added));
    assert!(!state.permissions.reflect);
    assert!(state.diary[0].contains("sub-questions"));
    match &state.all_context.last().unwrap().action {
        StepAction::Reflect(r) => assert_eq!(r.questions_to_answer, added),
        other => panic!("unexpected step {:?}", other),
    }
}

#[tokio::test]
async fn test_reflect_with_only_known_questions_is_unproductive() {
    let fx = Fixture::new();
    let env = fx.env(base_models(), options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    state.permissions.reflect = true;

    let action = ReflectAction {
        think: "again".into(),
        questions_to_answer: vec![QUESTION.to_string()],
    };
    handle_reflect(&env, &mut state, action, QUESTION).await;

    assert_eq!(state.gaps, vec![QUESTION.to_string()]);
    assert_eq!(state.all_questions, vec![QUESTION.to_string()]);
    assert!(!state.permissions.reflect);
    assert!(state.diary[0].contains("asked them before"));
    let record = state.all_context.last().unwrap();
    assert!(record.result.as_deref().unwrap_or_default().contains("think out of the box"));
}

#[tokio::test]
async fn test_visit_keeps_going_when_one_page_fails() {
    let good = "https://a.com/page";
    let missing = "https://b.com/missing";
    let fx = Fixture::new().with_reader(MockReader::new().with_page(good, "A", PAGE_TEXT));
    let env = fx.env(base_models(), options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    state.permissions.read = true;

    let action = VisitAction {
        think: "read both".into(),
        url_targets: vec![UrlTarget::Url(good.into()), UrlTarget::Url(missing.into())],
    };
    handle_visit(&env, &mut state, action).await;

    let missing = normalize_url(missing).unwrap();
    assert_eq!(state.bad_urls, vec![missing.clone()]);
    assert!(state.visited_urls.contains(&missing));
    assert!(state.visited_urls.contains(&good.to_string()));
    assert_eq!(state.read_urls(), vec![good.to_string()]);
    assert!(state.web_contents.contains_key(good));
    assert!(!state.web_contents.contains_key(&missing));
    let pages: Vec<_> = state.knowledge.iter().filter(|k| k.kind == KnowledgeKind::Url).collect();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].references[0].url, good);
    assert!(state.diary[0].contains("deep dive"));
    assert!(!state.permissions.read);
}

#[tokio::test]
async fn test_search_without_results_is_a_dead_end() {
    let fx = Fixture::new();
    let env = fx.env(base_models(), options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    state.permissions.search = true;

    let action = SearchAction {
        think: "look it up".into(),
        search_requests: vec!["eiffel tower height".into()],
    };
    handle_search(&env, &mut state, action, QUESTION).await;

    assert!(state.all_keywords.is_empty());
    assert!(state.all_urls.is_empty());
    assert!(state.diary[0].contains("No new information is returned"));
    let record = state.all_context.last().unwrap();
    assert!(record.result.as_deref().unwrap_or_default().contains("tried all possible queries"));
    assert!(!state.permissions.search);
    assert!(!state.permissions.answer);
}

#[tokio::test]
async fn test_search_never_repeats_known_query_when_embeddings_fail() {
    let fx = Fixture::new().with_embedder(MockEmbedder::failing());
    let rewriter = Arc::new(ScriptedLlmClient::named(
        "rewriter",
        vec![json!({"think": "same again", "queries": [{"q": "eiffel height"}]}).to_string()],
    ));
    let models = base_models().with_override(ToolName::QueryRewriter, rewriter);
    let env = fx.env(models, options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    state.all_keywords.push("eiffel height".into());

    let action = SearchAction {
        think: "look it up".into(),
        search_requests: vec!["eiffel height".into(), "Eiffel Height ".into()],
    };
    handle_search(&env, &mut state, action, QUESTION).await;

    assert!(fx.search.queries().is_empty());
    assert_eq!(state.all_keywords, vec!["eiffel height".to_string()]);
    assert!(state.diary[0].contains("No new information is returned"));
}

#[tokio::test]
async fn test_coding_success_adds_knowledge_with_source() {
    let fx = Fixture::new().with_runner(Arc::new(FixedRunner(Ok("324".into()))));
    let coder = Arc::new(ScriptedLlmClient::named(
        "coder",
        vec![json!({"think": "add the parts", "code": "print(300 + 24)"}).to_string()],
    ));
    let models = base_models().with_override(ToolName::CodeGenerator, coder);
    let env = fx.env(models, options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    state.permissions.coding = true;

    let action = CodingAction {
        think: "sum the heights".into(),
        coding_issue: "Add 300 m of structure and 24 m of antenna".into(),
    };
    handle_coding(&env, &mut state, action).await;

    let item = state.knowledge.last().unwrap();
    assert_eq!(item.kind, KnowledgeKind::Coding);
    assert_eq!(item.answer, "324");
    assert_eq!(item.source_code.as_deref(), Some("print(300 + 24)"));
    assert!(state.diary[0].contains("found the solution"));
    assert!(!state.permissions.coding);
}

#[tokio::test]
async fn test_coding_failure_only_writes_diary() {
    let fx = Fixture::new().with_runner(Arc::new(FixedRunner(Err(AgentError::Sandbox(
        "ZeroDivisionError".into(),
    )))));
    let coder = Arc::new(ScriptedLlmClient::named(
        "coder",
        vec![json!({"think": "divide", "code": "print(1 / 0)"}).to_string()],
    ));
    let models = base_models().with_override(ToolName::CodeGenerator, coder);
    let env = fx.env(models, options());
    let mut state = AgentState::new(QUESTION, vec![Message::user(QUESTION)]);
    state.permissions.coding = true;

    let action = CodingAction {
        think: "divide".into(),
        coding_issue: "Divide one by zero".into(),
    };
    handle_coding(&env, &mut state, action).await;

    assert!(state.knowledge.iter().all(|k| k.kind != KnowledgeKind::Coding));
    assert!(state.diary[0].contains("failed to solve the issue"));
    let record = state.all_context.last().unwrap();
    assert!(record.result.as_deref().unwrap_or_default().contains("ZeroDivisionError"));
    assert!(!state.permissions.coding);
}
