//! 研究 Agent 运行时
//!
//! ResearchAgent 持有可在任务间共享的 Provider（LLM / 搜索 / 读取 / 嵌入 / 代码执行 / 进度发布），
//! process_research_task 为每个请求构建独立的状态与追踪器，跑完整的研究循环并返回结果。

use std::sync::Arc;

use serde::Serialize;

use crate::config::{AgentSection, AppConfig, SandboxSection};
use crate::core::{AgentError, AgentState, TaskContext, TaskScheduler};
use crate::llm::{EmbeddingProvider, JinaEmbedder, ObjectGenerator, OpenAiEmbedder, ToolModels};
use crate::memory::{resolve_question, ActionEntry, ActionTracker, Message, TokenSummary, TokenTracker};
use crate::react::{
    publish_quietly, rank_candidate_urls, run_research, AnswerAction, Evaluator, ProgressPublisher,
    ResearchEvent, SchemaGen, TaskEnv, TracingPublisher,
};
use crate::tools::{
    CodeRunner, CodeSandbox, HttpReader, JinaReader, JinaSearch, PageReader, ProcessRunner, SearchProvider,
    SerperSearch,
};

const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// 单次研究请求；未设置的选项使用 Agent 的 [agent] 配置
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    pub question: Option<String>,
    pub messages: Vec<Message>,
    pub token_budget: Option<u64>,
    pub max_bad_attempts: Option<u32>,
    pub no_direct_answer: Option<bool>,
}

impl ResearchRequest {
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            question: Some(question.into()),
            ..Self::default()
        }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_token_budget(mut self, budget: u64) -> Self {
        self.token_budget = Some(budget);
        self
    }

    pub fn with_max_bad_attempts(mut self, attempts: u32) -> Self {
        self.max_bad_attempts = Some(attempts);
        self
    }

    pub fn with_no_direct_answer(mut self, no_direct_answer: bool) -> Self {
        self.no_direct_answer = Some(no_direct_answer);
        self
    }
}

/// 研究结果
#[derive(Debug, Clone, Serialize)]
pub struct ResearchResult {
    pub result: AnswerAction,
    pub visited_urls: Vec<String>,
    pub read_urls: Vec<String>,
    pub all_urls: Vec<String>,
    pub usage: TokenSummary,
    pub actions: Vec<ActionEntry>,
}

/// 研究 Agent：Provider 以 Arc 共享，任务之间不共享可变状态
pub struct ResearchAgent {
    models: ToolModels,
    search: Arc<dyn SearchProvider>,
    reader: Arc<dyn PageReader>,
    embedder: Arc<dyn EmbeddingProvider>,
    runner: Arc<dyn CodeRunner>,
    publisher: Arc<dyn ProgressPublisher>,
    options: AgentSection,
    sandbox: SandboxSection,
}

impl ResearchAgent {
    pub fn new(
        models: ToolModels,
        search: Arc<dyn SearchProvider>,
        reader: Arc<dyn PageReader>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let sandbox = SandboxSection::default();
        Self {
            models,
            search,
            reader,
            embedder,
            runner: Arc::new(ProcessRunner::new(sandbox.interpreter.clone(), sandbox.timeout_secs)),
            publisher: Arc::new(TracingPublisher),
            options: AgentSection::default(),
            sandbox,
        }
    }

    pub fn with_options(mut self, options: AgentSection) -> Self {
        self.options = options;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ProgressPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_code_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxSection) -> Self {
        self.runner = Arc::new(ProcessRunner::new(sandbox.interpreter.clone(), sandbox.timeout_secs));
        self.sandbox = sandbox;
        self
    }

    /// 按配置选择各 Provider 实现
    pub fn from_config(cfg: &AppConfig) -> Self {
        let search: Arc<dyn SearchProvider> = match cfg.search.provider.as_str() {
            "serper" => Arc::new(SerperSearch::new(cfg.search.api_key.as_deref(), cfg.search.timeout_secs)),
            _ => Arc::new(JinaSearch::new(cfg.search.api_key.as_deref(), cfg.search.timeout_secs)),
        };
        let reader: Arc<dyn PageReader> = match cfg.reader.provider.as_str() {
            "http" => Arc::new(HttpReader::new(cfg.reader.timeout_secs, cfg.reader.max_result_chars)),
            _ => Arc::new(JinaReader::new(cfg.reader.api_key.as_deref(), cfg.reader.timeout_secs)),
        };
        let embedder: Arc<dyn EmbeddingProvider> = match cfg.embedding.provider.as_str() {
            "openai" => Arc::new(OpenAiEmbedder::new(
                cfg.embedding.base_url.as_deref(),
                cfg.embedding
                    .model
                    .as_deref()
                    .unwrap_or(DEFAULT_OPENAI_EMBEDDING_MODEL),
                cfg.embedding.api_key.as_deref(),
            )),
            _ => Arc::new(JinaEmbedder::new(
                cfg.embedding.model.as_deref(),
                cfg.embedding.api_key.as_deref(),
            )),
        };
        tracing::info!(
            llm = %cfg.llm.provider,
            model = %cfg.llm.model,
            search = %cfg.search.provider,
            reader = %cfg.reader.provider,
            embedding = %cfg.embedding.provider,
            "Research agent configured"
        );
        Self::new(ToolModels::from_config(&cfg.llm), search, reader, embedder)
            .with_options(cfg.agent.clone())
            .with_sandbox(cfg.sandbox.clone())
    }

    pub fn options(&self) -> &AgentSection {
        &self.options
    }

    /// 执行一个研究任务；只有无法解析出问题时返回错误
    pub async fn process_research_task(
        &self,
        ctx: &TaskContext,
        request: ResearchRequest,
    ) -> Result<ResearchResult, AgentError> {
        let question = request
            .question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from)
            .or_else(|| resolve_question(&request.messages))
            .ok_or_else(|| AgentError::InvalidQuestion("no question in request".into()))?;
        let messages = if request.messages.is_empty() {
            vec![Message::user(question.clone())]
        } else {
            request.messages
        };

        let mut options = self.options.clone();
        if let Some(budget) = request.token_budget {
            options.token_budget = budget;
        }
        if let Some(attempts) = request.max_bad_attempts {
            options.max_bad_attempts = attempts;
        }
        if let Some(flag) = request.no_direct_answer {
            options.no_direct_answer = flag;
        }
        tracing::info!(
            task_id = %ctx.task_id,
            question = %question,
            token_budget = options.token_budget,
            max_bad_attempts = options.max_bad_attempts,
            "Research task started"
        );

        let tracker = TokenTracker::new(options.token_budget);
        let generator = ObjectGenerator::new(self.models.clone(), tracker.clone());
        let env = TaskEnv {
            ctx,
            search: self.search.as_ref(),
            reader: self.reader.as_ref(),
            embedder: self.embedder.as_ref(),
            publisher: self.publisher.as_ref(),
            evaluator: Evaluator::new(generator.clone()),
            sandbox: CodeSandbox::new(generator.clone(), self.runner.clone(), self.sandbox.max_attempts),
            generator,
            tracker,
            actions: ActionTracker::new(),
            scheduler: TaskScheduler::new(options.max_concurrency, options.step_sleep_ms),
            schema: SchemaGen::for_question(&question),
            options,
        };

        let mut state = AgentState::new(question, messages);
        let answer = run_research(&env, &mut state).await;

        let original = state.question.clone();
        let mut visited_urls: Vec<String> = rank_candidate_urls(&env, &mut state, &original)
            .await
            .into_iter()
            .map(|r| r.url().to_string())
            .collect();
        visited_urls.truncate(env.options.num_returned_urls);
        let read_urls = state.read_urls();
        let mut all_urls: Vec<String> = state.all_urls.keys().cloned().collect();
        all_urls.sort();

        let usage = env.tracker.summary();
        tracing::info!(
            task_id = %ctx.task_id,
            steps = state.total_step,
            total_tokens = usage.total.total_tokens,
            breakdown = ?usage.breakdown,
            read = read_urls.len(),
            is_final = answer.is_final,
            "Research task finished"
        );
        publish_quietly(
            env.publisher,
            &ctx.task_id,
            ResearchEvent::Complete {
                answer: answer.md_answer.clone().unwrap_or_else(|| answer.answer.clone()),
            },
        );

        Ok(ResearchResult {
            result: answer,
            visited_urls,
            read_urls,
            all_urls,
            usage,
            actions: env.actions.entries(),
        })
    }
}
