//! 认知层：动作规划、评审、查询改写、错误复盘、主循环与最终答案后处理

pub mod actions;
pub mod analyzer;
pub mod evaluator;
pub mod events;
pub mod finalize;
pub mod loop_;
pub mod planner;
pub mod prompt;
pub mod rewriter;
pub mod schema;

pub use evaluator::{EvaluationResponse, Evaluator};
pub use events::{
    publish_quietly, ChannelPublisher, NoopPublisher, ProgressPublisher, ResearchEvent, TracingPublisher,
};
pub use loop_::{rank_candidate_urls, run_research, TaskEnv};
pub use planner::{
    decode_step_action, ActionKind, AnswerAction, CodingAction, ReflectAction, SearchAction, StepAction,
    UrlTarget, VisitAction,
};
pub use prompt::{get_prompt, AgentPrompt};
pub use schema::SchemaGen;
