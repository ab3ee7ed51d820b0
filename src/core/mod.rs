//! 核心层：错误类型、任务上下文、研究状态、单步内的有界并发调度

pub mod context;
pub mod error;
pub mod state;
pub mod task_scheduler;

pub use context::{pick_key, TaskContext, TaskCredentials};
pub use error::AgentError;
pub use state::{
    AgentState, EvaluationMetric, EvaluationType, Permissions, StepRecord, WebContent,
    MAX_QUERIES_PER_STEP, MAX_REFLECT_PER_STEP, MAX_URLS_PER_STEP, PROMPT_URL_LIST_SIZE,
    SEARCH_SATURATION_URLS, URLS_PER_HOSTNAME,
};
pub use task_scheduler::TaskScheduler;
