//! 动作处理器：每个处理器修改 AgentState、追加日志（diary）并记录步骤，最后关闭自己的许可位

mod answer;
mod coding;
mod reflect;
mod search;
mod visit;

pub use answer::handle_answer;
pub use coding::handle_coding;
pub use reflect::handle_reflect;
pub use search::{execute_search_queries, handle_search, SearchHarvest};
pub use visit::{handle_visit, resolve_visit_targets};

/// 处理器对主循环的指示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    Break,
}

/// 失败步骤写入 all_context 的提示
pub(crate) const THINK_DIFFERENTLY: &str =
    "You must think out of the box or different angle!!!";
