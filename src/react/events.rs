//! 研究过程事件：按 task_id 推送给外部观察者（UI / 日志）
//!
//! 发布是单向的；发布失败只记日志，不影响研究任务。

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::AgentError;

/// 单条进度事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    /// 思考 / 进度说明
    Think { text: String },
    /// 被吸收的错误（警告）
    Error { text: String },
    /// 任务完成
    Complete { answer: String },
    /// 本步执行的搜索查询
    SearchQuery { queries: Vec<String> },
    /// 本步将要访问的 URL
    VisitUrl { urls: Vec<String> },
    /// 读取成功的页面
    ReadContent {
        url: String,
        title: String,
        preview: String,
    },
    /// 问题评估结果（适用的评估维度）
    QuestionEvaluation {
        question: String,
        metrics: Vec<String>,
    },
}

impl ResearchEvent {
    pub fn think(text: impl Into<String>) -> Self {
        ResearchEvent::Think { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        ResearchEvent::Error { text: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResearchEvent::Think { .. } => "think",
            ResearchEvent::Error { .. } => "error",
            ResearchEvent::Complete { .. } => "complete",
            ResearchEvent::SearchQuery { .. } => "search_query",
            ResearchEvent::VisitUrl { .. } => "visit_url",
            ResearchEvent::ReadContent { .. } => "read_content",
            ResearchEvent::QuestionEvaluation { .. } => "question_evaluation",
        }
    }
}

/// 进度发布器
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, task_id: &str, event: ResearchEvent) -> Result<(), AgentError>;
}

/// 发布事件，失败只记 warn
pub fn publish_quietly(publisher: &dyn ProgressPublisher, task_id: &str, event: ResearchEvent) {
    let kind = event.kind();
    if let Err(e) = publisher.publish(task_id, event) {
        tracing::warn!(task_id, kind, error = %e, "Progress publish failed");
    }
}

/// 只写日志
#[derive(Debug, Default)]
pub struct TracingPublisher;

impl ProgressPublisher for TracingPublisher {
    fn publish(&self, task_id: &str, event: ResearchEvent) -> Result<(), AgentError> {
        match &event {
            ResearchEvent::Error { text } => tracing::warn!(task_id, "{}", text),
            other => tracing::info!(
                task_id,
                event = %serde_json::to_string(other).unwrap_or_default(),
                "Research progress"
            ),
        }
        Ok(())
    }
}

/// 推送到 tokio mpsc 通道；接收端关闭时返回 Publish 错误
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<(String, ResearchEvent)>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::UnboundedSender<(String, ResearchEvent)>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(String, ResearchEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressPublisher for ChannelPublisher {
    fn publish(&self, task_id: &str, event: ResearchEvent) -> Result<(), AgentError> {
        self.tx
            .send((task_id.to_string(), event))
            .map_err(|e| AgentError::Publish(e.to_string()))
    }
}

/// 丢弃所有事件
#[derive(Debug, Default)]
pub struct NoopPublisher;

impl ProgressPublisher for NoopPublisher {
    fn publish(&self, _task_id: &str, _event: ResearchEvent) -> Result<(), AgentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let v = serde_json::to_value(ResearchEvent::VisitUrl {
            urls: vec!["https://a.com/".into()],
        })
        .unwrap();
        assert_eq!(v["type"], "visit_url");
        assert_eq!(v["urls"][0], "https://a.com/");
    }

    #[tokio::test]
    async fn test_channel_publisher_delivers_and_fails_when_closed() {
        let (publisher, mut rx) = ChannelPublisher::channel();
        publisher.publish("t1", ResearchEvent::think("hello")).unwrap();
        let (task, ev) = rx.recv().await.unwrap();
        assert_eq!(task, "t1");
        assert_eq!(ev.kind(), "think");

        drop(rx);
        assert!(publisher.publish("t1", ResearchEvent::think("x")).is_err());
        // 失败被吞掉，不 panic
        publish_quietly(&publisher, "t1", ResearchEvent::think("y"));
    }
}
