//! 执行层：把不透明、可能运行数十秒的推理调用桥接为
//! 限时同步调用（bounded）与实时事件流（stream）两种契约。
//!
//! 两种模式每次调用都只起一个独立的 tokio 任务；超时只是停止等待，不会终止该任务。

pub mod bounded;
pub mod stream;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{AgentError, ErrorKind};
use crate::react::AgentRun;
use crate::trace::{classify_trace, execution_flow, summarize, Step, StepAction, StepObservation, TraceSummary};

pub use bounded::invoke_bounded;
pub use stream::{stream_execution, StreamOptions};

/// 问题长度限制（按字符计）
#[derive(Debug, Clone, Copy)]
pub struct QuestionLimits {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for QuestionLimits {
    fn default() -> Self {
        Self {
            min_chars: 3,
            max_chars: 1000,
        }
    }
}

/// 校验并规整问题文本；返回去掉首尾空白后的问题
pub fn validate_question(question: &str, limits: QuestionLimits) -> Result<String, AgentError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(AgentError::validation("Question cannot be empty"));
    }
    let len = trimmed.chars().count();
    if len < limits.min_chars {
        return Err(AgentError::validation(format!(
            "Question must be at least {} characters",
            limits.min_chars
        )));
    }
    if len > limits.max_chars {
        return Err(AgentError::validation(format!(
            "Question must be at most {} characters",
            limits.max_chars
        )));
    }
    if trimmed.chars().any(|c| ('\u{0}'..='\u{5}').contains(&c)) {
        return Err(AgentError::validation("Question contains invalid characters"));
    }
    Ok(trimmed.to_string())
}

/// 推理任务返回的错误：能判定的类别原样保留，其余归为 ExecutionFailure
pub(crate) fn normalize_worker_error(err: AgentError) -> AgentError {
    match err.kind() {
        ErrorKind::ExecutionFailure
        | ErrorKind::TimeoutFailure
        | ErrorKind::UpstreamRateLimit
        | ErrorKind::UpstreamTimeout
        | ErrorKind::UpstreamUnavailable => err,
        ErrorKind::InitializationFailure | ErrorKind::ValidationFailure => {
            AgentError::execution(err.detail()).with_source(err)
        }
    }
}

/// 限时模式的结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub answer: String,
    pub execution_time_seconds: f64,
    pub step_count: usize,
    pub steps: Vec<Step>,
    pub summary: TraceSummary,
    pub execution_flow: Vec<String>,
}

impl ExecutionResult {
    pub fn from_run(run: AgentRun, elapsed: Duration) -> Self {
        let steps = classify_trace(&run.intermediate_steps);
        Self {
            answer: run.output,
            execution_time_seconds: elapsed.as_secs_f64(),
            step_count: steps.len(),
            summary: summarize(&steps),
            execution_flow: execution_flow(&steps),
            steps,
        }
    }
}

/// 流式事件；序列化为 `{event_type, timestamp, payload}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum EventKind {
    #[serde(rename = "execution_start")]
    Start { question: String, execution_id: String },

    #[serde(rename = "agent_action")]
    Action {
        step_number: usize,
        thought: Option<String>,
        action: StepAction,
    },

    #[serde(rename = "agent_observation")]
    Observation {
        step_number: usize,
        observation: StepObservation,
    },

    #[serde(rename = "agent_finish")]
    Finish { final_answer: String, total_steps: usize },

    #[serde(rename = "agent_error")]
    Error {
        message: String,
        #[serde(rename = "type")]
        kind: ErrorKind,
    },

    #[serde(rename = "execution_summary")]
    Summary {
        execution_time_seconds: f64,
        success: bool,
        total_steps: usize,
    },

    #[serde(rename = "heartbeat")]
    Heartbeat {},

    #[serde(rename = "execution_complete")]
    Complete {},
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn error(err: &AgentError) -> Self {
        Self::new(EventKind::Error {
            message: err.public_message(),
            kind: err.kind(),
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::Start { .. } => "execution_start",
            EventKind::Action { .. } => "agent_action",
            EventKind::Observation { .. } => "agent_observation",
            EventKind::Finish { .. } => "agent_finish",
            EventKind::Error { .. } => "agent_error",
            EventKind::Summary { .. } => "execution_summary",
            EventKind::Heartbeat {} => "heartbeat",
            EventKind::Complete {} => "execution_complete",
        }
    }

    /// Finish / Error 结束推理阶段
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Finish { .. } | EventKind::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_question() {
        let limits = QuestionLimits::default();
        assert_eq!(validate_question("  how many users?  ", limits).unwrap(), "how many users?");
        for bad in ["", "   ", "hi", "bad\u{3}char"] {
            let err = validate_question(bad, limits).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationFailure, "{bad:?}");
        }
        assert!(validate_question(&"x".repeat(1001), limits).is_err());
        assert!(validate_question(&"x".repeat(1000), limits).is_ok());
    }

    #[test]
    fn test_normalize_worker_error() {
        let err = normalize_worker_error(AgentError::validation("odd"));
        assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
        let err = normalize_worker_error(AgentError::unavailable("db down"));
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[test]
    fn test_event_frame_shape() {
        let frame = serde_json::to_value(Event::new(EventKind::Finish {
            final_answer: "42".into(),
            total_steps: 3,
        }))
        .unwrap();
        assert_eq!(frame["event_type"], "agent_finish");
        assert_eq!(frame["payload"]["final_answer"], "42");
        assert!(frame["timestamp"].is_string());

        let hb = serde_json::to_value(Event::new(EventKind::Heartbeat {})).unwrap();
        assert_eq!(hb["event_type"], "heartbeat");
        assert!(hb["payload"].is_object());

        let err = serde_json::to_value(Event::error(&AgentError::timeout(Duration::from_secs(2)))).unwrap();
        assert_eq!(err["payload"]["type"], "timeout_failure");
    }

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let events = [
            Event::new(EventKind::Heartbeat {}),
            Event::new(EventKind::Complete {}),
            Event::error(&AgentError::execution("x")),
        ];
        for ev in events {
            let json = serde_json::to_value(&ev).unwrap();
            assert_eq!(json["event_type"], ev.event_type());
        }
    }
}
