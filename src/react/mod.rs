//! 认知层：ReAct prompt / 解析（Planner）、SQL Agent 主循环、进度回调

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::{AgentAction, AgentFinish, AgentRun, NoopHook, ReasoningLoop, TraceHook};
pub use loop_::{AgentLimits, SqlAgent};
pub use planner::{parse_react_output, ReactOutput, ReactPrompt};
