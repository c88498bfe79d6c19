//! 推理循环对外的观察面：动作 / 结论记录与回调钩子
//!
//! 执行层只通过 TraceHook 观察循环进度，循环本身对调用方是不透明的 ReasoningLoop。

use async_trait::async_trait;
use serde::Serialize;

use crate::core::AgentError;

/// 一次工具调用意图（LLM 原始输出保存在 log 中）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAction {
    pub tool: String,
    pub tool_input: String,
    pub log: String,
}

impl AgentAction {
    pub fn new(tool: impl Into<String>, tool_input: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            tool_input: tool_input.into(),
            log: log.into(),
        }
    }
}

/// 循环给出的最终答案
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentFinish {
    pub output: String,
    pub log: String,
}

/// 一次完整运行的结果：答案 + 按顺序的 (动作, 观察) 对
#[derive(Debug, Clone, Default)]
pub struct AgentRun {
    pub output: String,
    pub intermediate_steps: Vec<(AgentAction, String)>,
}

/// 进度回调；在循环所在任务中同步调用，实现方不得阻塞
pub trait TraceHook: Send + Sync {
    fn on_agent_action(&self, _action: &AgentAction) {}

    fn on_tool_end(&self, _tool: &str, _output: &str) {}

    fn on_agent_finish(&self, _finish: &AgentFinish) {}
}

/// 不关心进度时使用
pub struct NoopHook;

impl TraceHook for NoopHook {}

/// 推理循环：给定问题，反复选择动作、观察结果，最终给出答案
#[async_trait]
pub trait ReasoningLoop: Send + Sync {
    async fn run(&self, question: &str, hook: &dyn TraceHook) -> Result<AgentRun, AgentError>;

    /// 模型名（结果元数据用）
    fn model_name(&self) -> String {
        "unknown".to_string()
    }
}
