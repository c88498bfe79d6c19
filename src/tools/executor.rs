//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时，execute(tool_name, input) 在超时内调用 registry.execute；
//! 超时转为 ExecutionFailure，工具自身错误原样返回（保留上游分类）。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::db::preview;
use crate::tools::{Tool, ToolRegistry};

/// 工具执行器：对每次调用施加超时并记录审计日志
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具；超时返回 ExecutionFailure；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, input: &str) -> Result<String, AgentError> {
        let start = Instant::now();
        let result = timeout(self.timeout, self.registry.execute(tool_name, input)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "input_preview": preview(input, 200),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AgentError::execution(format!(
                "Tool {tool_name} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.registry.tool_descriptions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        async fn run(&self, _input: &str) -> Result<String, AgentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(Sleepy);
        let executor = ToolExecutor::new(registry, Duration::from_millis(50));

        let err = executor.execute("sleepy", "").await.unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::ExecutionFailure);
        assert!(err.to_string().contains("timed out after 50ms"), "{err}");
    }
}
