//! 限时执行：一个独立任务跑推理，调用方最多等待 timeout
//!
//! 超时后丢弃 JoinHandle（任务被分离，结果丢弃），不做 abort。

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::AgentError;
use crate::execution::{normalize_worker_error, ExecutionResult};
use crate::react::{NoopHook, ReasoningLoop};

pub async fn invoke_bounded(
    agent: Arc<dyn ReasoningLoop>,
    question: &str,
    timeout: Duration,
) -> Result<ExecutionResult, AgentError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AgentError::validation("Question cannot be empty"));
    }

    let start = Instant::now();
    let owned = question.to_string();
    let worker = tokio::spawn(async move { agent.run(&owned, &NoopHook).await });

    let run = match tokio::time::timeout(timeout, worker).await {
        Ok(Ok(result)) => result.map_err(normalize_worker_error)?,
        Ok(Err(join_err)) => {
            tracing::error!(error = %join_err, "Reasoning worker failed");
            return Err(join_err.into());
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = timeout.as_secs_f64(),
                "Agent execution timed out, worker left running in background"
            );
            return Err(AgentError::timeout(timeout));
        }
    };

    Ok(ExecutionResult::from_run(run, start.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::core::ErrorKind;
    use crate::react::{AgentAction, AgentRun, TraceHook};

    struct Scripted(Result<&'static str, ErrorKind>);

    #[async_trait]
    impl ReasoningLoop for Scripted {
        async fn run(&self, _q: &str, _hook: &dyn TraceHook) -> Result<AgentRun, AgentError> {
            match self.0 {
                Ok(answer) => Ok(AgentRun {
                    output: answer.to_string(),
                    intermediate_steps: vec![(
                        AgentAction::new("sql_db_query", "SELECT 1", "Thought: query it now"),
                        "[(1,)]".to_string(),
                    )],
                }),
                Err(ErrorKind::UpstreamTimeout) => Err(crate::llm::LlmError::Timeout.into()),
                Err(_) => Err(AgentError::execution("boom")),
            }
        }
    }

    #[tokio::test]
    async fn test_invoke_bounded_success() {
        let result = invoke_bounded(Arc::new(Scripted(Ok("one"))), " q? ", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.answer, "one");
        assert_eq!(result.step_count, 1);
        assert_eq!(result.summary.complexity_score, 3);
    }

    #[tokio::test]
    async fn test_invoke_bounded_keeps_upstream_kind() {
        let err = invoke_bounded(
            Arc::new(Scripted(Err(ErrorKind::UpstreamTimeout))),
            "q?",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
    }

    #[tokio::test]
    async fn test_blank_question_rejected() {
        let err = invoke_bounded(Arc::new(Scripted(Ok("x"))), "  ", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }
}
