//! ReAct 主循环（SQL Agent）
//!
//! Plan -> Act (Tool) -> Observe -> 下一轮 Plan；受最大迭代次数与最大执行时间限制，
//! 超限时再调一次 LLM 根据已有步骤生成答案（early stop = generate）。
//! 格式错误不中止，作为 `_Exception` 步回填；上游错误（限流 / 超时 / 不可用）直接中止。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::core::AgentError;
use crate::db::SqlDatabase;
use crate::llm::{LlmClient, Message};
use crate::react::planner::{
    parse_react_output, truncate_at_observation, ReactOutput, ReactPrompt, EXCEPTION_TOOL,
};
use crate::react::{AgentAction, AgentFinish, AgentRun, ReasoningLoop, TraceHook};
use crate::tools::{register_sql_tools, ToolExecutor, ToolRegistry};

/// 循环限制
#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub max_iterations: usize,
    pub max_execution_time: Duration,
    pub tool_timeout: Duration,
    /// prompt 中建议的结果条数上限
    pub top_k: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_execution_time: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            top_k: 10,
        }
    }
}

/// 基于 ReAct 文本协议的 SQL Agent
pub struct SqlAgent {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    prompt: ReactPrompt,
    limits: AgentLimits,
}

impl SqlAgent {
    /// 用数据库与 LLM 构造，注册四个 SQL 工具
    pub fn new(llm: Arc<dyn LlmClient>, db: Arc<dyn SqlDatabase>, limits: AgentLimits) -> Self {
        let dialect = db.dialect().to_string();
        let mut registry = ToolRegistry::new();
        register_sql_tools(&mut registry, db, Arc::clone(&llm));
        let prompt = ReactPrompt::new(&dialect, limits.top_k, &registry.tool_descriptions());
        Self {
            llm,
            executor: ToolExecutor::new(registry, limits.tool_timeout),
            prompt,
            limits,
        }
    }

    pub fn limits(&self) -> &AgentLimits {
        &self.limits
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    async fn think(
        &self,
        question: &str,
        steps: &[(AgentAction, String)],
        early_stop: bool,
    ) -> Result<String, AgentError> {
        let messages = [
            Message::system(self.prompt.system().to_string()),
            Message::user(self.prompt.user(question, steps, early_stop)),
        ];
        let output = self.llm.complete(&messages).await?;
        Ok(truncate_at_observation(&output).trim_end().to_string())
    }

    /// 执行动作得到观察；只有上游错误会向外传播
    async fn observe(&self, action: &AgentAction) -> Result<String, AgentError> {
        if self.executor.get_tool(&action.tool).is_none() {
            return Ok(format!(
                "{} is not a valid tool, try one of [{}].",
                action.tool,
                self.executor.tool_names().join(", ")
            ));
        }
        match self.executor.execute(&action.tool, &action.tool_input).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_upstream() => Err(e),
            Err(e) => Ok(format!("Error: {}", e.detail())),
        }
    }

    async fn generate_after_stop(
        &self,
        question: &str,
        steps: Vec<(AgentAction, String)>,
        hook: &dyn TraceHook,
    ) -> Result<AgentRun, AgentError> {
        let output = self.think(question, &steps, true).await?;
        let answer = match parse_react_output(&output) {
            Ok(ReactOutput::Finish(finish)) => finish.output,
            _ => output.clone(),
        };
        hook.on_agent_finish(&AgentFinish {
            output: answer.clone(),
            log: output,
        });
        Ok(AgentRun {
            output: answer,
            intermediate_steps: steps,
        })
    }
}

#[async_trait]
impl ReasoningLoop for SqlAgent {
    async fn run(&self, question: &str, hook: &dyn TraceHook) -> Result<AgentRun, AgentError> {
        let start = Instant::now();
        let mut steps: Vec<(AgentAction, String)> = Vec::new();
        let mut iterations = 0;

        while iterations < self.limits.max_iterations
            && start.elapsed() < self.limits.max_execution_time
        {
            iterations += 1;
            let output = self.think(question, &steps, false).await?;

            match parse_react_output(&output) {
                Ok(ReactOutput::Finish(finish)) => {
                    tracing::debug!(iterations, "Agent produced final answer");
                    hook.on_agent_finish(&finish);
                    return Ok(AgentRun {
                        output: finish.output,
                        intermediate_steps: steps,
                    });
                }
                Ok(ReactOutput::Action(action)) => {
                    tracing::debug!(step = steps.len() + 1, tool = %action.tool, "Agent action");
                    hook.on_agent_action(&action);
                    let observation = self.observe(&action).await?;
                    hook.on_tool_end(&action.tool, &observation);
                    steps.push((action, observation));
                }
                Err(parse_err) => {
                    tracing::warn!(error = %parse_err, "Unparseable agent output, feeding back");
                    let action = AgentAction::new(EXCEPTION_TOOL, "Invalid or incomplete response", output);
                    hook.on_agent_action(&action);
                    hook.on_tool_end(EXCEPTION_TOOL, &parse_err.observation);
                    steps.push((action, parse_err.observation));
                }
            }
        }

        tracing::warn!(
            iterations,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Agent stopped due to iteration or time limit, generating final answer"
        );
        self.generate_after_stop(question, steps, hook).await
    }

    fn model_name(&self) -> String {
        self.llm.model_name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::core::ErrorKind;
    use crate::db::SqliteDatabase;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::react::NoopHook;

    fn db() -> Arc<dyn SqlDatabase> {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users VALUES (1, 'ann'), (2, 'bo'), (3, 'cy');",
        )
        .unwrap();
        Arc::new(db)
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TraceHook for Recorder {
        fn on_agent_action(&self, action: &AgentAction) {
            self.events.lock().unwrap().push(format!("action:{}", action.tool));
        }
        fn on_tool_end(&self, _tool: &str, output: &str) {
            self.events.lock().unwrap().push(format!("obs:{output}"));
        }
        fn on_agent_finish(&self, finish: &AgentFinish) {
            self.events.lock().unwrap().push(format!("finish:{}", finish.output));
        }
    }

    #[tokio::test]
    async fn test_full_run_with_hooks() {
        let llm = Arc::new(MockLlmClient::scripted([
            "Thought: list tables first\nAction: sql_db_list_tables\nAction Input: ",
            "Thought: count users\nAction: sql_db_query\nAction Input: SELECT COUNT(*) FROM users\nObservation: made up",
            "Thought: I now know the final answer\nFinal Answer: There are 3 users.",
        ]));
        let agent = SqlAgent::new(llm, db(), AgentLimits::default());
        let hook = Recorder::default();

        let run = agent.run("How many users?", &hook).await.unwrap();
        assert_eq!(run.output, "There are 3 users.");
        assert_eq!(run.intermediate_steps.len(), 2);
        assert!(!run.intermediate_steps[1].0.log.contains("made up"));
        assert_eq!(
            *hook.events.lock().unwrap(),
            vec![
                "action:sql_db_list_tables",
                "obs:users",
                "action:sql_db_query",
                "obs:[(3,)]",
                "finish:There are 3 users.",
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_errors_become_observations() {
        let llm = Arc::new(MockLlmClient::scripted([
            "Action: sql_db_query\nAction Input: SELECT * FROM nope",
            "Action: drop_everything\nAction Input: now",
            "gibberish",
            "Final Answer: gave up",
        ]));
        let agent = SqlAgent::new(llm, db(), AgentLimits::default());
        let run = agent.run("q?", &NoopHook).await.unwrap();

        let obs: Vec<&str> = run.intermediate_steps.iter().map(|(_, o)| o.as_str()).collect();
        assert!(obs[0].starts_with("Error: SQL execution error"));
        assert!(obs[1].starts_with("drop_everything is not a valid tool"));
        assert!(obs[2].contains("Missing 'Action:'"));
        assert_eq!(run.intermediate_steps[2].0.tool, EXCEPTION_TOOL);
    }

    #[tokio::test]
    async fn test_upstream_error_aborts() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(LlmError::RateLimited { retry_after_ms: 10 });
        let agent = SqlAgent::new(llm, db(), AgentLimits::default());
        let err = agent.run("q?", &NoopHook).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamRateLimit);
    }

    #[tokio::test]
    async fn test_iteration_limit_generates_answer() {
        let llm = Arc::new(MockLlmClient::scripted([
            "Action: sql_db_list_tables\nAction Input: ",
            "Action: sql_db_list_tables\nAction Input: ",
            "Thought: enough\nFinal Answer: users only",
        ]));
        let limits = AgentLimits {
            max_iterations: 2,
            ..AgentLimits::default()
        };
        let agent = SqlAgent::new(llm.clone(), db(), limits);
        let run = agent.run("tables?", &NoopHook).await.unwrap();
        assert_eq!(run.output, "users only");
        assert_eq!(run.intermediate_steps.len(), 2);
        assert_eq!(llm.call_count(), 3);
    }
}
