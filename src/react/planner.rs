//! Planner：ReAct 文本协议的 prompt 拼装与输出解析
//!
//! 模型按 `Thought / Action / Action Input / Observation / Final Answer` 格式输出；
//! parse_react_output 把一段输出解析为动作或最终答案，格式错误返回 ParseError（由循环回填为观察，不中止）。

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::react::{AgentAction, AgentFinish};

const FINAL_ANSWER: &str = "Final Answer:";

/// 模型自己编出来的观察从这里截断
pub const OBSERVATION_STOP: &str = "\nObservation:";

/// 格式错误时写入轨迹的伪工具名
pub const EXCEPTION_TOOL: &str = "_Exception";

static ACTION_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ACTION_ONLY_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn action_re() -> Option<&'static Regex> {
    ACTION_RE
        .get_or_init(|| {
            Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)").ok()
        })
        .as_ref()
}

fn action_only_re() -> Option<&'static Regex> {
    ACTION_ONLY_RE
        .get_or_init(|| Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)").ok())
        .as_ref()
}

const PREFIX: &str = "You are an agent designed to interact with a SQL database.
Given an input question, create a syntactically correct {dialect} query to run, then look at the results of the query and return the answer.
Unless the user specifies a specific number of examples they wish to obtain, always limit your query to at most {top_k} results.
You can order the results by a relevant column to return the most interesting examples in the database.
Never query for all the columns from a specific table, only ask for the relevant columns given the question.
You have access to tools for interacting with the database.
Only use the below tools. Only use the information returned by the below tools to construct your final answer.
You MUST double check your query before executing it. If you get an error while executing a query, rewrite the query and try again.

DO NOT make any DML statements (INSERT, UPDATE, DELETE, DROP etc.) to the database.

If the question does not seem related to the database, just return \"I don't know\" as the answer.";

const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question";

const FIRST_THOUGHT: &str = "I should look at the tables in the database to see what I can query.  Then I should query the schema of the most relevant tables.";

const EARLY_STOP_NOTE: &str = "\n\nI now need to return a final answer based on the previous steps:";

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReactOutput {
    Action(AgentAction),
    Finish(AgentFinish),
}

/// 输出格式错误；observation 为回填给模型的提示
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Could not parse LLM output: {observation}")]
pub struct ParseError {
    pub observation: String,
}

impl ParseError {
    fn new(observation: &str) -> Self {
        Self {
            observation: observation.to_string(),
        }
    }
}

/// 截掉模型续写出的 Observation 段
pub fn truncate_at_observation(output: &str) -> &str {
    match output.find(OBSERVATION_STOP) {
        Some(idx) => &output[..idx],
        None => output,
    }
}

/// 解析一段模型输出
pub fn parse_react_output(text: &str) -> Result<ReactOutput, ParseError> {
    let action = action_re().and_then(|re| re.captures(text));
    let has_final = text.contains(FINAL_ANSWER);

    match (action, has_final) {
        (Some(_), true) => Err(ParseError::new(
            "Parsing LLM output produced both a final answer and a parse-able action",
        )),
        (None, true) => {
            let output = text
                .rsplit_once(FINAL_ANSWER)
                .map(|(_, answer)| answer.trim())
                .unwrap_or_default();
            Ok(ReactOutput::Finish(AgentFinish {
                output: output.to_string(),
                log: text.to_string(),
            }))
        }
        (Some(caps), false) => {
            let tool = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let input = caps
                .get(2)
                .map(|m| m.as_str().trim().trim_matches('"'))
                .unwrap_or_default();
            Ok(ReactOutput::Action(AgentAction::new(tool, input, text)))
        }
        (None, false) => {
            let has_action = action_only_re().is_some_and(|re| re.is_match(text));
            if has_action {
                Err(ParseError::new("Invalid Format: Missing 'Action Input:' after 'Action:'"))
            } else {
                Err(ParseError::new("Invalid Format: Missing 'Action:' after 'Thought:'"))
            }
        }
    }
}

/// ReAct prompt：system 段固定，user 段随轨迹增长
#[derive(Debug, Clone)]
pub struct ReactPrompt {
    system: String,
}

impl ReactPrompt {
    pub fn new(dialect: &str, top_k: usize, tools: &[(String, String)]) -> Self {
        let tool_lines: Vec<String> = tools
            .iter()
            .map(|(name, desc)| format!("{name}: {desc}"))
            .collect();
        let tool_names: Vec<&str> = tools.iter().map(|(name, _)| name.as_str()).collect();
        let system = format!(
            "{}\n\n{}\n\n{}\n\nBegin!",
            PREFIX
                .replace("{dialect}", dialect)
                .replace("{top_k}", &top_k.to_string()),
            tool_lines.join("\n"),
            FORMAT_INSTRUCTIONS.replace("{tool_names}", &tool_names.join(", ")),
        );
        Self { system }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// 问题 + 首个思考 + 已有轨迹（scratchpad）
    pub fn user(&self, question: &str, steps: &[(AgentAction, String)], early_stop: bool) -> String {
        let mut out = format!("Question: {question}\nThought: {FIRST_THOUGHT}\n");
        for (action, observation) in steps {
            out.push_str(&action.log);
            out.push_str(&format!("\nObservation: {observation}\nThought: "));
        }
        if early_stop {
            out.push_str(EARLY_STOP_NOTE);
        }
        out
    }
}
