//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / run），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时加超时并写审计日志。注册顺序即 prompt 中工具的列出顺序。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;

/// 工具 trait：名称、描述（供 LLM 理解）、异步执行（输入为 Action Input 原文）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应 ReAct 文本中的 `Action:`）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 执行工具；上游故障返回对应的 Upstream* 错误，其余失败返回 ExecutionFailure
    async fn run(&self, input: &str) -> Result<String, AgentError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，保留注册顺序
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具覆盖旧实现，位置不变
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, input: &str) -> Result<String, AgentError> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::execution(format!("Unknown tool: {name}")))?;
        tool.run(input).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的工具段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.tools
                    .get(name)
                    .map(|tool| (name.clone(), tool.description().to_string()))
            })
            .collect()
    }
}
