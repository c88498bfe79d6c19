//! SqlBee - 自然语言 SQL 查询智能体
//!
//! 模块划分：
//! - **agent**: 查询服务（限时 / 流式问答、状态、统计、数据库信息）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与使用统计
//! - **db**: 只读 SQL 数据后端（SQLite）
//! - **execution**: 限时执行与流式事件桥
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 日志初始化
//! - **react**: ReAct 提示词、输出解析与 SQL Agent 主循环
//! - **tools**: SQL 工具与带超时的执行器
//! - **trace**: 推理轨迹分类、汇总与展示格式化

pub mod agent;
pub mod config;
pub mod core;
pub mod db;
pub mod execution;
pub mod llm;
pub mod observability;
pub mod react;
pub mod tools;
pub mod trace;

pub use agent::{create_agent_service, AgentService, QueryRequest, QueryResponse};
pub use core::{AgentError, ErrorKind};
