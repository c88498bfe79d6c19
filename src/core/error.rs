//! 错误分类：LLM 后端、数据后端、推理循环三处的失败最终都归入这里的七种之一
//!
//! 进入核心时通过 `From<LlmError>` / `From<DatabaseError>` 完成分类；能判定具体类别的不会降级为
//! ExecutionFailure，无法分类的一律默认 ExecutionFailure。调用方只看到 `kind()` 与 `public_message()`，
//! 原始错误文本仅写日志。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::llm::LlmError;

/// 被包装的底层错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 调用方可见的错误类别（稳定，序列化为 snake_case）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InitializationFailure,
    ValidationFailure,
    ExecutionFailure,
    TimeoutFailure,
    UpstreamRateLimit,
    UpstreamTimeout,
    UpstreamUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InitializationFailure => "initialization_failure",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::ExecutionFailure => "execution_failure",
            ErrorKind::TimeoutFailure => "timeout_failure",
            ErrorKind::UpstreamRateLimit => "upstream_rate_limit",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent 错误（封闭集合，每种都带人类可读消息与可选的底层原因）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 启动时依赖未就绪，服务无法创建
    #[error("Initialization failed: {message}")]
    InitializationFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// 调用方输入不合法，不重试
    #[error("Invalid input: {message}")]
    ValidationFailure { message: String },

    /// 推理循环未能给出答案，调用方可换个问法重试
    #[error("Execution failed: {message}")]
    ExecutionFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// 超出墙钟预算（只是停止等待，后台工作不会被终止）
    #[error("Execution timed out after {seconds:.1}s")]
    TimeoutFailure { seconds: f64 },

    #[error("Upstream rate limit: {message}")]
    UpstreamRateLimit {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Upstream timeout: {message}")]
    UpstreamTimeout {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// 存储或 LLM 后端连接失败
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl AgentError {
    pub fn initialization(message: impl Into<String>) -> Self {
        AgentError::InitializationFailure {
            message: message.into(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AgentError::ValidationFailure {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        AgentError::ExecutionFailure {
            message: message.into(),
            source: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        AgentError::TimeoutFailure {
            seconds: after.as_secs_f64(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        AgentError::UpstreamUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// 附加底层原因；ValidationFailure / TimeoutFailure 不携带原因，原样返回
    pub fn with_source(mut self, err: impl Into<BoxError>) -> Self {
        match &mut self {
            AgentError::InitializationFailure { source, .. }
            | AgentError::ExecutionFailure { source, .. }
            | AgentError::UpstreamRateLimit { source, .. }
            | AgentError::UpstreamTimeout { source, .. }
            | AgentError::UpstreamUnavailable { source, .. } => *source = Some(err.into()),
            AgentError::ValidationFailure { .. } | AgentError::TimeoutFailure { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::InitializationFailure { .. } => ErrorKind::InitializationFailure,
            AgentError::ValidationFailure { .. } => ErrorKind::ValidationFailure,
            AgentError::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            AgentError::TimeoutFailure { .. } => ErrorKind::TimeoutFailure,
            AgentError::UpstreamRateLimit { .. } => ErrorKind::UpstreamRateLimit,
            AgentError::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            AgentError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
        }
    }

    /// 是否来自上游后端（限流 / 上游超时 / 不可用）；推理循环遇到这类错误直接中止，不当作 Observation
    pub fn is_upstream(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamRateLimit | ErrorKind::UpstreamTimeout | ErrorKind::UpstreamUnavailable
        )
    }

    /// 内部消息（不带类别前缀），用于日志与回填给模型的观察
    pub fn detail(&self) -> String {
        match self {
            AgentError::InitializationFailure { message, .. }
            | AgentError::ValidationFailure { message }
            | AgentError::ExecutionFailure { message, .. }
            | AgentError::UpstreamRateLimit { message, .. }
            | AgentError::UpstreamTimeout { message, .. }
            | AgentError::UpstreamUnavailable { message, .. } => message.clone(),
            AgentError::TimeoutFailure { .. } => self.to_string(),
        }
    }

    /// 返回给调用方的消息：不含堆栈、凭据或后端原始报错
    pub fn public_message(&self) -> String {
        match self {
            AgentError::ValidationFailure { message } => message.clone(),
            AgentError::InitializationFailure { .. } => {
                "Agent service is not available. Please try again later.".to_string()
            }
            AgentError::ExecutionFailure { .. } => {
                "Unable to process your question. Please try rephrasing it.".to_string()
            }
            AgentError::TimeoutFailure { .. } => {
                "Query took too long to process. Please try a simpler question.".to_string()
            }
            AgentError::UpstreamRateLimit { .. } => {
                "AI service rate limit reached. Please try again in a few minutes.".to_string()
            }
            AgentError::UpstreamTimeout { .. } => {
                "AI service timeout. Please try again later.".to_string()
            }
            AgentError::UpstreamUnavailable { .. } => {
                "A backing service is unavailable. Please try again later.".to_string()
            }
        }
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        let message = err.to_string();
        let classified = match &err {
            LlmError::RateLimited { .. } => AgentError::UpstreamRateLimit {
                message,
                source: None,
            },
            LlmError::Timeout => AgentError::UpstreamTimeout {
                message,
                source: None,
            },
            LlmError::Auth(_) | LlmError::Connection(_) => AgentError::UpstreamUnavailable {
                message,
                source: None,
            },
            LlmError::InvalidRequest(_) | LlmError::Other(_) => AgentError::ExecutionFailure {
                message,
                source: None,
            },
        };
        classified.with_source(err)
    }
}

impl From<DatabaseError> for AgentError {
    fn from(err: DatabaseError) -> Self {
        let message = err.to_string();
        let classified = match &err {
            DatabaseError::Connection(_) => AgentError::unavailable(message),
            _ => AgentError::execution(message),
        };
        classified.with_source(err)
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        let message = if err.is_panic() {
            "reasoning worker panicked".to_string()
        } else {
            "reasoning worker was cancelled".to_string()
        };
        AgentError::execution(message).with_source(err)
    }
}
