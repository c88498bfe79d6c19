//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient；失败统一为 LlmError，限流 / 超时 / 鉴权 / 连接可区分，
//! 进入核心时再由 `From<LlmError> for AgentError` 归类。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::llm::Message;

/// 命中限流后记录的参考恢复时间（仅作展示，不做强制节流）
pub const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 60 * 60 * 1000;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API rate limit exceeded (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("LLM request timeout")]
    Timeout,

    #[error("LLM authentication error: {0}")]
    Auth(String),

    #[error("LLM connection error: {0}")]
    Connection(String),

    #[error("Invalid LLM request: {0}")]
    InvalidRequest(String),

    #[error("LLM error: {0}")]
    Other(String),
}

impl LlmError {
    /// 根据后端报错文本归类（各家 SDK 的错误类型不统一，按关键字判断）
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("quota")
            || lower.contains("429")
        {
            LlmError::RateLimited {
                retry_after_ms: DEFAULT_RATE_LIMIT_BACKOFF_MS,
            }
        } else if lower.contains("timeout") || lower.contains("timed out") {
            LlmError::Timeout
        } else if lower.contains("api key")
            || lower.contains("api_key")
            || lower.contains("authentication")
            || lower.contains("unauthorized")
            || lower.contains("401")
            || lower.contains("403")
        {
            LlmError::Auth(raw.to_string())
        } else if lower.contains("connection")
            || lower.contains("connect")
            || lower.contains("dns")
            || lower.contains("network")
        {
            LlmError::Connection(raw.to_string())
        } else {
            LlmError::Other(raw.to_string())
        }
    }

    /// 是否值得重试（超时与连接抖动）；限流与鉴权失败不重试
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Timeout | LlmError::Connection(_))
    }
}

/// LLM 健康状态（status 接口透传）
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmHealth {
    pub provider: String,
    pub model: String,
    pub total_requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub rate_limit_reset: Option<DateTime<Utc>>,
    /// 最近一次连通性测试结果
    pub connected: bool,
    pub last_check_secs_ago: Option<u64>,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;

    /// 连通性测试：发一条最短请求，任何错误都视为不可用
    async fn test_connection(&self) -> bool {
        match self.complete(&[Message::user("Hello")]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "LLM connection test failed");
                false
            }
        }
    }

    fn health_status(&self) -> LlmHealth {
        let (prompt_tokens, completion_tokens, _) = self.token_usage();
        LlmHealth {
            provider: "unknown".to_string(),
            model: self.model_name().to_string(),
            prompt_tokens,
            completion_tokens,
            ..LlmHealth::default()
        }
    }

    /// 状态 + 连通性；默认每次都实测，后端可按间隔缓存
    async fn health_check(&self) -> LlmHealth {
        let connected = self.test_connection().await;
        LlmHealth {
            connected,
            last_check_secs_ago: Some(0),
            ..self.health_status()
        }
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
