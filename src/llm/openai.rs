//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。每次请求带超时，超时与连接失败按
//! max_retries 重试；失败文本经 LlmError::classify 归类。命中限流时只记录恢复时间供 status 展示，不做节流。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::llm::{LlmClient, LlmError, LlmHealth, Message, Role};

/// 重试间隔基数（第 n 次重试等待 n * RETRY_BACKOFF）
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与请求参数
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    request_timeout: Duration,
    max_retries: u32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
    total_requests: AtomicU64,
    rate_limit_reset: Mutex<Option<DateTime<Utc>>>,
    health_check_interval: Duration,
    /// 最近一次连通性测试：(时间, 是否连通)
    last_health_check: Mutex<Option<(Instant, bool)>>,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: 0.0,
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            usage: TokenUsage::new(),
            total_requests: AtomicU64::new(0),
            rate_limit_reset: Mutex::new(None),
            health_check_interval: Duration::from_secs(300),
            last_health_check: Mutex::new(None),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    fn cached_health_check(&self) -> Option<(Instant, bool)> {
        self.last_health_check.lock().ok().and_then(|g| *g)
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| LlmError::InvalidRequest(e.to_string()))
            })
            .collect()
    }

    async fn complete_once(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::classify(&e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    fn note_rate_limit(&self, retry_after_ms: u64) {
        let reset = Utc::now() + chrono::Duration::milliseconds(retry_after_ms as i64);
        if let Ok(mut guard) = self.rate_limit_reset.lock() {
            *guard = Some(reset);
        }
        tracing::warn!(model = %self.model, reset = %reset, "LLM rate limit hit");
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.complete_once(messages).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "LLM request failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    if let LlmError::RateLimited { retry_after_ms } = &e {
                        self.note_rate_limit(*retry_after_ms);
                    }
                    tracing::error!(model = %self.model, error = %e, "LLM request failed");
                    return Err(e);
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn health_status(&self) -> LlmHealth {
        let (prompt_tokens, completion_tokens, _) = self.usage.get();
        let last = self.cached_health_check();
        LlmHealth {
            provider: "openai".to_string(),
            model: self.model.clone(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            prompt_tokens,
            completion_tokens,
            rate_limit_reset: self.rate_limit_reset.lock().ok().and_then(|g| *g),
            connected: last.is_some_and(|(_, ok)| ok),
            last_check_secs_ago: last.map(|(at, _)| at.elapsed().as_secs()),
        }
    }

    /// 间隔内复用上次连通性结果，过期后重新实测
    async fn health_check(&self) -> LlmHealth {
        let fresh = self
            .cached_health_check()
            .is_some_and(|(at, _)| at.elapsed() < self.health_check_interval);
        if !fresh {
            let connected = self.test_connection().await;
            if let Ok(mut guard) = self.last_health_check.lock() {
                *guard = Some((Instant::now(), connected));
            }
        }
        self.health_status()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
