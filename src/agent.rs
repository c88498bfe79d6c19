//! 查询服务：对外的编排入口
//!
//! AgentService 持有一个推理循环句柄（由数据后端 + LLM 构建）、一份使用统计与服务级参数，
//! 提供限时问答（invoke）、流式问答（stream）、状态 / 健康 / 数据库信息查询。
//! create_agent_service 按配置构建依赖，并在返回前校验 LLM 与数据库连通性。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, DatabaseSection, LlmSection};
use crate::core::{round2, AgentError, UsageSnapshot, UsageStatistics};
use crate::db::{
    mask_uri, preview, run_blocking, DatabaseHealth, SqlDatabase, SqliteDatabase, TableSchema,
};
use crate::execution::{
    invoke_bounded, stream_execution, validate_question, Event, EventKind, ExecutionResult,
    QuestionLimits, StreamOptions,
};
use crate::llm::{LlmClient, LlmHealth, MockLlmClient, OpenAiClient};
use crate::react::{AgentLimits, ReasoningLoop, SqlAgent};
use crate::trace::{format_step_for_display, DisplayStep, StepCategory};

/// database_info 中展示样例信息的表数与每表截断长度
const SAMPLE_TABLES: usize = 3;
const SAMPLE_INFO_MAX_CHARS: usize = 200;

/// 健康 / 状态探测中单个依赖的等待上限
const DEPENDENCY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// 服务级参数
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// 限时模式等待上限
    pub invoke_timeout: Duration,
    pub stream: StreamOptions,
    pub question: QuestionLimits,
    pub limits: AgentLimits,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            invoke_timeout: Duration::from_secs(90),
            stream: StreamOptions::default(),
            question: QuestionLimits::default(),
            limits: AgentLimits::default(),
        }
    }
}

impl ServiceSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let agent = &cfg.agent;
        Self {
            invoke_timeout: cfg.invoke_timeout(),
            stream: StreamOptions {
                poll_interval: Duration::from_millis(agent.stream_poll_interval_ms),
                join_timeout: Duration::from_secs(agent.stream_join_timeout_secs),
            },
            question: QuestionLimits {
                min_chars: agent.min_question_chars,
                max_chars: agent.max_question_chars,
            },
            limits: AgentLimits {
                max_iterations: agent.max_iterations,
                max_execution_time: Duration::from_secs(agent.max_execution_time_secs),
                tool_timeout: Duration::from_secs(agent.tool_timeout_secs),
                top_k: agent.top_k,
            },
        }
    }
}

fn default_include_trace() -> bool {
    true
}

/// 问答请求
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// 是否在响应中附带逐步轨迹
    #[serde(default = "default_include_trace")]
    pub include_trace: bool,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            include_trace: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub model_name: String,
    pub database_type: String,
    pub total_iterations: usize,
    pub success: bool,
}

/// 限时问答的响应
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub answer: String,
    pub execution_time_seconds: f64,
    pub step_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<DisplayStep>>,
    pub category_histogram: BTreeMap<StepCategory, usize>,
    pub tools_used: Vec<String>,
    pub complexity_score: u32,
    pub execution_flow: Vec<String>,
    pub final_action: Option<String>,
    pub metadata: ResponseMetadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentConfiguration {
    pub agent_type: String,
    pub model_name: String,
    pub max_iterations: usize,
    pub max_execution_time_secs: u64,
    pub tool_timeout_secs: u64,
    pub top_k: usize,
    pub invoke_timeout_secs: u64,
}

/// 健康探针
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub initialized: bool,
    pub llm_service_status: LlmHealth,
    pub database_service_status: DatabaseHealth,
}

/// 完整状态（健康 + 配置 + 统计 + 表清单）
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub llm_service_status: LlmHealth,
    pub database_service_status: DatabaseHealth,
    pub agent_configuration: AgentConfiguration,
    pub statistics: UsageSnapshot,
    pub available_tables: Vec<String>,
    pub initialization_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub database_type: String,
    pub database_uri: String,
    pub available_tables: Vec<String>,
    pub table_count: usize,
    /// 前几张表的 table_info（截断）
    pub sample_table_info: BTreeMap<String, String>,
}

/// 查询服务
pub struct AgentService {
    agent: Arc<dyn ReasoningLoop>,
    llm: Arc<dyn LlmClient>,
    db: Arc<dyn SqlDatabase>,
    stats: Arc<UsageStatistics>,
    settings: ServiceSettings,
    initialized_at: DateTime<Utc>,
}

impl AgentService {
    /// 以现成的推理循环构建（不做连通性校验）
    pub fn new(
        agent: Arc<dyn ReasoningLoop>,
        llm: Arc<dyn LlmClient>,
        db: Arc<dyn SqlDatabase>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            agent,
            llm,
            db,
            stats: Arc::new(UsageStatistics::new()),
            settings,
            initialized_at: Utc::now(),
        }
    }

    /// 由 LLM 与数据库构建 SQL Agent；任一依赖不可用则返回 InitializationFailure
    pub async fn from_parts(
        llm: Arc<dyn LlmClient>,
        db: Arc<dyn SqlDatabase>,
        settings: ServiceSettings,
    ) -> Result<Self, AgentError> {
        if !llm.test_connection().await {
            return Err(AgentError::initialization("LLM service connection test failed"));
        }
        let db_ok = run_blocking(&db, |db| Ok(db.test_connection()))
            .await
            .map_err(|e| AgentError::initialization(e.detail()).with_source(e))?;
        if !db_ok {
            return Err(AgentError::initialization("Database connection test failed"));
        }

        let tables = run_blocking(&db, |db| db.list_tables())
            .await
            .map_err(|e| AgentError::initialization(e.detail()).with_source(e))?;
        if tables.is_empty() {
            tracing::warn!("No tables found in database, answers will be limited");
        } else {
            let shown: Vec<&str> = tables.iter().take(5).map(String::as_str).collect();
            tracing::info!(count = tables.len(), tables = ?shown, "Database tables available");
        }

        let agent = SqlAgent::new(Arc::clone(&llm), Arc::clone(&db), settings.limits.clone());
        tracing::info!(
            model = %llm.model_name(),
            dialect = %db.dialect(),
            tools = ?agent.tool_names(),
            "SQL agent initialized"
        );
        Ok(Self::new(Arc::new(agent), llm, db, settings))
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn statistics(&self) -> UsageSnapshot {
        self.stats.snapshot()
    }

    /// 限时问答：校验问题后在独立任务中运行推理，超时返回 TimeoutFailure
    pub async fn invoke(&self, request: &QueryRequest) -> Result<QueryResponse, AgentError> {
        let question = validate_question(&request.question, self.settings.question)?;
        self.stats.record_start();
        tracing::info!(question = %preview(&question, 100), "Processing query");

        match invoke_bounded(Arc::clone(&self.agent), &question, self.settings.invoke_timeout).await {
            Ok(result) => {
                self.stats
                    .record_success(Duration::from_secs_f64(result.execution_time_seconds));
                tracing::info!(
                    execution_time_secs = round2(result.execution_time_seconds),
                    steps = result.step_count,
                    "Query completed"
                );
                Ok(self.to_response(result, request.include_trace))
            }
            Err(err) => {
                self.stats.record_failure();
                tracing::error!(kind = %err.kind(), error = %err.detail(), "Query failed");
                Err(err)
            }
        }
    }

    /// 流式问答：问题不合法时直接输出 Error + Complete 且不计入统计
    pub fn stream(&self, question: &str) -> impl Stream<Item = Event> + Send + 'static {
        let question = match validate_question(question, self.settings.question) {
            Ok(q) => q,
            Err(err) => {
                let events = [Event::error(&err), Event::new(EventKind::Complete {})];
                return futures_util::stream::iter(events).left_stream();
            }
        };

        self.stats.record_start();
        let stats = Arc::clone(&self.stats);
        let mut elapsed = Duration::ZERO;
        stream_execution(Arc::clone(&self.agent), &question, self.settings.stream)
            .inspect(move |ev| match &ev.kind {
                EventKind::Summary {
                    execution_time_seconds,
                    ..
                } => {
                    elapsed = Duration::try_from_secs_f64(*execution_time_seconds).unwrap_or_default();
                }
                EventKind::Finish { .. } => stats.record_success(elapsed),
                EventKind::Error { .. } => stats.record_failure(),
                _ => {}
            })
            .right_stream()
    }

    /// 两个依赖都连通才算 healthy
    pub async fn health(&self) -> ServiceHealth {
        let (llm, database) = tokio::join!(self.llm_health(), self.database_health());
        ServiceHealth {
            healthy: llm.connected && database.connected,
            initialized: true,
            llm_service_status: llm,
            database_service_status: database,
        }
    }

    pub async fn status(&self) -> ServiceStatus {
        let listing = tokio::time::timeout(
            DEPENDENCY_CHECK_TIMEOUT,
            run_blocking(&self.db, |db| db.list_tables()),
        )
        .await;
        let available_tables = match listing {
            Ok(Ok(tables)) => tables,
            Ok(Err(e)) => {
                tracing::warn!(error = %e.detail(), "Failed to list tables for status");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("Listing tables for status timed out");
                Vec::new()
            }
        };
        let (llm, database) = tokio::join!(self.llm_health(), self.database_health());
        let limits = &self.settings.limits;
        ServiceStatus {
            initialized: true,
            llm_service_status: llm,
            database_service_status: database,
            agent_configuration: AgentConfiguration {
                agent_type: "react_sql".to_string(),
                model_name: self.agent.model_name(),
                max_iterations: limits.max_iterations,
                max_execution_time_secs: limits.max_execution_time.as_secs(),
                tool_timeout_secs: limits.tool_timeout.as_secs(),
                top_k: limits.top_k,
                invoke_timeout_secs: self.settings.invoke_timeout.as_secs(),
            },
            statistics: self.stats.snapshot(),
            available_tables,
            initialization_time: self.initialized_at,
        }
    }

    /// 表清单 + 前几张表的样例信息
    pub async fn database_info(&self) -> Result<DatabaseInfo, AgentError> {
        let (tables, samples) = run_blocking(&self.db, |db| {
            let tables = db.list_tables()?;
            let mut samples = BTreeMap::new();
            for table in tables.iter().take(SAMPLE_TABLES) {
                let info = match db.table_info(std::slice::from_ref(table)) {
                    Ok(info) => preview(&info, SAMPLE_INFO_MAX_CHARS),
                    Err(e) => format!("Error getting info: {e}"),
                };
                samples.insert(table.clone(), info);
            }
            Ok((tables, samples))
        })
        .await?;

        let health = self.database_health().await;
        Ok(DatabaseInfo {
            database_type: health.database_type,
            database_uri: health.database_uri,
            table_count: tables.len(),
            available_tables: tables,
            sample_table_info: samples,
        })
    }

    /// 单表结构（列、主键、外键、索引）；表不存在时为 ExecutionFailure
    pub async fn table_schema(&self, table: &str) -> Result<TableSchema, AgentError> {
        let table = table.trim().to_string();
        run_blocking(&self.db, move |db| db.get_schema(&table)).await
    }

    async fn llm_health(&self) -> LlmHealth {
        match tokio::time::timeout(DEPENDENCY_CHECK_TIMEOUT, self.llm.health_check()).await {
            Ok(health) => health,
            Err(_) => {
                tracing::warn!(model = %self.llm.model_name(), "LLM health check timed out");
                LlmHealth {
                    connected: false,
                    ..self.llm.health_status()
                }
            }
        }
    }

    async fn database_health(&self) -> DatabaseHealth {
        let checked = tokio::time::timeout(
            DEPENDENCY_CHECK_TIMEOUT,
            run_blocking(&self.db, |db| Ok(db.health_status())),
        )
        .await;
        let engine_status = match checked {
            Ok(Ok(health)) => return health,
            Ok(Err(e)) => e.detail(),
            Err(_) => "health check timed out".to_string(),
        };
        tracing::warn!(status = %engine_status, "Database health check failed");
        DatabaseHealth {
            connected: false,
            engine_status,
            database_type: self.db.dialect().to_string(),
            database_uri: String::new(),
            last_check_secs_ago: None,
        }
    }

    fn to_response(&self, result: ExecutionResult, include_trace: bool) -> QueryResponse {
        let steps = include_trace.then(|| result.steps.iter().map(format_step_for_display).collect());
        QueryResponse {
            query_id: uuid::Uuid::new_v4().to_string(),
            answer: result.answer,
            execution_time_seconds: round2(result.execution_time_seconds),
            step_count: result.step_count,
            steps,
            category_histogram: result.summary.categories,
            tools_used: result.summary.tools_used,
            complexity_score: result.summary.complexity_score,
            execution_flow: result.execution_flow,
            final_action: result.summary.final_action,
            metadata: ResponseMetadata {
                model_name: self.agent.model_name(),
                database_type: self.db.dialect().to_string(),
                total_iterations: result.step_count,
                success: true,
            },
            timestamp: Utc::now(),
        }
    }
}

/// 按 [llm] 段构建客户端；openai 需要 api_key_env 指向的环境变量
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::info!("Using mock LLM client");
            Ok(Arc::new(MockLlmClient::new()))
        }
        "openai" => {
            let api_key = std::env::var(&cfg.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    AgentError::initialization(format!(
                        "API key not configured, set the {} environment variable",
                        cfg.api_key_env
                    ))
                })?;
            let client = OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, &api_key)
                .with_temperature(cfg.temperature)
                .with_request_timeout(Duration::from_secs(cfg.request_timeout_secs))
                .with_max_retries(cfg.max_retries)
                .with_health_check_interval(Duration::from_secs(cfg.health_check_interval_secs));
            tracing::info!(model = %cfg.model, "Using OpenAI-compatible LLM client");
            Ok(Arc::new(client))
        }
        other => Err(AgentError::initialization(format!(
            "Unsupported LLM provider: {other}"
        ))),
    }
}

/// 按 [database] 段打开数据库；目前只支持 SQLite（`sqlite:` URI 或裸路径）
pub fn open_database(cfg: &DatabaseSection) -> Result<Arc<dyn SqlDatabase>, AgentError> {
    let uri = cfg.uri.trim();
    if uri.contains("://") && !uri.starts_with("sqlite:") {
        return Err(AgentError::initialization(format!(
            "Unsupported database URI: {}",
            mask_uri(uri)
        )));
    }
    let init_err = |e: crate::db::DatabaseError| AgentError::initialization(e.to_string()).with_source(e);
    let db = SqliteDatabase::open(uri)
        .map_err(init_err)?
        .with_sample_rows(cfg.sample_rows_in_table_info)
        .with_health_check_interval(Duration::from_secs(cfg.health_check_interval_secs))
        .with_busy_timeout(Duration::from_secs(cfg.busy_timeout_secs))
        .map_err(init_err)?;
    Ok(Arc::new(db))
}

/// 按配置构建完整服务（LLM + 数据库 + SQL Agent），并校验依赖
pub async fn create_agent_service(cfg: &AppConfig) -> Result<AgentService, AgentError> {
    let llm = create_llm_from_config(&cfg.llm)?;
    let db = open_database(&cfg.database)?;
    let service = AgentService::from_parts(llm, db, ServiceSettings::from_config(cfg)).await?;
    tracing::info!(environment = %cfg.app.environment, "Agent service initialized");
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    fn sample_db() -> Arc<dyn SqlDatabase> {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, country TEXT);
             INSERT INTO customers VALUES (1, 'Ana', 'PT'), (2, 'Bo', 'SE'), (3, 'Cy', 'PT');",
        )
        .unwrap();
        Arc::new(db)
    }

    async fn service(llm: MockLlmClient) -> AgentService {
        AgentService::from_parts(Arc::new(llm), sample_db(), ServiceSettings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_end_to_end() {
        let llm = MockLlmClient::scripted([
            "Thought: I should look at the tables in the database to see what I can query.\nAction: sql_db_list_tables\nAction Input: ",
            "Thought: I should query the schema of the customers table.\nAction: sql_db_schema\nAction Input: customers",
            "Thought: I will count customers per country.\nAction: sql_db_query\nAction Input: SELECT country, COUNT(*) FROM customers GROUP BY country ORDER BY country",
            "Thought: I now know the final answer\nFinal Answer: PT has 2 customers and SE has 1.",
        ]);
        let svc = service(llm).await;
        let resp = svc.invoke(&QueryRequest::new("How many customers per country?")).await.unwrap();

        assert_eq!(resp.answer, "PT has 2 customers and SE has 1.");
        assert_eq!(resp.step_count, 3);
        assert_eq!(resp.steps.as_ref().map(Vec::len), Some(3));
        assert_eq!(
            resp.tools_used,
            vec!["sql_db_list_tables", "sql_db_schema", "sql_db_query"]
        );
        assert_eq!(resp.category_histogram.get(&StepCategory::DataRetrieval), Some(&1));
        assert_eq!(resp.metadata.database_type, "sqlite");

        let stats = svc.statistics();
        assert_eq!((stats.total_queries, stats.successful_queries, stats.failed_queries), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_invoke_without_trace() {
        let llm = MockLlmClient::scripted(["Final Answer: nothing to do"]);
        let svc = service(llm).await;
        let req = QueryRequest {
            question: "Say hello please".into(),
            include_trace: false,
        };
        let resp = svc.invoke(&req).await.unwrap();
        assert!(resp.steps.is_none());
        assert_eq!(resp.step_count, 0);
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_counted() {
        let svc = service(MockLlmClient::new()).await;
        let err = svc.invoke(&QueryRequest::new("  ")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        let err = svc.invoke(&QueryRequest::new("hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert_eq!(svc.statistics().total_queries, 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_counted() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(crate::llm::LlmError::Timeout);
        let db = sample_db();
        let agent = SqlAgent::new(llm.clone(), Arc::clone(&db), AgentLimits::default());
        let svc = AgentService::new(Arc::new(agent), llm, db, ServiceSettings::default());

        let err = svc.invoke(&QueryRequest::new("Which customers?")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
        let stats = svc.statistics();
        assert_eq!((stats.total_queries, stats.failed_queries), (1, 1));
    }

    #[tokio::test]
    async fn test_stream_records_statistics() {
        let llm = MockLlmClient::scripted(["Final Answer: 3 customers"]);
        let svc = service(llm).await;
        let events: Vec<Event> = svc.stream("How many customers?").collect().await;
        assert_eq!(events.last().map(Event::event_type), Some("execution_complete"));
        assert!(events.iter().any(|e| e.event_type() == "agent_finish"));
        let stats = svc.statistics();
        assert_eq!((stats.total_queries, stats.successful_queries), (1, 1));
    }

    #[tokio::test]
    async fn test_stream_invalid_question() {
        let svc = service(MockLlmClient::new()).await;
        let events: Vec<Event> = svc.stream("").collect().await;
        let types: Vec<&str> = events.iter().map(Event::event_type).collect();
        assert_eq!(types, vec!["agent_error", "execution_complete"]);
        assert_eq!(svc.statistics().total_queries, 0);
    }

    #[tokio::test]
    async fn test_status_and_database_info() {
        let svc = service(MockLlmClient::new()).await;
        let status = svc.status().await;
        assert!(status.initialized);
        assert_eq!(status.available_tables, vec!["customers"]);
        assert!(status.database_service_status.connected);
        assert_eq!(status.agent_configuration.max_iterations, 15);

        let info = svc.database_info().await.unwrap();
        assert_eq!(info.table_count, 1);
        let sample = &info.sample_table_info["customers"];
        assert!(sample.contains("CREATE TABLE customers"));
        assert!(sample.chars().count() <= SAMPLE_INFO_MAX_CHARS + 3);

        let health = svc.health().await;
        assert!(health.healthy);
        assert!(health.llm_service_status.connected);

        let schema = svc.table_schema("customers").await.unwrap();
        assert_eq!(schema.primary_key, vec!["id"]);
        assert_eq!(schema.columns.len(), 3);
        let err = svc.table_schema("ghosts").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
    }

    #[tokio::test]
    async fn test_runaway_query_does_not_block_later_calls() {
        let llm = Arc::new(MockLlmClient::scripted([
            "Thought: I will count every row.\nAction: sql_db_query\nAction Input: WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x+1 FROM c) SELECT count(*) FROM c",
            "Thought: I now know the final answer\nFinal Answer: The count did not finish.",
        ]));
        let db = sample_db();
        let limits = AgentLimits {
            tool_timeout: Duration::from_millis(200),
            ..AgentLimits::default()
        };
        let agent = SqlAgent::new(llm.clone(), Arc::clone(&db), limits);
        let svc = AgentService::new(Arc::new(agent), llm, db, ServiceSettings::default());

        let resp = svc.invoke(&QueryRequest::new("How many rows are there?")).await.unwrap();
        assert_eq!(resp.answer, "The count did not finish.");
        let trace = serde_json::to_string(&resp.steps).unwrap();
        assert!(trace.contains("timed out after 200ms"), "{trace}");

        let health = tokio::time::timeout(Duration::from_secs(5), svc.health())
            .await
            .expect("health check blocked by runaway query");
        assert!(health.database_service_status.connected);
        assert!(health.healthy);

        let schema = tokio::time::timeout(Duration::from_secs(5), svc.table_schema("customers"))
            .await
            .expect("schema lookup blocked by runaway query")
            .unwrap();
        assert_eq!(schema.columns.len(), 3);
    }

    struct DeadLlm;

    #[async_trait::async_trait]
    impl LlmClient for DeadLlm {
        async fn complete(
            &self,
            _messages: &[crate::llm::Message],
        ) -> Result<String, crate::llm::LlmError> {
            Err(crate::llm::LlmError::Connection("connection refused".into()))
        }

        fn model_name(&self) -> &str {
            "dead"
        }
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_llm() {
        let llm: Arc<dyn LlmClient> = Arc::new(DeadLlm);
        let db = sample_db();
        let agent = SqlAgent::new(Arc::clone(&llm), Arc::clone(&db), AgentLimits::default());
        let svc = AgentService::new(Arc::new(agent), llm, db, ServiceSettings::default());

        let health = svc.health().await;
        assert!(!health.healthy);
        assert!(!health.llm_service_status.connected);
        assert_eq!(health.llm_service_status.model, "dead");
        assert!(health.database_service_status.connected);

        let status = svc.status().await;
        assert!(!status.llm_service_status.connected);
        assert_eq!(status.available_tables, vec!["customers"]);
    }

    #[test]
    fn test_unsupported_backends() {
        let mut llm = LlmSection::default();
        llm.provider = "cohere".into();
        assert_eq!(
            create_llm_from_config(&llm).err().map(|e| e.kind()),
            Some(ErrorKind::InitializationFailure)
        );

        let mut db = DatabaseSection::default();
        db.uri = "postgresql://u:p@localhost/db".into();
        let err = open_database(&db).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InitializationFailure);
        assert!(!err.to_string().contains("u:p"));
    }

    #[test]
    fn test_missing_api_key() {
        let mut llm = LlmSection::default();
        llm.api_key_env = "SQLBEE_TEST_KEY_THAT_IS_NOT_SET".into();
        let err = create_llm_from_config(&llm).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InitializationFailure);
        assert!(err.to_string().contains("SQLBEE_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
