//! SqlBee HTTP API
//!
//! 启动: cargo run --bin sqlbee-web --features web
//! 接口前缀 /api/v1；普通接口返回 `{data, error, request_id, timestamp}` 信封，
//! /chat/stream 以 SSE 逐条推送执行事件。

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use sqlbee::agent::{create_agent_service, AgentService, QueryRequest};
use sqlbee::config::load_config;
use sqlbee::core::{AgentError, ErrorKind};
use sqlbee::observability;

#[derive(Clone)]
struct AppState {
    service: Option<Arc<AgentService>>,
    /// 初始化失败原因（service 为 None 时）
    init_error: Option<String>,
}

#[derive(Serialize)]
struct ApiErrorBody {
    code: ErrorKind,
    message: String,
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    data: Option<T>,
    error: Option<ApiErrorBody>,
    request_id: String,
    timestamp: DateTime<Utc>,
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn ok<T: Serialize>(data: T) -> Response {
    let body = Envelope {
        data: Some(data),
        error: None,
        request_id: request_id(),
        timestamp: Utc::now(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationFailure => StatusCode::BAD_REQUEST,
        ErrorKind::TimeoutFailure | ErrorKind::UpstreamTimeout => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::UpstreamRateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ExecutionFailure => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InitializationFailure | ErrorKind::UpstreamUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn fail(err: &AgentError) -> Response {
    let body: Envelope<()> = Envelope {
        data: None,
        error: Some(ApiErrorBody {
            code: err.kind(),
            message: err.public_message(),
        }),
        request_id: request_id(),
        timestamp: Utc::now(),
    };
    (status_for(err.kind()), Json(body)).into_response()
}

impl AppState {
    fn service(&self) -> Result<&Arc<AgentService>, Response> {
        self.service.as_ref().ok_or_else(|| {
            let reason = self
                .init_error
                .clone()
                .unwrap_or_else(|| "Agent service not initialized".to_string());
            fail(&AgentError::initialization(reason))
        })
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<sqlbee::agent::ServiceHealth>,
}

/// GET /api/v1/health：未初始化时也返回 200，status 字段标明状态
async fn api_health(State(state): State<AppState>) -> Response {
    match state.service.as_ref() {
        Some(service) => {
            let health = service.health().await;
            let status = if health.healthy { "healthy" } else { "degraded" };
            ok(HealthBody {
                status,
                detail: Some(health),
            })
        }
        None => ok(HealthBody {
            status: "unhealthy",
            detail: None,
        }),
    }
}

/// GET /api/v1/status
async fn api_status(State(state): State<AppState>) -> Response {
    match state.service() {
        Ok(service) => ok(service.status().await),
        Err(resp) => resp,
    }
}

/// GET /api/v1/statistics
async fn api_statistics(State(state): State<AppState>) -> Response {
    match state.service() {
        Ok(service) => ok(service.statistics()),
        Err(resp) => resp,
    }
}

/// GET /api/v1/tables
async fn api_tables(State(state): State<AppState>) -> Response {
    let service = match state.service() {
        Ok(service) => service,
        Err(resp) => return resp,
    };
    match service.database_info().await {
        Ok(info) => ok(info),
        Err(e) => fail(&e),
    }
}

/// GET /api/v1/tables/:name
async fn api_table_schema(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let service = match state.service() {
        Ok(service) => service,
        Err(resp) => return resp,
    };
    match service.table_schema(&name).await {
        Ok(schema) => ok(schema),
        Err(e) => fail(&e),
    }
}

/// POST /api/v1/chat：限时问答
async fn api_chat(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    let service = match state.service() {
        Ok(service) => service,
        Err(resp) => return resp,
    };
    match service.invoke(&req).await {
        Ok(resp) => ok(resp),
        Err(e) => fail(&e),
    }
}

#[derive(Deserialize)]
struct StreamRequest {
    question: String,
}

/// POST /api/v1/chat/stream：SSE，事件名即 event_type
async fn api_chat_stream(State(state): State<AppState>, Json(req): Json<StreamRequest>) -> Response {
    let service = match state.service() {
        Ok(service) => service,
        Err(resp) => return resp,
    };
    let events = service
        .stream(&req.question)
        .map(|ev| SseEvent::default().event(ev.event_type()).json_data(&ev));
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
        .into_response()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None)?;
    let (service, init_error) = match create_agent_service(&cfg).await {
        Ok(service) => (Some(Arc::new(service)), None),
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e, "Agent service initialization failed");
            (None, Some(e.public_message()))
        }
    };
    let state = AppState {
        service,
        init_error,
    };

    let app = Router::new()
        .route("/api/v1/health", get(api_health))
        .route("/api/v1/status", get(api_status))
        .route("/api/v1/statistics", get(api_statistics))
        .route("/api/v1/tables", get(api_tables))
        .route("/api/v1/tables/:name", get(api_table_schema))
        .route("/api/v1/chat", post(api_chat))
        .route("/api/v1/chat/stream", post(api_chat_stream))
        .with_state(state);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    tracing::info!("SqlBee API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
