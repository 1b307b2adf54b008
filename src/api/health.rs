//! 健康检查和服务状态 API
//!
//! 包含 /status, /health, /metrics 端点

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::error::{ApiError, MessageResponse};
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    auth_required: bool,
    namespace: String,
    convergence_mode: &'static str,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

/// 存活检查
///
/// GET /status
async fn status() -> Json<MessageResponse> {
    Json(MessageResponse::new("OK"))
}

/// 健康检查 - 返回版本、运行时间和生效的配置
///
/// GET /health
/// 无需认证
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "deploy-gate",
        version: VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.uptime_secs(),
        auth_required: state.gateway.auth_required(),
        namespace: state.config.watch.namespace.clone(),
        convergence_mode: state.config.watch.mode.as_str(),
    })
}

/// Prometheus 指标
///
/// GET /metrics
async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = state.metrics.export().map_err(|e| {
        tracing::error!(error = %e, "Failed to encode metrics");
        ApiError::internal(e.to_string())
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}
