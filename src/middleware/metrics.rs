//! 请求指标中间件
//!
//! 按匹配到的路由模板记录请求数和耗时，未匹配的请求统一记为 `unmatched`。

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tokio::time::Instant;

use crate::state::AppState;

/// 记录请求数和耗时
pub async fn track_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let started = Instant::now();
    let response = next.run(request).await;

    state.metrics.observe_request(
        &method,
        &route,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}
