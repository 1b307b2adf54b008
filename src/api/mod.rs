//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod deploy;
pub mod health;

use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::track_metrics;
use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & Status
        .merge(health::router())
        // Deployment
        .merge(deploy::router())
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
