//! 部署提交 API
//!
//! 包含 /deployment 端点。请求会一直阻塞到所有目标收敛、超时或失败。

use axum::{extract::State, routing::post, Json, Router};
use bytes::Bytes;
use std::sync::Arc;

use crate::error::{ApiResult, MessageResponse};
use crate::middleware::{GitHubOidcToken, RequestTimeout};
use crate::services::DeploymentSubmission;
use crate::state::{get_shutdown_token, AppState};

/// 创建部署路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/deployment", post(submit_deployment))
}

/// 提交部署并等待应用收敛
///
/// POST /deployment
/// 需要 `X-GitHub-OIDC-Token`（本地模式除外），可选 `X-Timeout`
async fn submit_deployment(
    State(state): State<Arc<AppState>>,
    GitHubOidcToken(oidc_token): GitHubOidcToken,
    RequestTimeout(timeout): RequestTimeout,
    body: Bytes,
) -> ApiResult<Json<MessageResponse>> {
    // 客户端断开时 handler future 被 drop，guard 取消所有监视
    let cancel = get_shutdown_token().child_token();
    let _guard = cancel.clone().drop_guard();

    let submission = DeploymentSubmission {
        oidc_token,
        timeout,
        body,
    };

    let result = state.gateway.submit(submission, &cancel).await;
    state.metrics.record_deployment(&result);
    result.into_api_result().map(Json)
}
