//! 部署网关
//!
//! 单次部署提交的完整流程：认证 → 解析请求体 → 校验 → 解析目标 → 并发监视。
//! 任一步失败即返回对应的 [`AggregatedResult`]，不再进入后续步骤。

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::domain::deploy::{validate_deployment, DeploymentRequest, ValidationError};
use crate::domain::oidc::AuthError;
use crate::domain::outcome::AggregatedResult;

use super::coordinator::WatchCoordinator;
use super::resolver::ResourceResolver;
use super::token::TokenValidator;

/// 一次部署提交
#[derive(Clone, Debug)]
pub struct DeploymentSubmission {
    /// `X-GitHub-OIDC-Token` 头
    pub oidc_token: Option<String>,
    /// 整个请求的监视超时
    pub timeout: Duration,
    /// 原始请求体
    pub body: Bytes,
}

/// 部署网关
pub struct DeploymentGateway {
    /// 为 None 时跳过认证（本地模式）
    validator: Option<Arc<TokenValidator>>,
    resolver: ResourceResolver,
    coordinator: WatchCoordinator,
}

impl DeploymentGateway {
    pub fn new(
        validator: Option<Arc<TokenValidator>>,
        resolver: ResourceResolver,
        coordinator: WatchCoordinator,
    ) -> Self {
        Self {
            validator,
            resolver,
            coordinator,
        }
    }

    pub fn auth_required(&self) -> bool {
        self.validator.is_some()
    }

    /// 处理一次部署提交
    pub async fn submit(
        &self,
        submission: DeploymentSubmission,
        cancel: &CancellationToken,
    ) -> AggregatedResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("deployment", request_id = %request_id);
        self.run(submission, cancel).instrument(span).await
    }

    async fn run(
        &self,
        submission: DeploymentSubmission,
        cancel: &CancellationToken,
    ) -> AggregatedResult {
        if let Some(ref validator) = self.validator {
            let token = match submission.oidc_token.as_deref().map(str::trim) {
                Some(token) if !token.is_empty() => token,
                _ => return AggregatedResult::AuthError(AuthError::MissingToken),
            };
            match validator.validate(token).await {
                Ok(claims) => info!(repository = %claims.repository, "Token accepted"),
                Err(e) => {
                    warn!(error = %e, "Token rejected");
                    return e.into();
                }
            }
        }

        let request = match parse_body(&submission.body) {
            Ok(request) => request,
            Err(e) => return e.into(),
        };

        let deployment = match validate_deployment(request) {
            Ok(deployment) => deployment,
            Err(e) => {
                warn!(error = %e, "Invalid deployment");
                return e.into();
            }
        };

        info!(
            application = %deployment.application_name(),
            system = %deployment.system(),
            environment = %deployment.environment(),
            cluster_type = %deployment.cluster_type(),
            image = %deployment.image(),
            timeout_secs = submission.timeout.as_secs(),
            "Deployment accepted"
        );

        let targets = match self.resolver.resolve(&deployment).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "Failed to resolve applications");
                return e.into();
            }
        };

        self.coordinator
            .coordinate(targets, deployment.image(), submission.timeout, cancel)
            .await
    }
}

/// 解析请求体；空请求体和字面量 `null` 都视为缺少部署
fn parse_body(body: &[u8]) -> Result<Option<DeploymentRequest>, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))
}
