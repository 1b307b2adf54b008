//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::env::EnvConfig;
use crate::domain::oidc::ClaimPolicy;
use crate::infra::jwks::{JwksClient, JwksError};
use crate::infra::kube::{KubeStore, ResourceKind};
use crate::infra::metrics::GateMetrics;
use crate::infra::store::{ResourceStore, StoreError};
use crate::services::{
    DeploymentGateway, LifecycleWatcher, ResourceResolver, TokenValidator, WatchCoordinator,
};

/// 全局 shutdown token，用于优雅关闭所有进行中的监视
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

/// 应用状态构建错误
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to create resource store client: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    KeySet(#[from] JwksError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 部署网关
    pub gateway: DeploymentGateway,
    /// Prometheus 指标
    pub metrics: Arc<GateMetrics>,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// 使用给定的资源存储创建应用状态
    pub fn new(config: EnvConfig, store: Arc<dyn ResourceStore>) -> Result<Self, StateError> {
        let metrics = Arc::new(GateMetrics::new()?);

        let validator = if config.auth_required() {
            let jwks = JwksClient::new(config.oidc.jwks_url.clone(), config.oidc.jwks_cache_ttl)?;
            let policy = ClaimPolicy {
                issuer: config.oidc.issuer.clone(),
                audience: config.oidc.audience.clone(),
                repository_owner: config.oidc.repository_owner.clone(),
            };
            Some(Arc::new(TokenValidator::new(
                jwks,
                policy,
                config.oidc.algorithms.clone(),
            )))
        } else {
            tracing::warn!("Running in local mode, OIDC token validation is disabled");
            None
        };

        let resolver = ResourceResolver::new(
            store.clone(),
            config.watch.namespace.clone(),
            config.watch.labels.clone(),
        );
        let coordinator = WatchCoordinator::new(LifecycleWatcher::new(
            store,
            config.watch.labels.clone(),
            config.watch.mode,
        ))
        .with_metrics(metrics.clone());

        tracing::info!(
            port = config.port,
            local = config.local,
            auth_required = config.auth_required(),
            jwks_url = %config.oidc.jwks_url,
            namespace = %config.watch.namespace,
            mode = config.watch.mode.as_str(),
            "Loaded configuration"
        );

        Ok(Self {
            gateway: DeploymentGateway::new(validator, resolver, coordinator),
            metrics,
            started_at: Utc::now(),
            config,
        })
    }

    /// 使用 Kubernetes API 作为资源存储创建应用状态
    pub fn from_config(config: EnvConfig) -> Result<Self, StateError> {
        let store = KubeStore::new(&config.kube, ResourceKind::argocd_application())?;
        tracing::info!(api_url = %store.api_url(), "Resource store configured");
        Self::new(config, Arc::new(store))
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
