//! Deploy Gate - 部署生命周期网关
//!
//! CI 流水线提交部署描述，服务校验调用方的 OIDC 身份，找到对应的
//! Argo CD Application，并阻塞等待它们收敛（或超时、失败）后返回结果。

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::env::constants::VERSION;
use crate::config::EnvConfig;
use crate::state::{get_shutdown_token, trigger_shutdown, AppState, StateError};

/// 命令行覆盖的运行参数
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    /// 覆盖监听端口
    pub port_override: Option<u16>,
    /// 强制本地模式
    pub local: bool,
}

/// 启动错误
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to initialize: {0}")]
    State(#[from] StateError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// 初始化日志
///
/// `RUST_LOG` 未设置时默认 `info`
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// 加载配置并运行服务，直到收到关闭信号
pub async fn run(runtime: RuntimeConfig) -> Result<(), StartupError> {
    init_tracing();

    let mut config = EnvConfig::from_env();
    if runtime.local && !config.local {
        config = EnvConfig::from_lookup(|key| match key {
            "LOCAL" => Some("true".to_string()),
            _ => std::env::var(key).ok(),
        });
    }
    if let Some(port) = runtime.port_override {
        config.port = port;
    }

    tracing::info!(version = VERSION, "Starting deploy-gate");

    let port = config.port;
    let state = Arc::new(AppState::from_config(config)?);
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!(%addr, "Listening");

    tokio::spawn(async {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, canceling in-flight watches");
        trigger_shutdown();
    });

    let shutdown = get_shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(StartupError::Serve)?;

    tracing::info!("Server stopped");
    Ok(())
}

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
