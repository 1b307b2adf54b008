//! 资源存储抽象
//!
//! 对 Kubernetes 风格 API 的 list / get / watch 封装。实现必须可并发使用。

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use crate::domain::application::{DynamicObject, WatchEvent};

/// 监视事件流
///
/// 持有流即持有服务端监视会话，drop 即释放
pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

/// 资源存储错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("watch error event: {0}")]
    WatchError(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Request(err.to_string())
    }
}

/// 资源存储
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// 按标签选择器列出命名空间内的对象
    async fn list(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<DynamicObject>, StoreError>;

    /// 按名称获取对象
    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError>;

    /// 按字段选择器打开监视，`timeout` 作为服务端超时
    async fn watch(
        &self,
        namespace: &str,
        field_selector: &str,
        timeout: Duration,
    ) -> Result<WatchStream, StoreError>;
}

/// 精确名称的字段选择器
pub fn name_field_selector(name: &str) -> String {
    format!("metadata.name={}", name)
}

/// 服务端超时秒数：向上取整，至少 1 秒
pub fn timeout_seconds(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}
