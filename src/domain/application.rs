//! Argo CD Application 领域模型
//!
//! 资源存储返回的是松散类型的嵌套文档。这里提供一层窄的类型化投影：
//! 每个事件只在 [`StatusEvent::project`] 中提取一次所需字段，缺失即显式失败。

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SYNC_SYNCED: &str = "Synced";
pub const SYNC_OUT_OF_SYNC: &str = "OutOfSync";
pub const HEALTH_HEALTHY: &str = "Healthy";

/// 松散类型的资源对象
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DynamicObject(pub Value);

impl DynamicObject {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// 按路径读取字符串字段
    pub fn nested_str(&self, path: &[&str]) -> Option<&str> {
        path.iter()
            .try_fold(&self.0, |value, key| value.get(*key))?
            .as_str()
    }

    /// 按路径读取字符串数组；任一元素不是字符串时返回 None
    pub fn nested_str_slice(&self, path: &[&str]) -> Option<Vec<String>> {
        path.iter()
            .try_fold(&self.0, |value, key| value.get(*key))?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn name(&self) -> Option<&str> {
        self.nested_str(&["metadata", "name"])
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get("labels")?.get(key)?.as_str()
    }

    /// 是否满足 `k=v,k2=v2` 形式的标签选择器
    pub fn matches_labels(&self, selector: &str) -> bool {
        selector
            .split(',')
            .filter(|term| !term.is_empty())
            .all(|term| match term.split_once('=') {
                Some((key, value)) => self.label(key) == Some(value),
                None => false,
            })
    }
}

/// 用于选择目标资源的标签键
#[derive(Clone, Debug, PartialEq)]
pub struct LabelKeys {
    pub system: String,
    pub application: String,
    pub environment: String,
    pub cluster_type: String,
}

/// 解析出的监视目标
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetResource {
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for TargetResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// 监视事件类型
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

impl WatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Added => "ADDED",
            WatchEventType::Modified => "MODIFIED",
            WatchEventType::Deleted => "DELETED",
            WatchEventType::Bookmark => "BOOKMARK",
            WatchEventType::Error => "ERROR",
        }
    }
}

/// 监视流中的单个事件
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: DynamicObject,
}

impl WatchEvent {
    pub fn new(event_type: WatchEventType, object: DynamicObject) -> Self {
        Self { event_type, object }
    }
}

/// 应用身份标签（严格模式下提取）
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityLabels {
    pub system: String,
    pub application: String,
    pub environment: String,
    pub cluster_type: String,
}

/// 某一时刻的状态快照
#[derive(Clone, Debug, PartialEq)]
pub struct StatusEvent {
    pub event_type: WatchEventType,
    pub sync_state: String,
    pub health_state: String,
    /// `status.summary.images`，可能缺失
    pub images: Option<Vec<String>>,
    pub identity: Option<IdentityLabels>,
}

impl StatusEvent {
    /// 从资源对象投影出状态快照
    ///
    /// `strict` 为 true 时还要求身份标签存在
    pub fn project(
        event_type: WatchEventType,
        object: &DynamicObject,
        labels: &LabelKeys,
        strict: bool,
    ) -> Result<Self, WatchFailure> {
        let sync_state = required(object.nested_str(&["status", "sync", "status"]), "status.sync.status")?;
        let health_state = required(
            object.nested_str(&["status", "health", "status"]),
            "status.health.status",
        )?;

        let identity = if strict {
            Some(IdentityLabels {
                system: required_label(object, &labels.system)?,
                application: required_label(object, &labels.application)?,
                environment: required_label(object, &labels.environment)?,
                cluster_type: required_label(object, &labels.cluster_type)?,
            })
        } else {
            None
        };

        Ok(Self {
            event_type,
            sync_state: sync_state.to_string(),
            health_state: health_state.to_string(),
            images: object.nested_str_slice(&["status", "summary", "images"]),
            identity,
        })
    }

    pub fn is_synced_and_healthy(&self) -> bool {
        self.sync_state == SYNC_SYNCED && self.health_state == HEALTH_HEALTHY
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.sync_state == SYNC_OUT_OF_SYNC
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, WatchFailure> {
    value.ok_or_else(|| WatchFailure::MissingField(field.to_string()))
}

fn required_label(object: &DynamicObject, key: &str) -> Result<String, WatchFailure> {
    object
        .label(key)
        .map(str::to_string)
        .ok_or_else(|| WatchFailure::MissingField(format!("metadata.labels.{}", key)))
}

/// 收敛判定模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvergenceMode {
    /// 先观察到 OutOfSync，再观察到 Synced + Healthy
    #[default]
    OutOfSync,
    /// Synced + Healthy 且部署的镜像等于期望镜像
    Image,
}

impl ConvergenceMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "out-of-sync" | "outofsync" | "transition" => Some(ConvergenceMode::OutOfSync),
            "image" | "image-match" => Some(ConvergenceMode::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceMode::OutOfSync => "out-of-sync",
            ConvergenceMode::Image => "image",
        }
    }
}

/// 单个目标监视失败的原因
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WatchFailure {
    #[error("watch closed unexpectedly")]
    StreamClosed,

    #[error("missing status field {0}")]
    MissingField(String),

    #[error("expected 1 image, got {0}")]
    UnexpectedImages(usize),

    #[error("canceled")]
    Canceled,

    #[error("application was deleted")]
    Deleted,

    #[error("{0}")]
    Store(String),

    #[error("watcher task failed: {0}")]
    Internal(String),
}

/// 单个目标的监视结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    Converged,
    TimedOut,
    Failed(WatchFailure),
}

impl WatchOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, WatchOutcome::Converged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchOutcome::Converged => "converged",
            WatchOutcome::TimedOut => "timed_out",
            WatchOutcome::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for WatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchOutcome::Converged => write!(f, "converged"),
            WatchOutcome::TimedOut => write!(f, "timed out waiting for application lifecycle"),
            WatchOutcome::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

/// 未收敛的目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetFailure {
    pub target: String,
    pub outcome: WatchOutcome,
}

impl std::fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to watch {}: {}", self.target, self.outcome)
    }
}

/// 目标解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("application not found (selector: {selector})")]
    NotFound { selector: String },

    #[error("multiple applications found when only one was expected ({count} matched)")]
    Ambiguous { count: usize },

    #[error("failed to get application for deployment: {0}")]
    Store(String),

    #[error("failed to get application name: matched object has no metadata.name")]
    MissingName,
}
