//! 部署请求领域模型
//!
//! `DeploymentRequest` 是外部提交的原始描述，`ValidatedDeployment` 只能通过
//! [`validate_deployment`] 构造，下游组件只接受后者。

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

/// 部署请求（未校验）
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DeploymentRequest {
    /// 应用名称
    #[serde(default)]
    pub application_name: String,
    /// 所属系统
    #[serde(default)]
    pub system: String,
    /// 集群类型 (e.g., "aks", "gke")
    #[serde(default)]
    pub cluster_type: String,
    /// 环境 (e.g., "dev", "prod")
    #[serde(default)]
    pub environment: String,
    /// 镜像引用，`name@digest` 或 `name:environment@digest`
    #[serde(default)]
    pub image: String,
    /// 是否检查所有集群上的同名应用
    #[serde(default)]
    pub check_all_clusters: bool,
}

/// 部署请求校验错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("deployment is required")]
    MissingDeployment,

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{0} must only contain alphanumeric characters and hyphens")]
    InvalidName(&'static str),

    #[error("{0} must be a valid label value (at most 63 alphanumeric characters, '-', '_' or '.', starting and ending with an alphanumeric character)")]
    InvalidLabelValue(&'static str),

    #[error("image must be in the format name@digest or name:environment@digest")]
    BadImageFormat,
}

/// 已校验的部署
///
/// 字段私有，保证只能经由校验函数构造
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedDeployment {
    request: DeploymentRequest,
}

impl ValidatedDeployment {
    pub fn application_name(&self) -> &str {
        &self.request.application_name
    }

    pub fn system(&self) -> &str {
        &self.request.system
    }

    pub fn cluster_type(&self) -> &str {
        &self.request.cluster_type
    }

    pub fn environment(&self) -> &str {
        &self.request.environment
    }

    /// 规范化后的镜像引用
    pub fn image(&self) -> &str {
        &self.request.image
    }

    pub fn check_all_clusters(&self) -> bool {
        self.request.check_all_clusters
    }

    /// 取回底层请求（用于重新校验）
    pub fn into_request(self) -> DeploymentRequest {
        self.request
    }
}

impl TryFrom<DeploymentRequest> for ValidatedDeployment {
    type Error = ValidationError;

    fn try_from(request: DeploymentRequest) -> Result<Self, Self::Error> {
        validate_deployment(Some(request))
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("static pattern is valid"))
}

/// Kubernetes 标签值语法
fn label_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9_.-]{0,61}[A-Za-z0-9])?$").expect("static pattern is valid")
    })
}

/// 校验并规范化部署请求
///
/// 按顺序检查，第一个失败项即返回。若 `image` 中不包含 `environment`，
/// 将 `name@digest` 改写为 `name:environment@digest`。
pub fn validate_deployment(
    request: Option<DeploymentRequest>,
) -> Result<ValidatedDeployment, ValidationError> {
    let mut request = request.ok_or(ValidationError::MissingDeployment)?;

    if request.system.is_empty() {
        return Err(ValidationError::MissingField("system"));
    }
    if request.application_name.is_empty() {
        return Err(ValidationError::MissingField("application name"));
    }
    if !name_pattern().is_match(&request.system) {
        return Err(ValidationError::InvalidName("system name"));
    }
    if !name_pattern().is_match(&request.application_name) {
        return Err(ValidationError::InvalidName("application name"));
    }
    if request.cluster_type.is_empty() {
        return Err(ValidationError::MissingField("cluster type"));
    }
    if request.environment.is_empty() {
        return Err(ValidationError::MissingField("environment"));
    }
    // 两者都会拼进标签选择器，environment 还会写进镜像引用
    if !label_value_pattern().is_match(&request.cluster_type) {
        return Err(ValidationError::InvalidLabelValue("cluster type"));
    }
    if !label_value_pattern().is_match(&request.environment) {
        return Err(ValidationError::InvalidLabelValue("environment"));
    }
    if request.image.is_empty() {
        return Err(ValidationError::MissingField("image"));
    }

    if !request.image.contains(&request.environment) {
        let parts: Vec<&str> = request.image.split('@').collect();
        let [name, digest] = parts.as_slice() else {
            return Err(ValidationError::BadImageFormat);
        };
        request.image = format!("{}:{}@{}", name, request.environment, digest);
    }

    Ok(ValidatedDeployment { request })
}
