//! OIDC 令牌相关领域模型

use chrono::{DateTime, Utc};
use thiserror::Error;

/// 已验证的令牌声明
///
/// 只有签名校验和声明策略全部通过后才会构造
#[derive(Clone, Debug, PartialEq)]
pub struct Claims {
    pub issuer: String,
    pub audience: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub repository_owner: String,
    pub repository: String,
}

/// 声明策略（签发者、受众、仓库所有者均为部署常量）
#[derive(Clone, Debug)]
pub struct ClaimPolicy {
    pub issuer: String,
    pub audience: String,
    pub repository_owner: String,
}

/// 认证错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("X-GitHub-OIDC-Token header is required")]
    MissingToken,

    #[error("failed to verify token: {0}")]
    Malformed(String),

    #[error("failed to fetch signing keys: {0}")]
    KeySet(String),

    #[error("failed to validate claims: {claim}: {reason}")]
    Claim { claim: &'static str, reason: String },
}

impl AuthError {
    pub fn claim(claim: &'static str, reason: impl Into<String>) -> Self {
        Self::Claim {
            claim,
            reason: reason.into(),
        }
    }

    /// 是否为缺少令牌（400），其余认证错误映射为 403
    pub fn is_missing_token(&self) -> bool {
        matches!(self, AuthError::MissingToken)
    }
}
