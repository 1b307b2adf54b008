//! OIDC 令牌 extractor
//!
//! 只负责从 `X-GitHub-OIDC-Token` 头中取出令牌。是否必须提供以及签名校验
//! 由部署网关决定（本地模式下跳过）。

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::convert::Infallible;

/// 令牌请求头
pub const OIDC_TOKEN_HEADER: &str = "x-github-oidc-token";

/// GitHub Actions OIDC 令牌 Extractor
///
/// # Example
///
/// ```ignore
/// async fn handler(GitHubOidcToken(token): GitHubOidcToken) -> impl IntoResponse {
///     // token: Option<String>
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubOidcToken(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for GitHubOidcToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(read_oidc_token(&parts.headers)))
    }
}

/// 读取令牌头；缺失、为空或不是合法字符串时返回 None
pub fn read_oidc_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(OIDC_TOKEN_HEADER)?;
    match value.to_str() {
        Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
        Ok(_) => None,
        Err(_) => {
            tracing::warn!("X-GitHub-OIDC-Token header is not valid ASCII");
            None
        }
    }
}
