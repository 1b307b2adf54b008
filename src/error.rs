//! 统一错误处理
//!
//! 提供 `ApiError` 枚举实现 `IntoResponse`，并把部署结果映射为 HTTP 响应。
//! 错误体只有一个键：`{"error": "<message>"}`。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::domain::outcome::AggregatedResult;

/// 部署成功时的响应消息
pub const DEPLOY_SUCCESS_MESSAGE: &str = "Application successfully deployed!";

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// 成功消息响应结构
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// 400 - 请求无效（缺少令牌、部署校验失败）
    BadRequest(String),
    /// 403 - 令牌无效
    Forbidden(String),
    /// 500 - 目标解析或监视失败
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(m) | ApiError::Forbidden(m) | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status().as_u16(), self.message())
    }
}

impl std::error::Error for ApiError {}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;

impl AggregatedResult {
    /// 转换为 HTTP 结果
    pub fn into_api_result(self) -> ApiResult<MessageResponse> {
        match self {
            AggregatedResult::Success => Ok(MessageResponse::new(DEPLOY_SUCCESS_MESSAGE)),
            AggregatedResult::AuthError(e) if e.is_missing_token() => {
                Err(ApiError::bad_request(e.to_string()))
            }
            AggregatedResult::AuthError(e) => Err(ApiError::forbidden(format!("invalid token: {}", e))),
            AggregatedResult::ValidationError(e) => {
                Err(ApiError::bad_request(format!("invalid deployment: {}", e)))
            }
            AggregatedResult::ResolveError(e) => Err(ApiError::internal(e.to_string())),
            AggregatedResult::PartialFailure(failures) => Err(ApiError::internal(
                AggregatedResult::failure_message(&failures),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::application::{ResolveError, TargetFailure, WatchOutcome};
    use crate::domain::deploy::ValidationError;
    use crate::domain::oidc::AuthError;

    #[test]
    fn test_success_message() {
        let ok = AggregatedResult::Success.into_api_result().unwrap();
        assert_eq!(ok.message, "Application successfully deployed!");
    }

    #[test]
    fn test_error_mapping() {
        let missing = AggregatedResult::AuthError(AuthError::MissingToken)
            .into_api_result()
            .unwrap_err();
        assert_eq!(
            missing,
            ApiError::BadRequest("X-GitHub-OIDC-Token header is required".to_string())
        );

        let forbidden = AggregatedResult::AuthError(AuthError::claim("iss", "invalid issuer: x"))
            .into_api_result()
            .unwrap_err();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert!(forbidden.message().starts_with("invalid token: "));

        let invalid = AggregatedResult::ValidationError(ValidationError::MissingField("system"))
            .into_api_result()
            .unwrap_err();
        assert_eq!(
            invalid,
            ApiError::BadRequest("invalid deployment: system is required".to_string())
        );

        let not_found = AggregatedResult::ResolveError(ResolveError::NotFound {
            selector: "a=b".to_string(),
        })
        .into_api_result()
        .unwrap_err();
        assert_eq!(not_found.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(not_found.message().contains("application not found"));

        let failed = AggregatedResult::PartialFailure(vec![TargetFailure {
            target: "app-b".to_string(),
            outcome: WatchOutcome::TimedOut,
        }])
        .into_api_result()
        .unwrap_err();
        assert_eq!(
            failed.message(),
            "failed to watch app-b: timed out waiting for application lifecycle"
        );
    }
}
