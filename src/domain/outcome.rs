//! 整个部署请求的聚合结果

use super::application::{ResolveError, TargetFailure};
use super::deploy::ValidationError;
use super::oidc::AuthError;

/// 部署请求的最终结果
#[derive(Clone, Debug, PartialEq)]
pub enum AggregatedResult {
    /// 所有目标均已收敛
    Success,
    /// 至少一个目标未收敛，保留全部失败项
    PartialFailure(Vec<TargetFailure>),
    ValidationError(ValidationError),
    AuthError(AuthError),
    ResolveError(ResolveError),
}

impl AggregatedResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AggregatedResult::Success)
    }

    /// 多个失败合并为一条消息
    pub fn failure_message(failures: &[TargetFailure]) -> String {
        failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl From<ValidationError> for AggregatedResult {
    fn from(err: ValidationError) -> Self {
        AggregatedResult::ValidationError(err)
    }
}

impl From<AuthError> for AggregatedResult {
    fn from(err: AuthError) -> Self {
        AggregatedResult::AuthError(err)
    }
}

impl From<ResolveError> for AggregatedResult {
    fn from(err: ResolveError) -> Self {
        AggregatedResult::ResolveError(err)
    }
}
