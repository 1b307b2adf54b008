//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod application;
pub mod deploy;
pub mod oidc;
pub mod outcome;

// Re-exports for convenience
pub use application::{
    ConvergenceMode, DynamicObject, LabelKeys, ResolveError, StatusEvent, TargetFailure,
    TargetResource, WatchEvent, WatchEventType, WatchFailure, WatchOutcome,
};
pub use deploy::{validate_deployment, DeploymentRequest, ValidatedDeployment, ValidationError};
pub use oidc::{AuthError, ClaimPolicy, Claims};
pub use outcome::AggregatedResult;
