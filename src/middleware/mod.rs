//! 请求头 extractors 和请求指标中间件

pub mod auth;
pub mod metrics;
pub mod timeout;

pub use auth::GitHubOidcToken;
pub use metrics::track_metrics;
pub use timeout::RequestTimeout;
