//! 基础设施模块
//!
//! 封装外部依赖（资源存储 API、签名密钥集、指标导出）

pub mod jwks;
pub mod kube;
pub mod memory;
pub mod metrics;
pub mod store;

pub use jwks::JwksClient;
pub use kube::{KubeStore, ResourceKind, TokenSource};
pub use memory::MemoryStore;
pub use metrics::GateMetrics;
pub use store::{ResourceStore, StoreError, WatchStream};
