//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod coordinator;
pub mod gateway;
pub mod resolver;
pub mod token;
pub mod watcher;

pub use coordinator::WatchCoordinator;
pub use gateway::{DeploymentGateway, DeploymentSubmission};
pub use resolver::ResourceResolver;
pub use token::TokenValidator;
pub use watcher::{ConvergenceTracker, LifecycleWatcher};
