//! 单个 Application 的生命周期监视
//!
//! 状态机：Init → Watching → {Converged, TimedOut, Failed}
//!
//! 每次等待都在三者之间竞争：下一个状态事件、截止时间、取消信号。
//! 监视流是局部变量，任何退出路径都会 drop 它，从而释放服务端会话。

use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::application::{
    ConvergenceMode, LabelKeys, StatusEvent, TargetResource, WatchEventType, WatchFailure,
    WatchOutcome,
};
use crate::infra::store::{name_field_selector, ResourceStore, StoreError};

/// 收敛判定
///
/// 只记录判定所需的最少状态，不涉及 I/O
#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    mode: ConvergenceMode,
    expected_image: String,
    seen_out_of_sync: bool,
}

impl ConvergenceTracker {
    pub fn new(mode: ConvergenceMode, expected_image: impl Into<String>) -> Self {
        Self {
            mode,
            expected_image: expected_image.into(),
            seen_out_of_sync: false,
        }
    }

    /// 观察一个状态快照，返回是否已收敛
    pub fn observe(&mut self, event: &StatusEvent) -> Result<bool, WatchFailure> {
        match self.mode {
            ConvergenceMode::OutOfSync => {
                if event.is_out_of_sync() {
                    self.seen_out_of_sync = true;
                }
                Ok(self.seen_out_of_sync && event.is_synced_and_healthy())
            }
            ConvergenceMode::Image => {
                let images = event
                    .images
                    .as_ref()
                    .ok_or_else(|| WatchFailure::MissingField("status.summary.images".to_string()))?;
                let [current] = images.as_slice() else {
                    return Err(WatchFailure::UnexpectedImages(images.len()));
                };
                Ok(event.is_synced_and_healthy() && *current == self.expected_image)
            }
        }
    }
}

/// 生命周期监视器
#[derive(Clone)]
pub struct LifecycleWatcher {
    store: Arc<dyn ResourceStore>,
    labels: LabelKeys,
    mode: ConvergenceMode,
}

impl LifecycleWatcher {
    pub fn new(store: Arc<dyn ResourceStore>, labels: LabelKeys, mode: ConvergenceMode) -> Self {
        Self {
            store,
            labels,
            mode,
        }
    }

    pub fn mode(&self) -> ConvergenceMode {
        self.mode
    }

    /// 监视单个目标直到收敛、超时、失败或取消
    ///
    /// `deadline` 为绝对截止时间，由同一请求的所有监视器共享
    pub async fn watch(
        &self,
        target: &TargetResource,
        expected_image: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> WatchOutcome {
        let outcome = self.run(target, expected_image, deadline, cancel).await;
        match &outcome {
            WatchOutcome::Converged => {
                info!(application = %target.name, "Application is synced and healthy");
            }
            other => {
                warn!(application = %target.name, outcome = %other, "Application did not converge");
            }
        }
        outcome
    }

    async fn run(
        &self,
        target: &TargetResource,
        expected_image: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> WatchOutcome {
        // Init: 确认目标仍然存在并记录基线状态（基线不参与判定）
        let baseline = tokio::select! {
            _ = cancel.cancelled() => return WatchOutcome::Failed(WatchFailure::Canceled),
            _ = sleep_until(deadline) => return WatchOutcome::TimedOut,
            result = self.store.get(&target.namespace, &target.name) => result,
        };
        match baseline {
            Ok(object) => debug!(
                application = %target.name,
                sync = object.nested_str(&["status", "sync", "status"]).unwrap_or("-"),
                health = object.nested_str(&["status", "health", "status"]).unwrap_or("-"),
                "Baseline status"
            ),
            Err(e) => return WatchOutcome::Failed(WatchFailure::Store(e.to_string())),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let field_selector = name_field_selector(&target.name);
        let opened = tokio::select! {
            _ = cancel.cancelled() => return WatchOutcome::Failed(WatchFailure::Canceled),
            _ = sleep_until(deadline) => return WatchOutcome::TimedOut,
            result = self.store.watch(&target.namespace, &field_selector, remaining) => result,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                return WatchOutcome::Failed(WatchFailure::Store(format!(
                    "failed to watch application: {}",
                    e
                )))
            }
        };

        // Watching
        let mut tracker = ConvergenceTracker::new(self.mode, expected_image);
        let strict = self.mode == ConvergenceMode::Image;
        let timer = sleep_until(deadline);
        tokio::pin!(timer);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return WatchOutcome::Failed(WatchFailure::Canceled),
                _ = &mut timer => return WatchOutcome::TimedOut,
                next = stream.next() => next,
            };

            let event = match next {
                None if Instant::now() >= deadline => return WatchOutcome::TimedOut,
                None => return WatchOutcome::Failed(WatchFailure::StreamClosed),
                Some(Err(StoreError::WatchError(message))) => {
                    return WatchOutcome::Failed(WatchFailure::Store(message))
                }
                Some(Err(e)) => return WatchOutcome::Failed(WatchFailure::Store(e.to_string())),
                Some(Ok(event)) => event,
            };

            match event.event_type {
                WatchEventType::Bookmark => continue,
                WatchEventType::Deleted => return WatchOutcome::Failed(WatchFailure::Deleted),
                WatchEventType::Error => {
                    return WatchOutcome::Failed(WatchFailure::Store(
                        event
                            .object
                            .nested_str(&["message"])
                            .unwrap_or("watch error event")
                            .to_string(),
                    ))
                }
                WatchEventType::Added | WatchEventType::Modified => {}
            }

            let status =
                match StatusEvent::project(event.event_type, &event.object, &self.labels, strict) {
                    Ok(status) => status,
                    Err(failure) => return WatchOutcome::Failed(failure),
                };

            info!(
                application = %target.name,
                event = event.event_type.as_str(),
                sync = %status.sync_state,
                health = %status.health_state,
                images = ?status.images,
                "Status event"
            );

            match tracker.observe(&status) {
                Ok(true) => return WatchOutcome::Converged,
                Ok(false) => {}
                Err(failure) => return WatchOutcome::Failed(failure),
            }
        }
    }
}
