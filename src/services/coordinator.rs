//! 多目标并发监视
//!
//! 每个目标一个监视任务，共享同一个绝对截止时间和取消信号。
//! 等待全部任务结束后汇总：全部收敛为成功，否则列出每个未收敛的目标。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::domain::application::{TargetFailure, TargetResource, WatchFailure, WatchOutcome};
use crate::domain::outcome::AggregatedResult;
use crate::infra::metrics::GateMetrics;

use super::watcher::LifecycleWatcher;

/// 监视协调器
#[derive(Clone)]
pub struct WatchCoordinator {
    watcher: LifecycleWatcher,
    metrics: Option<Arc<GateMetrics>>,
}

impl WatchCoordinator {
    pub fn new(watcher: LifecycleWatcher) -> Self {
        Self {
            watcher,
            metrics: None,
        }
    }

    /// 记录每个目标的监视结果
    pub fn with_metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn watcher(&self) -> &LifecycleWatcher {
        &self.watcher
    }

    /// 并发监视所有目标，直到每个目标都得到结果
    pub async fn coordinate(
        &self,
        targets: Vec<TargetResource>,
        expected_image: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AggregatedResult {
        let deadline = Instant::now() + timeout;
        let mut tasks = JoinSet::new();

        for (index, target) in targets.iter().cloned().enumerate() {
            let watcher = self.watcher.clone();
            let expected_image = expected_image.to_string();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let outcome = watcher
                    .watch(&target, &expected_image, deadline, &cancel)
                    .await;
                (index, outcome)
            });
        }

        // 按目标顺序保存结果，任务 panic 时记为内部错误
        let mut outcomes: Vec<Option<WatchOutcome>> = vec![None; targets.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!(error = %e, "Watcher task failed"),
            }
        }

        let failures: Vec<TargetFailure> = targets
            .into_iter()
            .zip(outcomes)
            .filter_map(|(target, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    WatchOutcome::Failed(WatchFailure::Internal("task did not complete".to_string()))
                });
                if let Some(ref metrics) = self.metrics {
                    metrics.record_watch(&outcome);
                }
                (!outcome.is_converged()).then(|| TargetFailure {
                    target: target.name,
                    outcome,
                })
            })
            .collect();

        if failures.is_empty() {
            info!("All applications converged");
            AggregatedResult::Success
        } else {
            info!(failed = failures.len(), "Some applications did not converge");
            AggregatedResult::PartialFailure(failures)
        }
    }
}
