//! Prometheus 指标
//!
//! 请求计数与延迟按路由统计，另外记录每个监视目标的结果和每次部署的汇总结果。
//! 由 `GET /metrics` 以 Prometheus 文本格式导出。

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::domain::application::WatchOutcome;
use crate::domain::outcome::AggregatedResult;

/// 服务指标
pub struct GateMetrics {
    registry: Registry,
    /// HTTP 请求数
    pub requests_total: IntCounterVec,
    /// HTTP 请求耗时
    pub request_duration_seconds: HistogramVec,
    /// 单个目标的监视结果
    pub watch_outcomes_total: IntCounterVec,
    /// 部署提交的汇总结果
    pub deployments_total: IntCounterVec,
}

impl GateMetrics {
    /// 创建并注册全部指标
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("deploy_gate_http_requests_total", "HTTP requests"),
            &["method", "route", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        // 部署请求会阻塞到收敛，桶覆盖到默认超时之后
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "deploy_gate_http_request_duration_seconds",
                "HTTP request duration",
            )
            .buckets(vec![
                0.005, 0.05, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0,
            ]),
            &["method", "route"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let watch_outcomes_total = IntCounterVec::new(
            Opts::new(
                "deploy_gate_watch_outcomes_total",
                "Application watch outcomes",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(watch_outcomes_total.clone()))?;

        let deployments_total = IntCounterVec::new(
            Opts::new("deploy_gate_deployments_total", "Deployment submissions"),
            &["result"],
        )?;
        registry.register(Box::new(deployments_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            watch_outcomes_total,
            deployments_total,
        })
    }

    /// 记录一次 HTTP 请求
    pub fn observe_request(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        self.requests_total
            .with_label_values(&[method, route, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method, route])
            .observe(elapsed.as_secs_f64());
    }

    /// 记录单个目标的监视结果
    pub fn record_watch(&self, outcome: &WatchOutcome) {
        self.watch_outcomes_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// 记录一次部署提交的汇总结果
    pub fn record_deployment(&self, result: &AggregatedResult) {
        let label = match result {
            AggregatedResult::Success => "success",
            AggregatedResult::PartialFailure(_) => "partial_failure",
            AggregatedResult::ValidationError(_) => "validation_error",
            AggregatedResult::AuthError(_) => "auth_error",
            AggregatedResult::ResolveError(_) => "resolve_error",
        };
        self.deployments_total.with_label_values(&[label]).inc();
    }

    /// 以 Prometheus 文本格式导出
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::application::WatchFailure;

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = GateMetrics::new().unwrap();
        metrics.observe_request("POST", "/deployment", 200, Duration::from_millis(1500));
        metrics.record_watch(&WatchOutcome::Converged);
        metrics.record_watch(&WatchOutcome::TimedOut);
        metrics.record_watch(&WatchOutcome::Failed(WatchFailure::StreamClosed));
        metrics.record_deployment(&AggregatedResult::Success);

        let text = metrics.export().unwrap();
        assert!(text.contains(
            r#"deploy_gate_http_requests_total{method="POST",route="/deployment",status="200"} 1"#
        ));
        assert!(text.contains(
            r#"deploy_gate_http_request_duration_seconds_count{method="POST",route="/deployment"} 1"#
        ));
        assert!(text.contains(r#"deploy_gate_watch_outcomes_total{outcome="converged"} 1"#));
        assert!(text.contains(r#"deploy_gate_watch_outcomes_total{outcome="timed_out"} 1"#));
        assert!(text.contains(r#"deploy_gate_watch_outcomes_total{outcome="failed"} 1"#));
        assert!(text.contains(r#"deploy_gate_deployments_total{result="success"} 1"#));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = GateMetrics::new().unwrap();
        let second = GateMetrics::new().unwrap();
        first.record_deployment(&AggregatedResult::Success);

        assert!(!second.export().unwrap().contains("result=\"success\""));
    }
}
