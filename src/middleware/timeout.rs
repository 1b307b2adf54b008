//! 请求超时 extractor
//!
//! `X-Timeout` 使用 Go 风格的时长字符串（`90s`、`3m`、`1h30m`、`1.5m`、`500ms`）。
//! 缺失、格式错误、零或负数时使用配置的默认超时。

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

/// 超时请求头
pub const TIMEOUT_HEADER: &str = "x-timeout";

/// 监视超时 Extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestTimeout {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(read_timeout(
            &parts.headers,
            state.config.watch.default_timeout,
        )))
    }
}

/// 读取超时头，无效时返回默认值
pub fn read_timeout(headers: &HeaderMap, default: Duration) -> Duration {
    let Some(raw) = headers.get(TIMEOUT_HEADER).and_then(|v| v.to_str().ok()) else {
        return default;
    };

    match parse_go_duration(raw) {
        Some(timeout) if !timeout.is_zero() => timeout,
        _ => {
            if !raw.trim().is_empty() {
                tracing::warn!(value = %raw, default_secs = default.as_secs(), "Invalid X-Timeout, using default");
            }
            default
        }
    }
}

/// 解析 Go 风格时长
///
/// 负数和超出 i64 纳秒范围的值返回 None。支持的单位：`ns`、`us`/`µs`、`ms`、`s`、`m`、`h`。
pub fn parse_go_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        nanos += value * scale;
        rest = &rest[unit_len..];
    }

    // 与 Go 的 time.Duration 一致，上限为 i64::MAX 纳秒（约 2562047h）
    if negative || !nanos.is_finite() || nanos >= i64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}
