//! JWKS 签名密钥客户端
//!
//! 从身份提供方拉取公开的 JSON Web Key Set 并缓存。
//! 遇到未知 `kid` 时强制刷新一次（限流）。

use jsonwebtoken::jwk::{Jwk, JwkSet};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 未知 kid 触发刷新的最小间隔
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// 拉取密钥集的请求超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 密钥获取错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwksError {
    #[error("failed to create key set client: {0}")]
    Client(String),

    #[error("failed to fetch key set from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("no signing key matches kid {0:?}")]
    UnknownKey(Option<String>),
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS 客户端
pub struct JwksClient {
    client: Client,
    url: String,
    ttl: Duration,
    refresh_interval: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksClient {
    pub fn new(url: impl Into<String>, ttl: Duration) -> Result<Self, JwksError> {
        Self::with_request_timeout(url, ttl, REQUEST_TIMEOUT)
    }

    fn with_request_timeout(
        url: impl Into<String>,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Self, JwksError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JwksError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            ttl,
            refresh_interval: MIN_REFRESH_INTERVAL,
            cache: RwLock::new(None),
        })
    }

    /// 覆盖未知 kid 触发刷新的最小间隔
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 查找签名密钥
    ///
    /// 无 `kid` 时仅当密钥集中恰好一个密钥才接受
    pub async fn find(&self, kid: Option<&str>) -> Result<Jwk, JwksError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    if let Some(jwk) = select(&cached.keys, kid) {
                        return Ok(jwk);
                    }
                    if cached.fetched_at.elapsed() < self.refresh_interval {
                        return Err(JwksError::UnknownKey(kid.map(str::to_string)));
                    }
                }
            }
        }

        let keys = self.refresh().await?;
        select(&keys, kid).ok_or_else(|| JwksError::UnknownKey(kid.map(str::to_string)))
    }

    /// 重新拉取密钥集并写入缓存
    async fn refresh(&self) -> Result<JwkSet, JwksError> {
        let fetch_err = |message: String| JwksError::Fetch {
            url: self.url.clone(),
            message,
        };

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "Key set endpoint returned non-success status");
            return Err(fetch_err(format!("status {}", response.status())));
        }

        let keys: JwkSet = response.json().await.map_err(|e| fetch_err(e.to_string()))?;
        info!(url = %self.url, keys = keys.keys.len(), "Fetched signing key set");

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });

        Ok(keys)
    }
}

fn select(keys: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => keys.find(kid).cloned(),
        None if keys.keys.len() == 1 => {
            debug!("Token has no kid, using the only key in the set");
            keys.keys.first().cloned()
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key_set(kids: &[&str]) -> serde_json::Value {
        json!({
            "keys": kids
                .iter()
                .map(|kid| json!({ "kty": "oct", "kid": kid, "k": "c2VjcmV0" }))
                .collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_find_caches_key_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["k1", "k2"])))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            JwksClient::new(format!("{}/jwks", server.uri()), Duration::from_secs(600)).unwrap();
        assert!(client.find(Some("k1")).await.is_ok());
        assert!(client.find(Some("k2")).await.is_ok());
        // 刷新间隔内的未知 kid 不会再次请求
        assert_eq!(
            client.find(Some("k3")).await.unwrap_err(),
            JwksError::UnknownKey(Some("k3".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_kid_requires_single_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/one"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["only"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/two"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["a", "b"])))
            .mount(&server)
            .await;

        let one =
            JwksClient::new(format!("{}/one", server.uri()), Duration::from_secs(600)).unwrap();
        assert!(one.find(None).await.is_ok());

        let two =
            JwksClient::new(format!("{}/two", server.uri()), Duration::from_secs(600)).unwrap();
        assert_eq!(two.find(None).await.unwrap_err(), JwksError::UnknownKey(None));
    }

    #[tokio::test]
    async fn test_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client =
            JwksClient::new(format!("{}/jwks", server.uri()), Duration::from_secs(600)).unwrap();
        assert!(matches!(
            client.find(Some("k1")).await,
            Err(JwksError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_kid_refreshes_after_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["k1"])))
            .with_priority(1)
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        // 轮换后的密钥集
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["k1", "k2"])))
            .expect(1)
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()), Duration::from_secs(600))
            .unwrap()
            .with_refresh_interval(Duration::from_millis(200));
        assert!(client.find(Some("k1")).await.is_ok());
        assert_eq!(
            client.find(Some("k2")).await.unwrap_err(),
            JwksError::UnknownKey(Some("k2".to_string()))
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(client.find(Some("k2")).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_honours_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(key_set(&["k1"]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = JwksClient::with_request_timeout(
            format!("{}/jwks", server.uri()),
            Duration::from_secs(600),
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(matches!(
            client.find(Some("k1")).await,
            Err(JwksError::Fetch { .. })
        ));
    }
}
