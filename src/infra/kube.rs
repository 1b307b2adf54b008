//! Kubernetes API 资源存储
//!
//! 通过 REST 访问 `argoproj.io/v1alpha1` 的 Application 资源，复用连接池。
//! 监视接口返回按行分隔的 JSON 事件流。

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::env::KubeConfig;
use crate::domain::application::{DynamicObject, WatchEvent, WatchEventType};

use super::store::{timeout_seconds, ResourceStore, StoreError, WatchStream};

/// 监视请求在服务端超时之外额外等待的时间
const WATCH_GRACE: Duration = Duration::from_secs(30);

/// 单个监视事件行的最大字节数
const MAX_WATCH_LINE: usize = 16 * 1024 * 1024;

/// API 访问令牌来源
#[derive(Clone, Debug)]
pub enum TokenSource {
    None,
    Static(String),
    /// ServiceAccount 令牌会轮换，每次请求重新读取
    File(PathBuf),
}

/// 资源类型坐标
#[derive(Clone, Debug)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub plural: String,
}

impl ResourceKind {
    pub fn argocd_application() -> Self {
        Self {
            group: "argoproj.io".to_string(),
            version: "v1alpha1".to_string(),
            plural: "applications".to_string(),
        }
    }
}

/// Kubernetes 资源存储客户端
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    api_url: String,
    token: TokenSource,
    kind: ResourceKind,
}

impl KubeStore {
    /// 根据配置创建客户端
    pub fn new(config: &KubeConfig, kind: ResourceKind) -> Result<Self, StoreError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(ref path) = config.ca_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                StoreError::Request(format!("failed to read CA certificate {}: {}", path.display(), e))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build()?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            kind,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn collection_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/{}/{}/namespaces/{}/{}",
            self.api_url, self.kind.group, self.kind.version, namespace, self.kind.plural
        )
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        match &self.token {
            TokenSource::None => Ok(request),
            TokenSource::Static(token) => Ok(request.bearer_auth(token)),
            TokenSource::File(path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    StoreError::Request(format!("failed to read token {}: {}", path.display(), e))
                })?;
                Ok(request.bearer_auth(token.trim()))
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorize(request).await?.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            message: status_message(&body).unwrap_or(body),
        })
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let request = self
            .client
            .get(self.collection_url(namespace))
            .query(&[("labelSelector", label_selector)]);

        let list: ObjectList = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        debug!(namespace = %namespace, selector = %label_selector, count = list.items.len(), "Listed applications");
        Ok(list.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        let url = format!("{}/{}", self.collection_url(namespace), name);
        match self.send(self.client.get(url)).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| StoreError::Decode(e.to_string())),
            Err(StoreError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(StoreError::NotFound(format!("application {}/{}", namespace, name)))
            }
            Err(e) => Err(e),
        }
    }

    async fn watch(
        &self,
        namespace: &str,
        field_selector: &str,
        timeout: Duration,
    ) -> Result<WatchStream, StoreError> {
        let timeout_secs = timeout_seconds(timeout).to_string();
        let request = self
            .client
            .get(self.collection_url(namespace))
            .query(&[
                ("watch", "true"),
                ("fieldSelector", field_selector),
                ("timeoutSeconds", timeout_secs.as_str()),
            ])
            .timeout(timeout + WATCH_GRACE);

        let response = self.send(request).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = LineBuffer::new(MAX_WATCH_LINE);
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        let lines = buffer.push(&chunk);
                        for line in lines {
                            if let Some(event) = decode_watch_line(&line) {
                                yield event;
                            }
                        }
                        if buffer.is_overflowing() {
                            warn!(limit = MAX_WATCH_LINE, "Watch event line too large");
                            yield Err(StoreError::Decode(format!(
                                "watch event exceeds {} bytes",
                                MAX_WATCH_LINE
                            )));
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Watch stream interrupted");
                        yield Err(StoreError::from(e));
                        return;
                    }
                }
            }
            if let Some(event) = decode_watch_line(&buffer.into_remainder()) {
                yield event;
            }
        };

        Ok(stream.boxed())
    }
}

/// 按换行切分的监视响应缓冲
///
/// 只扫描上次之后新到达的字节，未完成的行超过上限即视为溢出
struct LineBuffer {
    buffer: Vec<u8>,
    scanned: usize,
    max_line: usize,
}

impl LineBuffer {
    fn new(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    /// 追加数据并取出所有完整的行（不含换行符）
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(pos) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + pos;
            lines.push(self.buffer[start..end].to_vec());
            start = end + 1;
            from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        lines
    }

    fn is_overflowing(&self) -> bool {
        self.buffer.len() > self.max_line
    }

    fn into_remainder(self) -> Vec<u8> {
        self.buffer
    }
}

#[derive(Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<DynamicObject>,
}

/// Kubernetes `Status` 对象
#[derive(Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: Option<String>,
}

fn status_message(body: &str) -> Option<String> {
    serde_json::from_str::<ApiStatus>(body).ok()?.message
}

/// 解码一行监视事件，空行返回 None
fn decode_watch_line(line: &[u8]) -> Option<Result<WatchEvent, StoreError>> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(e) => return Some(Err(StoreError::Decode(e.to_string()))),
    };
    if line.is_empty() {
        return None;
    }

    let event = match serde_json::from_str::<WatchEvent>(line) {
        Ok(event) => event,
        Err(e) => return Some(Err(StoreError::Decode(e.to_string()))),
    };

    if event.event_type == WatchEventType::Error {
        let message = event
            .object
            .nested_str(&["message"])
            .unwrap_or("unknown error")
            .to_string();
        return Some(Err(StoreError::WatchError(message)));
    }

    Some(Ok(event))
}
