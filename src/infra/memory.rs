//! 内存资源存储
//!
//! 进程内实现，支持标签/字段选择器匹配和脚本化的监视事件流。
//! 统计当前打开的监视会话数，用于确认每条退出路径都释放了会话。

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::application::{DynamicObject, WatchEvent};

use super::store::{ResourceStore, StoreError, WatchStream};

/// 脚本事件播放完毕后的行为
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterScript {
    /// 关闭流
    Close,
    /// 保持打开，不再产生事件
    Hang,
    /// 从打开监视起经过给定时长后关闭流
    CloseAfter(Duration),
}

/// 某个对象的脚本化监视
#[derive(Clone, Debug)]
pub struct WatchScript {
    pub events: Vec<Result<WatchEvent, StoreError>>,
    pub then: AfterScript,
}

impl WatchScript {
    pub fn new(events: Vec<WatchEvent>, then: AfterScript) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            then,
        }
    }
}

/// 打开的监视会话计数守卫
struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 守卫随流一起 drop
struct GuardedStream {
    inner: WatchStream,
    _guard: SessionGuard,
}

impl Stream for GuardedStream {
    type Item = Result<WatchEvent, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// 内存资源存储
#[derive(Default)]
pub struct MemoryStore {
    /// namespace -> objects
    objects: RwLock<HashMap<String, Vec<DynamicObject>>>,
    /// object name -> script
    scripts: RwLock<HashMap<String, WatchScript>>,
    open_watches: Arc<AtomicUsize>,
    total_watches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, namespace: &str, object: DynamicObject) {
        let mut objects = self.objects.write().await;
        objects.entry(namespace.to_string()).or_default().push(object);
    }

    /// 设置对象的监视脚本（未设置时监视流保持打开且无事件）
    pub async fn script(&self, name: &str, script: WatchScript) {
        let mut scripts = self.scripts.write().await;
        scripts.insert(name.to_string(), script);
    }

    /// 当前仍打开的监视会话数
    pub fn open_watches(&self) -> usize {
        self.open_watches.load(Ordering::SeqCst)
    }

    /// 累计打开过的监视会话数
    pub fn total_watches(&self) -> usize {
        self.total_watches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .get(namespace)
            .map(|items| {
                items
                    .iter()
                    .filter(|obj| obj.matches_labels(label_selector))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        let objects = self.objects.read().await;
        objects
            .get(namespace)
            .and_then(|items| items.iter().find(|obj| obj.name() == Some(name)))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("application {}/{}", namespace, name)))
    }

    async fn watch(
        &self,
        _namespace: &str,
        field_selector: &str,
        _timeout: Duration,
    ) -> Result<WatchStream, StoreError> {
        let name = field_selector
            .strip_prefix("metadata.name=")
            .ok_or_else(|| StoreError::Request(format!("unsupported field selector {}", field_selector)))?;

        let script = self
            .scripts
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or(WatchScript {
                events: Vec::new(),
                then: AfterScript::Hang,
            });

        self.total_watches.fetch_add(1, Ordering::SeqCst);
        let guard = SessionGuard::open(&self.open_watches);

        let events = stream::iter(script.events);
        let events = match script.then {
            AfterScript::Close => events.boxed(),
            AfterScript::Hang => events.chain(stream::pending()).boxed(),
            AfterScript::CloseAfter(delay) => {
                let closed = tokio::time::sleep(delay);
                events
                    .chain(stream::once(closed).filter_map(|_| async { None::<Result<WatchEvent, StoreError>> }))
                    .boxed()
            }
        };

        Ok(GuardedStream {
            inner: events,
            _guard: guard,
        }
        .boxed())
    }
}
