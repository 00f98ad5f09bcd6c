//! 未完成请求的登记表。
//!
//! 每个被接受的请求在这里有一条记录，直到它得到结果为止。登记表不属于任何
//! [`Client`](super::Client)：客户端与每个执行中的请求共同持有它，
//! 因此丢弃客户端不会影响任何已经提交的请求。
//!
//! 记录在得到结果的同时被移除（在锁内完成），所以同一个请求最多只会有一个结果：
//! 后到的完成调用找不到记录，它携带的结果被直接丢弃。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use futures_core::ready;
use http::{Method, Response, Uri};
use tokio::sync::{oneshot, Notify};

use crate::body::Incoming;

type Outcome = crate::Result<Response<Incoming>>;

/// 客户端内唯一的请求编号，按提交顺序递增。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

#[derive(Clone)]
pub(crate) struct Registry {
    inner: Arc<Mutex<Records>>,
}

struct Records {
    next_id: u64,
    map: HashMap<RequestId, Record>,
}

struct Record {
    tx: Option<oneshot::Sender<Outcome>>,
    method: Method,
    uri: Uri,
    created: Instant,
    cancel: Arc<Notify>,
}

/// 执行任务手中的完成凭证。
///
/// 任务在给出结果之前被丢弃（例如运行时关闭）时，请求以 dispatch gone 错误结束。
pub(crate) struct Completer {
    registry: Registry,
    id: RequestId,
    done: bool,
}

/// 一个请求的结果。
///
/// 它只依赖登记表，不依赖创建它的 [`Client`](super::Client)：客户端被丢弃后
/// 仍然会得到结果。丢弃这个 future 不会取消请求，结果到达时被直接丢弃。
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

// ===== impl Registry =====

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            inner: Arc::new(Mutex::new(Records {
                next_id: 0,
                map: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记一个新请求。
    ///
    /// 返回执行任务使用的完成凭证、交给调用者的 future，以及取消信号。
    pub(crate) fn submit(&self, method: Method, uri: Uri) -> (Completer, ResponseFuture, Arc<Notify>) {
        let (tx, rx) = oneshot::channel();
        let cancel = Arc::new(Notify::new());

        let id = {
            let mut records = self.lock();
            records.next_id += 1;
            let id = RequestId(records.next_id);
            trace!("request {} accepted: {} {}", id, method, uri);
            records.map.insert(
                id,
                Record {
                    tx: Some(tx),
                    method,
                    uri,
                    created: Instant::now(),
                    cancel: cancel.clone(),
                },
            );
            id
        };

        let completer = Completer {
            registry: self.clone(),
            id,
            done: false,
        };
        (completer, ResponseFuture { id, rx }, cancel)
    }

    /// 给请求一个结果。只有第一次调用生效，返回 `false` 表示请求早已有了结果。
    pub(crate) fn complete(&self, id: RequestId, outcome: Outcome) -> bool {
        let record = self.lock().map.remove(&id);
        match record {
            Some(mut record) => {
                trace!(
                    "request {} resolved after {:?}",
                    id,
                    record.created.elapsed()
                );
                record.resolve(outcome);
                true
            }
            None => {
                trace!("request {} already resolved, dropping late result", id);
                false
            }
        }
    }

    /// 取消一个尚未完成的请求：通知执行任务停止，并以取消错误结束请求。
    ///
    /// 丢弃客户端不会调用它；只有 [`Client::shutdown`](super::Client::shutdown) 会。
    pub(crate) fn cancel(&self, id: RequestId) -> bool {
        let record = self.lock().map.remove(&id);
        match record {
            Some(record) => {
                record.cancel_with(id);
                true
            }
            None => false,
        }
    }

    /// 取消所有尚未完成的请求，返回被取消的数量。
    pub(crate) fn cancel_all(&self) -> usize {
        let records: Vec<(RequestId, Record)> = self.lock().map.drain().collect();
        let n = records.len();
        for (id, record) in records {
            record.cancel_with(id);
        }
        n
    }

    pub(crate) fn is_pending(&self, id: RequestId) -> bool {
        self.lock().map.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().map.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("pending", &self.len())
            .finish()
    }
}

// ===== impl Record =====

impl Record {
    fn resolve(&mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            if tx.send(outcome).is_err() {
                trace!("response future dropped, discarding result");
            }
        }
    }

    fn cancel_with(mut self, _id: RequestId) {
        debug!("request {} canceled: {} {}", _id, self.method, self.uri);
        self.cancel.notify_one();
        self.resolve(Err(crate::Error::new_canceled()));
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        self.resolve(Err(dispatch_gone()));
    }
}

// ===== impl Completer =====

impl Completer {
    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    /// 请求是否仍在等待结果（没有被取消，也没有被完成）。
    pub(crate) fn is_pending(&self) -> bool {
        self.registry.is_pending(self.id)
    }

    pub(crate) fn complete(mut self, outcome: Outcome) -> bool {
        self.done = true;
        self.registry.complete(self.id, outcome)
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if !self.done {
            self.registry.complete(self.id, Err(dispatch_gone()));
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Completer").field(&self.id).finish()
    }
}

fn dispatch_gone() -> crate::Error {
    crate::Error::new_user_dispatch_gone()
}

// ===== impl ResponseFuture =====

impl ResponseFuture {
    /// 该请求的编号。
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for ResponseFuture {
    type Output = crate::Result<Response<Incoming>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(_canceled) => Poll::Ready(Err(dispatch_gone())),
        }
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.id)
            .finish()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(registry: &Registry) -> (Completer, ResponseFuture, Arc<Notify>) {
        registry.submit(Method::GET, Uri::from_static("http://example.com/"))
    }

    fn ok() -> Outcome {
        Ok(Response::new(Incoming::empty()))
    }

    #[tokio::test]
    async fn first_completion_wins() {
        let registry = Registry::new();
        let (completer, fut, _cancel) = submit(&registry);
        let id = completer.id();
        assert_eq!(fut.id(), id);
        assert!(registry.is_pending(id));

        assert!(registry.complete(id, Err(crate::Error::new_timeout(crate::Stage::Headers))));
        assert!(!completer.complete(ok()));
        assert!(registry.is_empty());

        let err = fut.await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn ids_increase() {
        let registry = Registry::new();
        let (a, _fa, _) = submit(&registry);
        let (b, _fb, _) = submit(&registry);
        assert!(a.id() < b.id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn cancel_signals_executor() {
        let registry = Registry::new();
        let (completer, fut, cancel) = submit(&registry);

        assert!(registry.cancel(completer.id()));
        // 执行任务之后才开始等待，也能收到取消信号
        cancel.notified().await;
        assert!(!completer.is_pending());
        assert!(!registry.cancel(completer.id()));

        assert!(fut.await.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn cancel_after_completion_is_noop() {
        let registry = Registry::new();
        let (completer, fut, _cancel) = submit(&registry);
        let id = completer.id();
        assert!(completer.complete(ok()));
        assert!(!registry.cancel(id));
        assert!(fut.await.is_ok());
    }

    #[tokio::test]
    async fn cancel_all_resolves_everything() {
        let registry = Registry::new();
        let (_a, fa, _) = submit(&registry);
        let (_b, fb, _) = submit(&registry);

        assert_eq!(registry.cancel_all(), 2);
        assert!(registry.is_empty());
        assert!(fa.await.unwrap_err().is_canceled());
        assert!(fb.await.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn dropped_completer_is_dispatch_gone() {
        let registry = Registry::new();
        let (completer, fut, _cancel) = submit(&registry);
        drop(completer);

        let err = fut.await.unwrap_err();
        assert!(err.is_user());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn record_outlives_dropped_future() {
        let registry = Registry::new();
        let (completer, fut, _cancel) = submit(&registry);
        drop(fut);
        assert!(registry.is_pending(completer.id()));
        assert!(completer.complete(ok()));
    }
}
