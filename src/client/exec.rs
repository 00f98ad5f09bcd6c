//! 单个请求的执行任务。
//!
//! 每个请求在执行器上作为独立任务运行，依次经过：
//!
//! ```text
//! Queued -> Connecting -> Sending -> AwaitingHeaders -> Completed
//!                                                    \-> Failed
//! ```
//!
//! 响应头到达时请求即完成，body 由 [`Incoming`] 继续从连接上读取。
//! 任何阶段的超时或取消都直接进入 Failed，不做重试。

use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::task::Poll;

use http::header::{Entry, HeaderValue, HOST, TRANSFER_ENCODING};
use http::uri::{PathAndQuery, Uri};
use http::{HeaderMap, Method, Request, Response, Version};
use tokio::sync::Notify;

use super::config::Config;
use super::order::Ticket;
use super::pool::Pool;
use super::registry::Completer;
use crate::body::{Incoming, Outgoing};
use crate::common::time::Time;
use crate::connect::Endpoint;
use crate::error::Stage;
use crate::headers;
use crate::proto::{BodyLength, RequestHead, RequestLine};
use crate::rt::Executor;

pub(crate) type BoxSendFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// 运行请求任务的执行器。
#[derive(Clone)]
pub(crate) enum Exec {
    /// `tokio::spawn`
    Default,
    Executor(Arc<dyn Executor<BoxSendFuture> + Send + Sync>),
}

impl Exec {
    pub(crate) fn new<E>(exec: E) -> Exec
    where
        E: Executor<BoxSendFuture> + Send + Sync + 'static,
    {
        Exec::Executor(Arc::new(exec))
    }

    fn execute<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match *self {
            Exec::Default => {
                #[cfg(feature = "tcp")]
                {
                    tokio::spawn(fut);
                }
                #[cfg(not(feature = "tcp"))]
                {
                    // 任务被丢弃，请求随之以 dispatch gone 结束
                    warn!("no executor configured, dropping request task");
                    drop(fut);
                }
            }
            Exec::Executor(ref e) => e.execute(Box::pin(fut)),
        }
    }
}

impl fmt::Debug for Exec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Exec::Default => f.write_str("Exec::Default"),
            Exec::Executor(..) => f.write_str("Exec::Executor"),
        }
    }
}

/// 一个请求从提交到得到结果的全部状态。
pub(crate) struct RequestExecutor {
    pub(super) req: Request<Outgoing>,
    pub(super) base: Option<Uri>,
    pub(super) pool: Pool,
    pub(super) config: Arc<Config>,
    pub(super) time: Time,
    pub(super) completer: Completer,
    pub(super) cancel: Arc<Notify>,
    pub(super) ticket: Option<Ticket>,
}

impl RequestExecutor {
    /// 在执行器上启动任务。
    pub(crate) fn spawn(self, exec: &Exec) {
        let _id = self.completer.id();
        let fut = instrument!(self.run(), "request", id = %_id);
        exec.execute(fut);
    }

    async fn run(self) {
        let RequestExecutor {
            req,
            base,
            pool,
            config,
            time,
            completer,
            cancel,
            ticket,
        } = self;

        let mut canceled = pin!(cancel.notified());
        let mut drive = pin!(drive(req, base.as_ref(), &pool, &config, &time, ticket));

        // 取消时 drive 被丢弃，借出的连接和派发号码随之释放
        let outcome = poll_fn(|cx| {
            if let Poll::Ready(res) = drive.as_mut().poll(cx) {
                return Poll::Ready(Some(res));
            }
            if canceled.as_mut().poll(cx).is_ready() {
                return Poll::Ready(None);
            }
            Poll::Pending
        })
        .await;

        match outcome {
            Some(res) => {
                if let Err(ref _err) = res {
                    debug!("request failed: {}", _err);
                }
                completer.complete(res);
            }
            None => {
                trace!("request canceled");
                completer.complete(Err(crate::Error::new_canceled()));
            }
        }
    }
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("id", &self.completer.id())
            .field("method", self.req.method())
            .field("uri", self.req.uri())
            .finish()
    }
}

async fn drive(
    mut req: Request<Outgoing>,
    base: Option<&Uri>,
    pool: &Pool,
    config: &Config,
    time: &Time,
    ticket: Option<Ticket>,
) -> crate::Result<Response<Incoming>> {
    let endpoint = prepare(&mut req, base)?;
    let (mut parts, body) = req.into_parts();
    let body_len = frame_body(&mut parts.headers, &parts.method, &body)?;
    let method = parts.method.clone();
    let head = RequestHead {
        version: parts.version,
        subject: RequestLine(parts.method, parts.uri),
        headers: parts.headers,
    };

    // 轮到之前不建立连接：前一个请求的连接归还后，这里可以直接复用它
    if let Some(ref ticket) = ticket {
        ticket.wait_turn().await;
    }

    trace!("connecting to {}", endpoint);
    let mut conn = pool.acquire(&endpoint, config.timeout).await?;
    if let Some(ticket) = ticket {
        conn.hold_turn(ticket);
    }

    trace!("sending request");
    conn.send(&head, body_len, body, time, config.timeout).await?;

    trace!("awaiting response head");
    let received = time
        .deadline(
            config.timeout,
            Stage::Headers,
            conn.receive_head(&method, config.max_headers),
        )
        .await;
    let msg = match received {
        Ok(Ok(msg)) => msg,
        Ok(Err(err)) => return Err(err),
        Err(timeout) => {
            conn.disable_keep_alive();
            return Err(timeout);
        }
    };

    let body = Incoming::new(conn, msg.decode, msg.keep_alive, time.clone(), config.timeout);
    Ok(msg.head.into_response(body))
}

/// 规范化请求：检查协议版本，补全相对 URI，补上 `Host`，并把请求目标改写为
/// origin-form。返回请求的目标端点。
fn prepare(req: &mut Request<Outgoing>, base: Option<&Uri>) -> crate::Result<Endpoint> {
    match req.version() {
        Version::HTTP_10 | Version::HTTP_11 => (),
        _other => {
            debug!("request has unsupported version: {:?}", _other);
            return Err(crate::Error::new_user_unsupported_version());
        }
    }

    if req.uri().host().is_none() {
        let joined = join(base, req.uri())?;
        *req.uri_mut() = joined;
    }
    let endpoint = Endpoint::from_uri(req.uri())
        .ok_or_else(|| crate::Error::new_user_uri("request uri has no host"))?;

    if !req.headers().contains_key(HOST) {
        let host = if endpoint.is_default_port() {
            HeaderValue::from_str(endpoint.host())
        } else {
            HeaderValue::from_str(&format!("{}:{}", endpoint.host(), endpoint.port()))
        }
        .map_err(crate::Error::new_user_host)?;
        req.headers_mut().insert(HOST, host);
    }

    let target = req
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *req.uri_mut() = Uri::from(target);

    Ok(endpoint)
}

/// 相对 URI 按基础 URI 解析：以 `/` 开头的路径替换基础路径，否则接在基础路径的
/// 最后一个 `/` 之后。
fn join(base: Option<&Uri>, relative: &Uri) -> crate::Result<Uri> {
    let base = base.ok_or_else(|| crate::Error::new_user_uri("relative uri without a base uri"))?;

    let rel = relative.path_and_query().map_or("", |pq| pq.as_str());
    let path_and_query = if rel.starts_with('/') {
        rel.to_owned()
    } else {
        let base_path = base.path();
        let dir = match base_path.rfind('/') {
            Some(idx) => &base_path[..=idx],
            None => "/",
        };
        format!("{}{}", dir, rel)
    };

    let mut builder = Uri::builder().path_and_query(path_and_query);
    if let Some(scheme) = base.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = base.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build().map_err(crate::Error::new_user_uri)
}

/// 根据 body 决定请求的长度编码，并写入对应的头部。
///
/// 长度已知时使用 `Content-Length`（调用者显式设置的值优先，写出时会被检查）；
/// 长度未知的流使用 `Transfer-Encoding: chunked`。
fn frame_body(headers: &mut HeaderMap, method: &Method, body: &Outgoing) -> crate::Result<BodyLength> {
    let exact = body.exact_len();
    if let Some(len) = exact {
        if len > 0 || headers::method_has_defined_payload_semantics(method) {
            headers::set_content_length_if_missing(headers, len);
        }
    }

    match headers::content_length_parse_all(headers) {
        Ok(Some(len)) => {
            headers.remove(TRANSFER_ENCODING);
            return Ok(BodyLength::Known(len));
        }
        Ok(None) => (),
        Err(()) => {
            return Err(crate::Error::new_user_body("invalid content-length header"));
        }
    }

    if exact == Some(0) {
        return Ok(BodyLength::Known(0));
    }

    if !headers::transfer_encoding_is_chunked(headers) {
        match headers.entry(TRANSFER_ENCODING) {
            Entry::Occupied(entry) => headers::add_chunked(entry),
            Entry::Vacant(entry) => {
                entry.insert(HeaderValue::from_static("chunked"));
            }
        }
    }
    Ok(BodyLength::Unknown)
}
