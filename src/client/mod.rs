//! HTTP 客户端。
//!
//! [`Client`] 是一个轻量的句柄：它只持有配置快照以及连接池、请求登记表的共享引用。
//! 每个请求在执行器上作为独立任务运行，结果通过 [`ResponseFuture`] 交付。
//!
//! 请求的生命周期与句柄无关：丢弃 `Client`（包括它的所有克隆）不会取消任何已经
//! 提交的请求，它们的 future 依然会得到结果。只有 [`Client::shutdown`] 会主动
//! 取消未完成的请求。
//!
//! ## 超时
//!
//! 配置的超时按阶段分别计时：建立连接、写出请求、等待响应头，以及读取响应 body 的
//! 每一次读取。超时的连接一律被丢弃，不会回到连接池。
//!
//! ## 示例
//!
//! ```no_run
//! # #[cfg(feature = "tcp")]
//! # async fn run() -> tether::Result<()> {
//! use http_body_util::BodyExt;
//! use tether::Client;
//!
//! let client = Client::new(None);
//! let res = client.get("http://example.com/".parse().unwrap()).await?;
//! println!("status: {}", res.status());
//!
//! let body = res.into_body().collect().await?.to_bytes();
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::{Request, Uri};

pub use self::config::Config;
pub use self::registry::{RequestId, ResponseFuture};

use self::exec::{Exec, RequestExecutor};
use self::order::DispatchOrder;
use self::pool::Pool;
use self::registry::Registry;
use crate::body::Outgoing;
use crate::common::time::Time;
use crate::connect::Connect;
use crate::rt::{Executor, Timer};

mod config;
pub(crate) mod conn;
mod exec;
mod order;
pub(crate) mod pool;
mod registry;

/// 异步 HTTP/1 客户端。
///
/// 克隆得到的句柄共享同一个连接池、请求登记表和派发顺序。
#[derive(Clone)]
pub struct Client {
    base: Option<Uri>,
    config: Arc<Config>,
    pool: Pool,
    registry: Registry,
    order: Option<DispatchOrder>,
    exec: Exec,
    time: Time,
}

/// [`Client`] 的构造器。
pub struct Builder {
    config: Config,
    base: Option<Uri>,
    exec: Exec,
    time: Time,
}

// ===== impl Client =====

impl Client {
    /// 使用默认配置创建客户端。
    ///
    /// `base` 用于解析请求中的相对 URI。创建客户端不做任何 I/O。
    #[cfg(feature = "tcp")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
    pub fn new(base: Option<Uri>) -> Client {
        Client::with_config(base, &Config::default())
    }

    /// 使用给定的配置创建客户端。
    ///
    /// 配置被复制一份，之后修改 `config` 不影响这个客户端。
    #[cfg(feature = "tcp")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
    pub fn with_config(base: Option<Uri>, config: &Config) -> Client {
        let mut builder = Client::builder();
        builder.config(config.clone());
        if let Some(base) = base {
            builder.base_uri(base);
        }
        builder.build()
    }

    /// 创建一个 [`Builder`]。
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// 提交一个请求。
    ///
    /// 不会同步失败：所有错误（包括 URI 无效、协议版本不支持）都通过返回的 future 交付。
    /// 请求立即开始执行，不需要 poll 返回的 future。
    pub fn request(&self, req: Request<Outgoing>) -> ResponseFuture {
        let (completer, fut, cancel) = self
            .registry
            .submit(req.method().clone(), req.uri().clone());
        // 派发号码必须在提交时同步领取，才能反映提交顺序
        let ticket = self.order.as_ref().map(DispatchOrder::ticket);

        RequestExecutor {
            req,
            base: self.base.clone(),
            pool: self.pool.clone(),
            config: self.config.clone(),
            time: self.time.clone(),
            completer,
            cancel,
            ticket,
        }
        .spawn(&self.exec);
        fut
    }

    /// 提交一个没有 body 的 `GET` 请求。
    pub fn get(&self, uri: Uri) -> ResponseFuture {
        let mut req = Request::new(Outgoing::empty());
        *req.uri_mut() = uri;
        self.request(req)
    }

    /// 取消一个尚未完成的请求，它的 future 以取消错误结束。
    ///
    /// 请求已经有结果时什么都不做，返回 `false`。
    pub fn cancel(&self, id: RequestId) -> bool {
        self.registry.cancel(id)
    }

    /// 强制关闭：取消所有未完成的请求，并关闭连接池中的空闲连接。
    ///
    /// 返回被取消的请求数量。已经交付给调用者、正在读取的响应 body 不受影响。
    pub fn shutdown(&self) -> usize {
        let canceled = self.registry.cancel_all();
        self.pool.clear();
        debug!("client shutdown, {} requests canceled", canceled);
        canceled
    }

    /// 尚未得到结果的请求数量。
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// 请求是否仍在等待结果。
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.registry.is_pending(id)
    }

    /// 客户端使用的配置快照。
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base", &self.base)
            .field("config", &self.config)
            .field("pending", &self.registry.len())
            .finish()
    }
}

// ===== impl Builder =====

impl Builder {
    /// 默认配置的构造器。
    ///
    /// 启用 `tcp` feature 时默认使用 tokio 执行器和定时器；否则没有定时器，
    /// 配置的超时不会生效，需要通过 [`Builder::timer`] 提供。
    pub fn new() -> Builder {
        Builder {
            config: Config::default(),
            base: None,
            exec: Exec::Default,
            time: default_time(),
        }
    }

    /// 整体替换配置。
    pub fn config(&mut self, config: Config) -> &mut Self {
        self.config = config;
        self
    }

    /// 见 [`Config::timeout`]。
    pub fn timeout(&mut self, dur: Option<std::time::Duration>) -> &mut Self {
        self.config.timeout(dur);
        self
    }

    /// 见 [`Config::guarantee_order`]。
    pub fn guarantee_order(&mut self, enabled: bool) -> &mut Self {
        self.config.guarantee_order(enabled);
        self
    }

    /// 见 [`Config::pool_idle_timeout`]。
    pub fn pool_idle_timeout(&mut self, dur: Option<std::time::Duration>) -> &mut Self {
        self.config.pool_idle_timeout(dur);
        self
    }

    /// 见 [`Config::pool_max_idle_per_host`]。
    pub fn pool_max_idle_per_host(&mut self, max: usize) -> &mut Self {
        self.config.pool_max_idle_per_host(max);
        self
    }

    /// 见 [`Config::nodelay`]。
    pub fn nodelay(&mut self, enabled: bool) -> &mut Self {
        self.config.nodelay(enabled);
        self
    }

    /// 见 [`Config::max_headers`]。
    pub fn max_headers(&mut self, max: usize) -> &mut Self {
        self.config.max_headers(max);
        self
    }

    /// 解析相对 URI 时使用的基础 URI。
    pub fn base_uri(&mut self, base: Uri) -> &mut Self {
        self.base = Some(base);
        self
    }

    /// 运行请求任务的执行器。
    pub fn executor<E>(&mut self, exec: E) -> &mut Self
    where
        E: Executor<Pin<Box<dyn Future<Output = ()> + Send>>> + Send + Sync + 'static,
    {
        self.exec = Exec::new(exec);
        self
    }

    /// 实现各阶段超时的定时器。
    pub fn timer<M>(&mut self, timer: M) -> &mut Self
    where
        M: Timer + Send + Sync + 'static,
    {
        self.time = Time::Timer(Arc::new(timer));
        self
    }

    /// 使用内置的 TCP 连接器创建客户端。
    #[cfg(feature = "tcp")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tcp")))]
    pub fn build(&self) -> Client {
        let mut connector = crate::connect::HttpConnector::new();
        connector.set_nodelay(self.config.nodelay);
        self.build_with_connector(connector)
    }

    /// 使用自定义的连接器创建客户端。
    pub fn build_with_connector<C: Connect>(&self, connector: C) -> Client {
        let config = Arc::new(self.config.clone());
        let pool = Pool::new(Arc::new(connector), self.time.clone(), config.pool_config());
        let order = if config.guarantee_order {
            Some(DispatchOrder::new())
        } else {
            None
        };

        Client {
            base: self.base.clone(),
            config,
            pool,
            registry: Registry::new(),
            order,
            exec: self.exec.clone(),
            time: self.time.clone(),
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("base", &self.base)
            .field("exec", &self.exec)
            .finish()
    }
}

#[cfg(feature = "tcp")]
fn default_time() -> Time {
    Time::Timer(Arc::new(crate::rt::TokioTimer::new()))
}

#[cfg(not(feature = "tcp"))]
fn default_time() -> Time {
    Time::Empty
}
