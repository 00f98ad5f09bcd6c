//! 传输层连接模块
//!
//! 客户端通过 [`Connect`] trait 获得到某个 [`Endpoint`] 的字节流。tether 自带
//! 基于 tokio TCP 的 [`HttpConnector`]（`tcp` feature）；需要 TLS、代理或
//! 内存传输时，实现 `Connect` 并交给
//! [`Builder::build_with_connector`](crate::client::Builder::build_with_connector)。
//!
//! 任何 `Fn(&Endpoint) -> Connecting` 闭包也实现了 `Connect`。
//!
//! 连接失败统一用 [`ConnectError`] 表示，并按原因分类为 DNS 解析失败、拒绝连接、
//! 不可达、协议不支持等，便于调用者区分。

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use http::uri::{Scheme, Uri};
use tokio::io::{AsyncRead, AsyncWrite};

cfg_tcp! {
    mod tcp;

    pub use self::tcp::HttpConnector;
}

/// 一个可复用连接的目标：`(scheme, host, port)`。
///
/// 连接池以它为键保存空闲连接。host 统一转为小写。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: Box<str>,
    port: u16,
}

/// 连接器交付的双向字节流。
///
/// 所有 `AsyncRead + AsyncWrite + Send + Unpin + 'static` 的类型都自动实现它。
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// `Connect::connect` 返回的 future。
pub type Connecting = Pin<Box<dyn Future<Output = Result<Box<dyn Io>, ConnectError>> + Send>>;

/// 建立到某个端点的传输层连接的能力。
pub trait Connect: Send + Sync + 'static {
    /// 连接到 `dst`。
    ///
    /// 返回的 future 不需要自行处理超时，连接阶段的截止时间由连接池负责。
    fn connect(&self, dst: &Endpoint) -> Connecting;
}

impl<F> Connect for F
where
    F: Fn(&Endpoint) -> Connecting + Send + Sync + 'static,
{
    fn connect(&self, dst: &Endpoint) -> Connecting {
        (self)(dst)
    }
}

/// 建立连接失败的原因。
pub struct ConnectError {
    kind: ConnectErrorKind,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

/// [`ConnectError`] 的分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectErrorKind {
    /// DNS 解析失败，或者解析结果为空。
    Resolve,
    /// 端点拒绝了连接（没有进程在监听）。
    Refused,
    /// 端点不可达（网络不可达、连接被重置、超时等其他 I/O 失败）。
    Unreachable,
    /// 连接器不支持该端点的 scheme。
    Unsupported,
    /// 其他原因。
    Other,
}

// ===== impl Endpoint =====

impl Endpoint {
    /// 创建一个端点。
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Endpoint {
        Endpoint {
            scheme,
            host: host.to_ascii_lowercase().into(),
            port,
        }
    }

    /// 从绝对 URI 中提取端点，缺省端口按 scheme 推断（http 为 80，https 为 443）。
    ///
    /// URI 没有 host 时返回 `None`。
    pub fn from_uri(uri: &Uri) -> Option<Endpoint> {
        let host = uri.host()?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);
        let port = match uri.port_u16() {
            Some(port) => port,
            None if scheme == Scheme::HTTPS => 443,
            None => 80,
        };
        Some(Endpoint::new(scheme, host, port))
    }

    /// 端点的 scheme。
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// 端点的 host。IPv6 地址保留方括号，与 URI 中的写法一致。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端点的端口。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 是否为该 scheme 的缺省端口。请求的 `Host` 头部在缺省端口时省略端口号。
    pub(crate) fn is_default_port(&self) -> bool {
        (self.scheme == Scheme::HTTP && self.port == 80)
            || (self.scheme == Scheme::HTTPS && self.port == 443)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// ===== impl ConnectError =====

impl ConnectError {
    /// 创建一个没有底层原因的连接错误。
    pub fn new(kind: ConnectErrorKind) -> ConnectError {
        ConnectError { kind, cause: None }
    }

    /// 附加底层原因。
    pub fn with<C: Into<Box<dyn StdError + Send + Sync>>>(mut self, cause: C) -> ConnectError {
        self.cause = Some(cause.into());
        self
    }

    /// 按 I/O 错误的种类归类：`ConnectionRefused` 为 `Refused`，其余为 `Unreachable`。
    pub fn from_io(err: io::Error) -> ConnectError {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectErrorKind::Refused,
            _ => ConnectErrorKind::Unreachable,
        };
        ConnectError::new(kind).with(err)
    }

    /// 错误分类。
    pub fn kind(&self) -> ConnectErrorKind {
        self.kind
    }
}

impl fmt::Debug for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("ConnectError");
        f.field(&self.kind);
        if let Some(ref cause) = self.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.kind {
            ConnectErrorKind::Resolve => "dns error",
            ConnectErrorKind::Refused => "connection refused",
            ConnectErrorKind::Unreachable => "endpoint unreachable",
            ConnectErrorKind::Unsupported => "unsupported scheme",
            ConnectErrorKind::Other => "connect error",
        })
    }
}

impl StdError for ConnectError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
