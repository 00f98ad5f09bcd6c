//! 错误与结果类型模块
//!
//! tether 中所有可能发生的失败（连接建立失败、连接中途被中止、阶段超时、
//! 响应无法解析、请求被取消）都统一封装在 [`Error`] 中，并且只会通过请求的
//! [`ResponseFuture`](crate::client::ResponseFuture) 或响应 body 的读取操作
//! 交付给调用者，`Client::request` 本身从不同步失败。
//!
//! 调用者通过 `Error` 上的 `is_*` 方法判断错误类别；内部的 `Kind`、`Parse`、
//! `User` 枚举只在 crate 内可见。
//!
//! - **不透明错误**：`Error` 用 `Box<ErrorImpl>` 包装内部实现，栈上只占一个指针宽度。
//! - **错误链**：底层原因通过 `std::error::Error::source()` 暴露。超时使用
//!   [`TimedOut`] 哨兵类型挂在错误链上，携带发生超时的阶段。

use std::error::Error as StdError;
use std::fmt;

use crate::connect::ConnectError;

/// tether 方法常用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 类型擦除的错误原因。
type Cause = Box<dyn StdError + Send + Sync>;

/// 表示发送请求或读取响应时可能发生的错误。
///
/// # 格式化
///
/// `Display` 只打印当前层级的描述；要打印完整的原因链，请遍历
/// `Error::source()` 或使用等效的第三方报告类型。描述文字的具体内容不属于
/// 稳定 API。
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 错误分类。
#[derive(Debug)]
pub(super) enum Kind {
    /// DNS 解析失败、端点拒绝连接或不可达。发生在任何字节被发送之前，
    /// 连接从未进入连接池。
    Connect,
    /// 已建立的连接在请求/响应传输过程中被关闭（对端或传输层）。
    Aborted,
    /// 某个阶段的截止时间已过，具体阶段见错误链上的 [`TimedOut`]。
    Timeout,
    /// 字节流无法解码为合法的 HTTP 响应。
    Parse(Parse),
    /// 待处理的请求在完成之前被取消（只有硬关闭会这样做）。
    Canceled,
    /// 调用者提供的请求有问题。
    User(User),
}

/// 响应解析错误的子分类。
#[derive(Debug)]
pub(super) enum Parse {
    /// 无效的 HTTP 版本号
    Version,
    /// 无效的状态行或状态码
    Status,
    /// 头部解析错误
    Header(Header),
    /// 响应头过大（超过头部数量或缓冲区上限）
    TooLarge,
    /// 响应 body 的分块编码格式错误
    Chunked,
}

/// 头部解析错误的子分类。
#[derive(Debug)]
pub(super) enum Header {
    /// 头部包含无效的 token 字符
    Token,
    /// Content-Length 头部值无效或前后不一致
    ContentLengthInvalid,
    /// 出现了无法处理的 Transfer-Encoding
    TransferEncodingUnexpected,
}

/// 由调用者行为引起的错误。
#[derive(Debug)]
pub(super) enum User {
    /// 调用者提供的请求 body 流返回了错误。
    Body,
    /// 请求 URI 无法解析出 host（例如相对 URI 且客户端没有可用的基地址）。
    Uri,
    /// 由请求 URI 生成的 `Host` 头部值不合法。
    Host,
    /// 请求指定了不支持的 HTTP 版本（只支持 HTTP/1.0 与 HTTP/1.1）。
    UnsupportedVersion,
    /// 负责该请求的执行任务在完成前消失了（执行器被关闭或任务 panic）。
    DispatchGone,
}

/// 请求生命周期中带有独立截止时间的阶段。
///
/// 每个阶段的超时都从该阶段开始时计时，而不是从请求提交时累计。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// 建立传输层连接（包括 DNS 解析）。
    Connect,
    /// 将请求头与请求 body 写入连接。
    Send,
    /// 等待响应的状态行和头部。
    Headers,
    /// 读取响应 body 的单个数据块。
    BodyRead,
}

/// 哨兵类型，标识错误由超时引起，并记录超时发生在哪个阶段。
#[derive(Debug)]
pub(crate) struct TimedOut {
    stage: Stage,
}

impl Error {
    /// 如果这是连接建立阶段的错误（DNS 失败、拒绝连接、不可达、协议不支持），
    /// 返回 `true`。
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// 如果已建立的连接在请求或响应传输途中被关闭，返回 `true`。
    ///
    /// 这包括对端在响应头到达前关闭连接，以及 body 在声明的长度读完之前遇到 EOF。
    pub fn is_aborted(&self) -> bool {
        matches!(self.inner.kind, Kind::Aborted)
    }

    /// 如果错误由某个阶段的超时引起，返回 `true`。
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::Timeout) {
            return true;
        }
        self.find_source::<TimedOut>().is_some()
    }

    /// 返回发生超时的阶段；不是超时错误时返回 `None`。
    pub fn timeout_stage(&self) -> Option<Stage> {
        self.find_source::<TimedOut>().map(|t| t.stage)
    }

    /// 如果这是一个 HTTP 解析错误，返回 `true`。
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// 如果这是由无效状态行引起的解析错误，返回 `true`。
    pub fn is_parse_status(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::Status))
    }

    /// 如果这是关于一个被取消的请求，返回 `true`。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 如果此错误由调用者提供的请求引起，返回 `true`。
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// 如果这是连接建立错误，返回底层的 [`ConnectError`]。
    pub fn connect_error(&self) -> Option<&ConnectError> {
        self.find_source::<ConnectError>()
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// 在错误的 source 链中查找特定类型的错误。
    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        // else
        None
    }

    pub(super) fn new_connect(cause: ConnectError) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(super) fn new_aborted(cause: std::io::Error) -> Error {
        Error::new(Kind::Aborted).with(cause)
    }

    /// 连接在消息完成之前报告了 EOF。
    pub(super) fn new_incomplete() -> Error {
        Error::new(Kind::Aborted).with("connection closed before message completed")
    }

    pub(super) fn new_timeout(stage: Stage) -> Error {
        Error::new(Kind::Timeout).with(TimedOut { stage })
    }

    pub(super) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    fn new_user(user: User) -> Error {
        Error::new(Kind::User(user))
    }

    pub(super) fn new_user_body<E: Into<Cause>>(cause: E) -> Error {
        Error::new_user(User::Body).with(cause)
    }

    pub(super) fn new_user_uri<E: Into<Cause>>(cause: E) -> Error {
        Error::new_user(User::Uri).with(cause)
    }

    pub(super) fn new_user_host<E: Into<Cause>>(cause: E) -> Error {
        Error::new_user(User::Host).with(cause)
    }

    pub(super) fn new_user_unsupported_version() -> Error {
        Error::new_user(User::UnsupportedVersion)
    }

    #[cold]
    pub(super) fn new_user_dispatch_gone() -> Error {
        Error::new_user(User::DispatchGone).with(if std::thread::panicking() {
            "request task panicked"
        } else {
            "runtime dropped the request task"
        })
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Connect => "error trying to connect",
            Kind::Aborted => "connection aborted",
            Kind::Timeout => "operation timed out",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::Status) => "invalid HTTP status-code parsed",
            Kind::Parse(Parse::Header(Header::Token)) => "invalid HTTP header parsed",
            Kind::Parse(Parse::Header(Header::ContentLengthInvalid)) => {
                "invalid content-length parsed"
            }
            Kind::Parse(Parse::Header(Header::TransferEncodingUnexpected)) => {
                "unexpected transfer-encoding parsed"
            }
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::Parse(Parse::Chunked) => "invalid chunked body parsed",
            Kind::Canceled => "operation was canceled",
            Kind::User(User::Body) => "error from user's Body stream",
            Kind::User(User::Uri) => "request URI has no host",
            Kind::User(User::Host) => "request host is not a valid Host header value",
            Kind::User(User::UnsupportedVersion) => "request has unsupported HTTP version",
            Kind::User(User::DispatchGone) => "request task is gone",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("tether::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[doc(hidden)]
impl From<Parse> for Error {
    fn from(err: Parse) -> Error {
        Error::new(Kind::Parse(err))
    }
}

impl Parse {
    pub(crate) fn content_length_invalid() -> Self {
        Parse::Header(Header::ContentLengthInvalid)
    }

    pub(crate) fn transfer_encoding_unexpected() -> Self {
        Parse::Header(Header::TransferEncodingUnexpected)
    }
}

impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Parse {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header(Header::Token),
            httparse::Error::Status => Parse::Status,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        }
    }
}

impl From<http::status::InvalidStatusCode> for Parse {
    fn from(_: http::status::InvalidStatusCode) -> Parse {
        Parse::Status
    }
}

// ===== impl Stage =====

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connect => "connect",
            Stage::Send => "send",
            Stage::Headers => "response headers",
            Stage::BodyRead => "body read",
        })
    }
}

// ===== impl TimedOut ====

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} timed out", self.stage)
    }
}

impl StdError for TimedOut {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    use crate::connect::ConnectErrorKind;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn error_satisfies_send_sync() {
        assert_send_sync::<Error>()
    }

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn timeout_carries_stage() {
        let err = Error::new_timeout(Stage::Headers);
        assert!(err.is_timeout());
        assert_eq!(err.timeout_stage(), Some(Stage::Headers));
        assert!(!err.is_aborted());
        assert_eq!(err.source().unwrap().to_string(), "response headers timed out");
    }

    #[test]
    fn invalid_host_is_not_reported_as_missing_host() {
        let cause = http::HeaderValue::from_str("bad\nhost").unwrap_err();
        let err = Error::new_user_host(cause);
        assert!(err.is_user());
        assert_eq!(
            err.to_string(),
            "request host is not a valid Host header value"
        );
        assert_ne!(err.to_string(), Error::new_user_uri("x").to_string());
    }

    #[test]
    fn connect_error_is_reachable_through_source() {
        let err = Error::new_connect(ConnectError::new(ConnectErrorKind::Refused));
        assert!(err.is_connect());
        assert_eq!(
            err.connect_error().map(ConnectError::kind),
            Some(ConnectErrorKind::Refused)
        );
        assert!(err.timeout_stage().is_none());
    }

    #[test]
    fn incomplete_message_is_an_abort() {
        let err = Error::new_incomplete();
        assert!(err.is_aborted());
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "connection aborted");
    }

    #[test]
    fn httparse_errors_map_to_parse_kinds() {
        let err = Error::from(Parse::from(httparse::Error::Status));
        assert!(err.is_parse());
        assert!(err.is_parse_status());

        let err = Error::from(Parse::from(httparse::Error::TooManyHeaders));
        assert!(err.is_parse());
        assert!(!err.is_parse_status());
    }
}
