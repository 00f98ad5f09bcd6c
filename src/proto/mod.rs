//! HTTP/1 消息协议相关的核心组件模块。
//!
//! 定义请求与响应头部的通用结构。具体的编解码在 [`h1`] 子模块中：
//! 请求头编码、响应头解析（基于 `httparse`）以及按长度、chunked 或连接关闭
//! 界定的 body 解码。

pub(crate) mod h1;

/// HTTP 消息头部。
///
/// 泛型参数 `S` 是消息的"主题"：请求为 [`RequestLine`]，响应为 `StatusCode`。
#[derive(Debug, Default)]
pub(crate) struct MessageHead<S> {
    pub(crate) version: http::Version,
    pub(crate) subject: S,
    pub(crate) headers: http::HeaderMap,
}

/// 发出的请求头部。
pub(crate) type RequestHead = MessageHead<RequestLine>;

/// 请求行：方法与 origin-form 形式的请求目标。
#[derive(Debug, Default, PartialEq)]
pub(crate) struct RequestLine(pub(crate) http::Method, pub(crate) http::Uri);

/// 收到的响应头部。
pub(crate) type ResponseHead = MessageHead<http::StatusCode>;

/// 请求 body 的编码方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyLength {
    /// 通过 Content-Length 头部指定的确切字节长度
    Known(u64),
    /// 使用 Transfer-Encoding: chunked，长度未预先确定
    Unknown,
}

impl MessageHead<http::StatusCode> {
    /// 将响应头部与 body 组合为 `http::Response`。
    pub(crate) fn into_response<B>(self, body: B) -> http::Response<B> {
        let mut res = http::Response::new(body);
        *res.status_mut() = self.subject;
        *res.headers_mut() = self.headers;
        *res.version_mut() = self.version;
        res
    }
}
