//! 单条 HTTP/1 连接。
//!
//! `Connection` 独占一个传输层字节流，一次只服务一个请求：写出请求、读出响应头，
//! 然后由响应 body（[`Incoming`](crate::body::Incoming)）继续通过它读取剩余的字节。
//!
//! 两个独立的状态：
//!
//! - `State`：连接的生命周期，由连接池推进（Idle → InUse → Idle 或 Closing → Closed）；
//! - `KA`：当前这条消息结束后连接能否复用。只有响应完整读完且双方都同意保持连接，
//!   才会变为 `KA::Idle`；任何错误、超时或 `Connection: close` 都会让它变为
//!   `KA::Disabled`，此后连接只能被丢弃。

use std::fmt;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_core::ready;
use http::{Method, StatusCode};
use http_body::Body;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::body::Outgoing;
use crate::common::task;
use crate::common::time::Time;
use crate::connect::{Endpoint, Io};
use crate::error::Stage;
use crate::proto::h1::{self, Decoded, Decoder, Encoder, ParseContext, ParsedMessage};
use crate::proto::{BodyLength, RequestHead};

/// 单次读取与写出合并的缓冲区大小。
const INIT_BUFFER_SIZE: usize = 8192;

pub(crate) struct Connection {
    io: Box<dyn Io>,
    read_buf: BytesMut,
    endpoint: Endpoint,
    state: State,
    keep_alive: KA,
    aborted: bool,
}

/// 连接的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    /// 在连接池中等待复用
    Idle,
    /// 被某个请求借出
    InUse,
    /// 正在关闭传输层
    Closing,
    /// 已关闭
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum KA {
    Idle,
    #[default]
    Busy,
    Disabled,
}

impl Connection {
    /// 包装一条刚建立的连接，它立即处于借出状态。
    pub(crate) fn new(io: Box<dyn Io>, endpoint: Endpoint) -> Connection {
        Connection {
            io,
            read_buf: BytesMut::with_capacity(INIT_BUFFER_SIZE),
            endpoint,
            state: State::InUse,
            keep_alive: KA::Busy,
            aborted: false,
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// 连接是否在传输途中被中止（对端关闭或 I/O 错误）。
    pub(crate) fn was_aborted(&self) -> bool {
        self.aborted
    }

    /// 当前借出的连接能否归还给连接池。
    ///
    /// 读缓冲区里还有数据说明对端多发了字节，这样的连接也不能复用。
    pub(crate) fn is_reusable(&self) -> bool {
        self.state == State::InUse
            && self.keep_alive == KA::Idle
            && !self.aborted
            && self.read_buf.is_empty()
    }

    /// InUse → Idle：进入连接池。
    pub(crate) fn idle(&mut self) {
        debug_assert!(self.is_reusable());
        self.state = State::Idle;
    }

    /// Idle → InUse：从连接池借出，开始新的一条消息。
    pub(crate) fn reuse(&mut self) {
        debug_assert_eq!(self.state, State::Idle);
        self.state = State::InUse;
        self.keep_alive = KA::Busy;
    }

    /// 当前消息之后不再复用这条连接。
    pub(crate) fn disable_keep_alive(&mut self) {
        self.keep_alive = KA::Disabled;
    }

    /// 响应完整读完。`keep_alive` 表示响应是否允许复用连接。
    pub(crate) fn on_message_complete(&mut self, keep_alive: bool) {
        if keep_alive && self.keep_alive == KA::Busy {
            self.keep_alive = KA::Idle;
        } else {
            self.keep_alive = KA::Disabled;
        }
        trace!("message complete, keep_alive={:?}", self.keep_alive);
    }

    /// 写出一个请求：请求头，然后是按 `body_len` 编码的 body。
    ///
    /// 发送阶段的截止时间按块计算：取得下一块 body 并把它写出必须在 `timeout`
    /// 内完成，整个上传的总时长不受限制。
    pub(crate) async fn send(
        &mut self,
        head: &RequestHead,
        body_len: BodyLength,
        mut body: Outgoing,
        time: &Time,
        timeout: Option<Duration>,
    ) -> crate::Result<()> {
        let mut encoder = Encoder::new(body_len);
        let mut buf = Vec::with_capacity(INIT_BUFFER_SIZE);
        h1::encode_request_head(head, &mut buf);
        trace!("encoded request head, {} bytes", buf.len());

        // 第一块 body 与请求头合并写出，之后每块数据到达就立即写出
        loop {
            let step = self.write_frame(&mut body, &mut encoder, &mut buf);
            match time.deadline(timeout, Stage::Send, step).await {
                Ok(Ok(true)) => (),
                Ok(Ok(false)) => break,
                Ok(Err(err)) => return Err(err),
                Err(timeout) => {
                    self.disable_keep_alive();
                    return Err(timeout);
                }
            }
        }

        let finish = self.finish_body(&encoder, &mut buf);
        match time.deadline(timeout, Stage::Send, finish).await {
            Ok(res) => res,
            Err(timeout) => {
                self.disable_keep_alive();
                Err(timeout)
            }
        }
    }

    /// 取得下一块 body 数据，编码后写出。body 已经结束时返回 `false`。
    async fn write_frame(
        &mut self,
        body: &mut Outgoing,
        encoder: &mut Encoder,
        buf: &mut Vec<u8>,
    ) -> crate::Result<bool> {
        if body.is_end_stream() {
            return Ok(false);
        }
        let frame = match poll_fn(|cx| Pin::new(&mut *body).poll_frame(cx)).await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                debug!("user body error: {}", err);
                self.disable_keep_alive();
                return Err(crate::Error::new_user_body(err));
            }
            None => return Ok(false),
        };
        if let Ok(data) = frame.into_data() {
            if let Err(err) = encoder.encode(&data, buf) {
                self.disable_keep_alive();
                return Err(err);
            }
        }
        if !buf.is_empty() {
            self.write_all(buf).await?;
            buf.clear();
        }
        Ok(true)
    }

    async fn finish_body(&mut self, encoder: &Encoder, buf: &mut Vec<u8>) -> crate::Result<()> {
        if let Err(err) = encoder.end(buf) {
            self.disable_keep_alive();
            return Err(err);
        }
        self.write_all(buf).await?;
        if let Err(err) = self.io.flush().await {
            return Err(self.abort(err));
        }
        Ok(())
    }

    async fn write_all(&mut self, buf: &[u8]) -> crate::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        match self.io.write_all(buf).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.abort(err)),
        }
    }

    /// 读取响应头，跳过除 101 以外的 1xx 临时响应。
    pub(crate) async fn receive_head(
        &mut self,
        method: &Method,
        max_headers: usize,
    ) -> crate::Result<ParsedMessage> {
        loop {
            let ctx = ParseContext {
                req_method: method,
                max_headers,
            };
            match h1::parse_response_head(&mut self.read_buf, ctx) {
                Ok(Some(msg)) => {
                    let status = msg.head.subject;
                    if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                        trace!("ignoring informational response: {}", status.as_u16());
                        continue;
                    }
                    debug!("incoming response: {} {:?}", status.as_u16(), msg.head.version);
                    return Ok(msg);
                }
                Ok(None) => (),
                Err(err) => {
                    debug!("parse error ({:?}) with {} bytes", err, self.read_buf.len());
                    self.disable_keep_alive();
                    return Err(err.into());
                }
            }

            let read = poll_fn(|cx| self.poll_read_more(cx)).await;
            match read {
                Ok(0) => {
                    trace!("connection closed before response head");
                    self.aborted = true;
                    self.disable_keep_alive();
                    return Err(crate::Error::new_incomplete());
                }
                Ok(_) => (),
                Err(err) => return Err(self.abort(err)),
            }
        }
    }

    /// 读取下一块 body 数据；`Ok(None)` 表示 body 已经完整。
    pub(crate) fn poll_read_body(
        &mut self,
        cx: &mut Context<'_>,
        decoder: &mut Decoder,
    ) -> Poll<crate::Result<Option<Bytes>>> {
        loop {
            match decoder.decode(&mut self.read_buf) {
                Ok(Decoded::Data(data)) => return Poll::Ready(Ok(Some(data))),
                Ok(Decoded::End) => return Poll::Ready(Ok(None)),
                Ok(Decoded::NeedMore) => (),
                Err(err) => {
                    debug!("body decode error: {:?}", err);
                    self.disable_keep_alive();
                    return Poll::Ready(Err(err.into()));
                }
            }

            match ready!(self.poll_read_more(cx)) {
                Ok(0) => {
                    return Poll::Ready(match decoder.decode_eof() {
                        Ok(_) => Ok(None),
                        Err(err) => {
                            self.aborted = true;
                            self.disable_keep_alive();
                            Err(err)
                        }
                    });
                }
                Ok(_) => (),
                Err(err) => return Poll::Ready(Err(self.abort(err))),
            }
        }
    }

    /// 读缓冲区里已经有完整的 `len` 字节 body 时，直接把它们取出。
    pub(crate) fn take_buffered(&mut self, len: u64) -> Option<Bytes> {
        let len = usize::try_from(len).ok()?;
        if self.read_buf.len() < len {
            return None;
        }
        Some(self.read_buf.split_to(len).freeze())
    }

    /// 从传输层读取一次，追加到读缓冲区。返回读到的字节数，0 表示 EOF。
    fn poll_read_more(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let mut chunk = [0u8; INIT_BUFFER_SIZE];
        let mut buf = ReadBuf::new(&mut chunk);
        ready!(Pin::new(&mut self.io).poll_read(cx, &mut buf))?;
        let n = buf.filled().len();
        self.read_buf.extend_from_slice(buf.filled());
        Poll::Ready(Ok(n))
    }

    /// 对空闲连接做一次非阻塞的读探测，判断对端是否已经关闭了它。
    ///
    /// 空闲连接上读到任何数据（包括 EOF 与错误）都说明它不能再用。
    pub(crate) fn is_closed_by_peer(&mut self) -> bool {
        match task::poll_once(|cx| self.poll_read_more(cx)) {
            None => false,
            Some(Ok(0)) => {
                trace!("idle connection to {} closed by peer", self.endpoint);
                true
            }
            Some(Ok(n)) => {
                debug!("unexpected {} bytes on idle connection", n);
                true
            }
            Some(Err(_err)) => {
                trace!("idle connection error: {}", _err);
                true
            }
        }
    }

    /// 关闭连接：尽力发出一次传输层 shutdown，随后连接被丢弃。
    pub(crate) fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closing;
        let io = &mut self.io;
        if let Some(Err(_err)) = task::poll_once(|cx| Pin::new(&mut *io).poll_shutdown(cx)) {
            trace!("shutdown error on connection to {}: {}", self.endpoint, _err);
        }
        self.state = State::Closed;
        trace!("closed connection to {}", self.endpoint);
    }

    fn abort(&mut self, err: io::Error) -> crate::Error {
        debug!("connection to {} aborted: {}", self.endpoint, err);
        self.aborted = true;
        self.disable_keep_alive();
        crate::Error::new_aborted(err)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("keep_alive", &self.keep_alive)
            .field("aborted", &self.aborted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::DecodedLength;
    use crate::proto::RequestLine;
    use http::uri::Scheme;
    use http::HeaderValue;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn connection() -> (Connection, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let endpoint = Endpoint::new(Scheme::HTTP, "example.com", 80);
        (Connection::new(Box::new(client), endpoint), server)
    }

    fn head(method: Method, target: &str) -> RequestHead {
        let mut head = RequestHead::default();
        head.subject = RequestLine(method, target.parse().unwrap());
        head.headers
            .insert("host", HeaderValue::from_static("example.com"));
        head
    }

    async fn read_all_available(server: &mut DuplexStream, len: usize) -> String {
        let mut buf = vec![0; len];
        server.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn send_fixed_length_body() {
        let (mut conn, mut server) = connection();
        let mut head = head(Method::POST, "/echo");
        head.headers
            .insert("content-length", HeaderValue::from_static("5"));

        conn.send(&head, BodyLength::Known(5), Outgoing::from("hello"), &Time::Empty, None)
            .await
            .unwrap();

        let expected = "POST /echo HTTP/1.1\r\nhost: example.com\r\ncontent-length: 5\r\n\r\nhello";
        assert_eq!(read_all_available(&mut server, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn send_chunked_stream() {
        let (mut conn, mut server) = connection();
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("ab"), Ok("cde")];
        let body = Outgoing::wrap_stream(futures_util::stream::iter(chunks));

        conn.send(&head(Method::PUT, "/"), BodyLength::Unknown, body, &Time::Empty, None)
            .await
            .unwrap();

        let expected = "PUT / HTTP/1.1\r\nhost: example.com\r\n\r\n2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n";
        assert_eq!(read_all_available(&mut server, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn short_body_is_user_error() {
        let (mut conn, _server) = connection();
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("ab")];
        let body = Outgoing::sized_stream(10, futures_util::stream::iter(chunks));

        let err = conn
            .send(&head(Method::POST, "/"), BodyLength::Known(10), body, &Time::Empty, None)
            .await
            .unwrap_err();
        assert!(err.is_user());
        conn.on_message_complete(true);
        assert!(!conn.is_reusable());
    }

    #[cfg(feature = "tcp")]
    fn tokio_time() -> Time {
        Time::Timer(std::sync::Arc::new(crate::rt::TokioTimer::new()))
    }

    #[cfg(feature = "tcp")]
    #[tokio::test(start_paused = true)]
    async fn send_deadline_restarts_for_each_chunk() {
        let (mut conn, mut server) = connection();
        // 每 100ms 一个字节，总共 500ms，远超单块 200ms 的截止时间
        let slow = futures_util::stream::unfold(0u8, |n| async move {
            if n == 5 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            Some((Ok::<_, std::io::Error>("x"), n + 1))
        });
        let mut head = head(Method::POST, "/upload");
        head.headers
            .insert("content-length", HeaderValue::from_static("5"));

        conn.send(
            &head,
            BodyLength::Known(5),
            Outgoing::sized_stream(5, slow),
            &tokio_time(),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap();

        let expected =
            "POST /upload HTTP/1.1\r\nhost: example.com\r\ncontent-length: 5\r\n\r\nxxxxx";
        assert_eq!(read_all_available(&mut server, expected.len()).await, expected);
    }

    #[cfg(feature = "tcp")]
    #[tokio::test(start_paused = true)]
    async fn stalled_chunk_hits_send_deadline() {
        use futures_util::StreamExt;

        let (mut conn, _server) = connection();
        let stalled = futures_util::stream::iter(vec![Ok::<_, std::io::Error>("ab")])
            .chain(futures_util::stream::pending());

        let err = conn
            .send(
                &head(Method::PUT, "/"),
                BodyLength::Unknown,
                Outgoing::wrap_stream(stalled),
                &tokio_time(),
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.timeout_stage(), Some(Stage::Send));

        conn.on_message_complete(true);
        assert!(!conn.is_reusable());
    }

    #[tokio::test]
    async fn receive_head_skips_continue() {
        let (mut conn, mut server) = connection();
        server
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();

        let msg = conn.receive_head(&Method::GET, 100).await.unwrap();
        assert_eq!(msg.head.subject, StatusCode::OK);
        assert_eq!(msg.decode, DecodedLength::Known(2));

        let mut decoder = Decoder::new(msg.decode);
        let data = poll_fn(|cx| conn.poll_read_body(cx, &mut decoder)).await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"ok"[..]));
        let end = poll_fn(|cx| conn.poll_read_body(cx, &mut decoder)).await.unwrap();
        assert!(end.is_none());

        conn.on_message_complete(msg.keep_alive);
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn eof_before_head_is_aborted() {
        let (mut conn, server) = connection();
        drop(server);

        let err = conn.receive_head(&Method::GET, 100).await.unwrap_err();
        assert!(err.is_aborted());
        assert!(conn.was_aborted());
    }

    #[tokio::test]
    async fn eof_mid_body_is_aborted() {
        let (mut conn, mut server) = connection();
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();

        let msg = conn.receive_head(&Method::GET, 100).await.unwrap();
        let mut decoder = Decoder::new(msg.decode);
        let data = poll_fn(|cx| conn.poll_read_body(cx, &mut decoder)).await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"abc"[..]));

        drop(server);
        let err = poll_fn(|cx| conn.poll_read_body(cx, &mut decoder))
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn idle_check_detects_peer_close() {
        let (mut conn, server) = connection();
        assert!(!conn.is_closed_by_peer());
        drop(server);
        assert!(conn.is_closed_by_peer());

        conn.close();
        assert_eq!(conn.state(), State::Closed);
    }
}
