use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::ready;
use http_body::{Body, Frame, SizeHint};

use super::DecodedLength;
use crate::client::pool::Pooled;
use crate::common::time::Time;
use crate::error::Stage;
use crate::proto::h1::Decoder;
use crate::rt::Sleep;

/// 响应 body。
///
/// 响应头到达时请求的 future 就已经完成，body 的字节仍留在连接上，
/// 在调用者读取时才从连接中取出。每一次读取各自受 body 读取超时约束：
/// 一块数据迟迟不到，这次读取以超时失败，连接随之被丢弃。
///
/// body 读完后连接立即回到连接池（如果可以复用）。中途丢弃 body 则会关闭连接。
///
/// 通常配合 [`http_body_util::BodyExt`] 使用。
///
/// [`http_body_util::BodyExt`]: https://docs.rs/http-body-util/latest/http_body_util/trait.BodyExt.html
#[must_use = "streams do nothing unless polled"]
pub struct Incoming {
    kind: Kind,
}

enum Kind {
    Empty,
    /// 随响应头一起到达的完整 body，连接已经归还
    Buffered(Option<Bytes>),
    Conn(Box<Streaming>),
}

struct Streaming {
    conn: Pooled,
    decoder: Decoder,
    content_length: DecodedLength,
    keep_alive: bool,
    time: Time,
    read_timeout: Option<Duration>,
    sleep: Option<Pin<Box<dyn Sleep>>>,
    /// 当前这次读取是否已经开始计时
    armed: bool,
}

impl Incoming {
    pub(crate) fn empty() -> Incoming {
        Incoming { kind: Kind::Empty }
    }

    /// 以借出的连接作为 body 的数据来源。
    ///
    /// 没有 body 的响应，以及 body 已经随响应头完整读入缓冲区的响应，直接结束
    /// 消息，连接当场归还。
    pub(crate) fn new(
        mut conn: Pooled,
        len: DecodedLength,
        keep_alive: bool,
        time: Time,
        read_timeout: Option<Duration>,
    ) -> Incoming {
        if len == DecodedLength::ZERO {
            conn.on_message_complete(keep_alive);
            return Incoming::empty();
        }
        if let Some(buffered) = len.exact().and_then(|n| conn.take_buffered(n)) {
            trace!("whole body buffered with the head, {} bytes", buffered.len());
            conn.on_message_complete(keep_alive);
            return Incoming {
                kind: Kind::Buffered(Some(buffered)),
            };
        }

        let read_timeout = time.check(read_timeout, Stage::BodyRead);
        Incoming {
            kind: Kind::Conn(Box::new(Streaming {
                conn,
                decoder: Decoder::new(len),
                content_length: len,
                keep_alive,
                time,
                read_timeout,
                sleep: None,
                armed: false,
            })),
        }
    }
}

impl Streaming {
    fn poll_read(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<Option<Bytes>>> {
        // 每次读取单独计时：上一块数据交付后才开始下一次的截止时间
        if let Some(dur) = self.read_timeout {
            if !self.armed {
                match self.sleep {
                    Some(ref mut sleep) => self.time.rearm(sleep, dur),
                    None => self.sleep = self.time.sleep(dur),
                }
                self.armed = true;
            }
        }

        match self.conn.poll_read_body(cx, &mut self.decoder) {
            Poll::Ready(res) => {
                self.armed = false;
                Poll::Ready(res)
            }
            Poll::Pending => {
                if let Some(ref mut sleep) = self.sleep {
                    if self.armed && sleep.as_mut().poll(cx).is_ready() {
                        debug!("body read timed out");
                        self.conn.disable_keep_alive();
                        return Poll::Ready(Err(crate::Error::new_timeout(Stage::BodyRead)));
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl Body for Incoming {
    type Data = Bytes;
    type Error = crate::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let (res, done) = match self.kind {
            Kind::Empty => return Poll::Ready(None),
            Kind::Buffered(ref mut data) => (Ok(data.take()), true),
            Kind::Conn(ref mut streaming) => {
                let res = ready!(streaming.poll_read(cx));
                let done = match res {
                    Ok(Some(ref data)) => {
                        streaming.content_length.consume(data.len() as u64);
                        streaming.decoder.is_eof()
                    }
                    Ok(None) => true,
                    Err(_) => true,
                };
                if done && res.is_ok() {
                    streaming.conn.on_message_complete(streaming.keep_alive);
                }
                (res, done)
            }
        };

        // 消息结束（或出错）后立即交还连接，不必等 body 本身被丢弃
        if done {
            self.kind = Kind::Empty;
        }

        match res {
            Ok(Some(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Ok(None) => Poll::Ready(None),
            Err(err) => Poll::Ready(Some(Err(err))),
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, Kind::Empty)
    }

    fn size_hint(&self) -> SizeHint {
        match self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Buffered(ref data) => {
                SizeHint::with_exact(data.as_ref().map_or(0, |data| data.len() as u64))
            }
            Kind::Conn(ref streaming) => match streaming.content_length.exact() {
                Some(len) => SizeHint::with_exact(len),
                None => SizeHint::default(),
            },
        }
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct Streaming;
        #[derive(Debug)]
        struct Empty;

        let mut builder = f.debug_tuple("Body");
        match self.kind {
            Kind::Empty => builder.field(&Empty),
            Kind::Buffered(ref data) => builder.field(data),
            Kind::Conn(..) => builder.field(&Streaming),
        };
        builder.finish()
    }
}
