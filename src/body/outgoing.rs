use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::{ready, Stream};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

type BoxError = Box<dyn StdError + Send + Sync>;
type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// 请求 body。
///
/// 三种形态：
///
/// - 空 body；
/// - 完整的一段字节，以 `Content-Length` 发送；
/// - 字节流，以 `Transfer-Encoding: chunked` 发送；若通过
///   [`Outgoing::sized_stream`] 声明了长度，则以 `Content-Length` 发送，
///   实际写出的字节数必须与声明一致。
///
/// 提交之后 body 只会被读取一次。
#[must_use = "bodies do nothing unless sent"]
pub struct Outgoing {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Stream { stream: BoxStream, len: Option<u64> },
}

impl Outgoing {
    /// 空 body。
    pub fn empty() -> Outgoing {
        Outgoing { kind: Kind::Empty }
    }

    /// 由一段完整的字节组成的 body。
    pub fn full<B: Into<Bytes>>(bytes: B) -> Outgoing {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Outgoing::empty();
        }
        Outgoing {
            kind: Kind::Full(Some(bytes)),
        }
    }

    /// 长度未知的流式 body，以 chunked 编码发送。
    pub fn wrap_stream<S, O, E>(stream: S) -> Outgoing
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        Outgoing {
            kind: Kind::Stream {
                stream: Box::pin(MapStream { inner: stream }),
                len: None,
            },
        }
    }

    /// 长度已知的流式 body，以 `Content-Length: len` 发送。
    pub fn sized_stream<S, O, E>(len: u64, stream: S) -> Outgoing
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        Outgoing {
            kind: Kind::Stream {
                stream: Box::pin(MapStream { inner: stream }),
                len: Some(len),
            },
        }
    }

    /// body 的确切长度；长度未知的流返回 `None`。
    pub(crate) fn exact_len(&self) -> Option<u64> {
        match self.kind {
            Kind::Empty => Some(0),
            Kind::Full(ref bytes) => Some(bytes.as_ref().map_or(0, |b| b.len() as u64)),
            Kind::Stream { len, .. } => len,
        }
    }
}

impl Body for Outgoing {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(ref mut bytes) => Poll::Ready(bytes.take().map(|b| Ok(Frame::data(b)))),
            Kind::Stream { ref mut stream, .. } => {
                let item = ready!(stream.as_mut().poll_next(cx));
                Poll::Ready(item.map(|res| res.map(Frame::data)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.kind {
            Kind::Empty => true,
            Kind::Full(ref bytes) => bytes.is_none(),
            Kind::Stream { len, .. } => len == Some(0),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.exact_len() {
            Some(len) => SizeHint::with_exact(len),
            None => SizeHint::default(),
        }
    }
}

impl Default for Outgoing {
    fn default() -> Outgoing {
        Outgoing::empty()
    }
}

impl From<Bytes> for Outgoing {
    fn from(bytes: Bytes) -> Outgoing {
        Outgoing::full(bytes)
    }
}

impl From<Vec<u8>> for Outgoing {
    fn from(vec: Vec<u8>) -> Outgoing {
        Outgoing::full(vec)
    }
}

impl From<String> for Outgoing {
    fn from(s: String) -> Outgoing {
        Outgoing::full(s)
    }
}

impl From<&'static str> for Outgoing {
    fn from(s: &'static str) -> Outgoing {
        Outgoing::full(s)
    }
}

impl From<&'static [u8]> for Outgoing {
    fn from(s: &'static [u8]) -> Outgoing {
        Outgoing::full(s)
    }
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Outgoing");
        match self.kind {
            Kind::Empty => builder.field("kind", &"empty"),
            Kind::Full(ref bytes) => builder.field("full", bytes),
            Kind::Stream { len, .. } => builder.field("stream_len", &len),
        };
        builder.finish()
    }
}

pin_project! {
    struct MapStream<S> {
        #[pin]
        inner: S,
    }
}

impl<S, O, E> Stream for MapStream<S>
where
    S: Stream<Item = Result<O, E>>,
    O: Into<Bytes>,
    E: Into<BoxError>,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.project().inner.poll_next(cx));
        Poll::Ready(item.map(|res| res.map(Into::into).map_err(Into::into)))
    }
}
