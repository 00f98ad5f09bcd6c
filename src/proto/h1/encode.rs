use http::Version;

use crate::proto::{BodyLength, RequestHead};

/// 将请求头编码到 `dst`：请求行、全部头部、以及结束头部的空行。
///
/// 请求目标总是 origin-form（`path?query`），缺省为 `/`。
pub(crate) fn encode_request_head(head: &RequestHead, dst: &mut Vec<u8>) {
    let method = head.subject.0.as_str();
    let target = head
        .subject
        .1
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    // 估算一下容量，避免逐个头部扩容
    let init_cap = method.len() + target.len() + 12 + head.headers.len() * 32;
    dst.reserve(init_cap);

    extend(dst, method.as_bytes());
    extend(dst, b" ");
    extend(dst, target.as_bytes());
    match head.version {
        Version::HTTP_10 => extend(dst, b" HTTP/1.0\r\n"),
        _ => extend(dst, b" HTTP/1.1\r\n"),
    }

    for (name, value) in head.headers.iter() {
        extend(dst, name.as_str().as_bytes());
        extend(dst, b": ");
        extend(dst, value.as_bytes());
        extend(dst, b"\r\n");
    }
    extend(dst, b"\r\n");
}

#[inline]
fn extend(dst: &mut Vec<u8>, data: &[u8]) {
    dst.extend_from_slice(data);
}

/// 请求 body 的编码器。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Encoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    /// 剩余需要写出的字节数
    Length(u64),
    Chunked,
}

impl Encoder {
    pub(crate) fn new(len: BodyLength) -> Encoder {
        match len {
            BodyLength::Known(len) => Encoder::length(len),
            BodyLength::Unknown => Encoder::chunked(),
        }
    }

    pub(crate) fn length(len: u64) -> Encoder {
        Encoder {
            kind: Kind::Length(len),
        }
    }

    pub(crate) fn chunked() -> Encoder {
        Encoder {
            kind: Kind::Chunked,
        }
    }

    /// 编码一块 body 数据。
    ///
    /// 定长编码下，写出的总量超过声明的 `Content-Length` 是调用者的错误。
    pub(crate) fn encode(&mut self, data: &[u8], dst: &mut Vec<u8>) -> crate::Result<()> {
        match self.kind {
            Kind::Length(ref mut remaining) => {
                let len = data.len() as u64;
                if len > *remaining {
                    return Err(crate::Error::new_user_body(
                        "body is longer than its declared content-length",
                    ));
                }
                *remaining -= len;
                extend(dst, data);
            }
            Kind::Chunked => {
                // 空块会被对端当作结束标记
                if data.is_empty() {
                    return Ok(());
                }
                write_chunk_size(dst, data.len());
                extend(dst, data);
                extend(dst, b"\r\n");
            }
        }
        Ok(())
    }

    /// body 结束：chunked 写出结束块，定长编码检查是否已写满。
    pub(crate) fn end(&self, dst: &mut Vec<u8>) -> crate::Result<()> {
        match self.kind {
            Kind::Length(0) => Ok(()),
            Kind::Length(remaining) => {
                trace!("body ended {} bytes short of content-length", remaining);
                Err(crate::Error::new_user_body(
                    "body is shorter than its declared content-length",
                ))
            }
            Kind::Chunked => {
                extend(dst, b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

fn write_chunk_size(dst: &mut Vec<u8>, mut size: usize) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut buf = [0u8; 16];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = HEX[size & 0xF];
        size >>= 4;
        if size == 0 {
            break;
        }
    }
    extend(dst, &buf[pos..]);
    extend(dst, b"\r\n");
}
