use std::fmt;

use bytes::{Buf, Bytes, BytesMut};

use crate::body::DecodedLength;
use crate::error::Parse;

/// chunk-size 行（含扩展）与单条 trailer 的长度上限。
const MAX_LINE_LEN: usize = 16 * 1024;

/// 响应 body 的增量解码器。
///
/// 解码器本身不做 I/O：调用者把从连接读到的字节追加到缓冲区，然后反复调用
/// [`Decoder::decode`]，直到它返回 [`Decoded::End`]。
#[derive(Clone, PartialEq)]
pub(crate) struct Decoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    /// 按 Content-Length 读取，记录剩余字节数
    Length(u64),
    /// 按 Transfer-Encoding: chunked 读取
    Chunked(ChunkedState),
    /// 读到连接关闭为止；`true` 表示已经遇到 EOF
    Eof(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkedState {
    Size,
    Body(u64),
    BodyCrLf,
    Trailer,
    End,
}

/// 一次解码的结果。
#[derive(Debug, PartialEq)]
pub(crate) enum Decoded {
    /// 一块 body 数据
    Data(Bytes),
    /// 缓冲区里的数据不够，需要从连接继续读取
    NeedMore,
    /// body 已经完整
    End,
}

impl Decoder {
    pub(crate) fn new(len: DecodedLength) -> Decoder {
        match len {
            DecodedLength::Known(n) => Decoder::length(n),
            DecodedLength::Chunked => Decoder::chunked(),
            DecodedLength::CloseDelimited => Decoder::eof(),
        }
    }

    pub(crate) fn length(len: u64) -> Decoder {
        Decoder {
            kind: Kind::Length(len),
        }
    }

    pub(crate) fn chunked() -> Decoder {
        Decoder {
            kind: Kind::Chunked(ChunkedState::Size),
        }
    }

    pub(crate) fn eof() -> Decoder {
        Decoder {
            kind: Kind::Eof(false),
        }
    }

    pub(crate) fn is_eof(&self) -> bool {
        matches!(
            self.kind,
            Kind::Length(0) | Kind::Chunked(ChunkedState::End) | Kind::Eof(true)
        )
    }

    /// 从 `buf` 中解码出下一块数据。
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, Parse> {
        match self.kind {
            Kind::Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Ok(Decoded::End);
                }
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = std::cmp::min(*remaining, buf.len() as u64) as usize;
                *remaining -= n as u64;
                Ok(Decoded::Data(buf.split_to(n).freeze()))
            }
            Kind::Chunked(ref mut state) => decode_chunked(state, buf),
            Kind::Eof(true) => Ok(Decoded::End),
            Kind::Eof(false) => {
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                Ok(Decoded::Data(buf.split().freeze()))
            }
        }
    }

    /// 连接在需要更多数据时报告了 EOF。
    ///
    /// 只有以连接关闭界定的 body 会因此正常结束，其余情况说明消息不完整。
    pub(crate) fn decode_eof(&mut self) -> crate::Result<Decoded> {
        match self.kind {
            Kind::Eof(ref mut finished) => {
                *finished = true;
                Ok(Decoded::End)
            }
            _ if self.is_eof() => Ok(Decoded::End),
            _ => {
                debug!("incomplete body: {:?}", self.kind);
                Err(crate::Error::new_incomplete())
            }
        }
    }
}

fn decode_chunked(state: &mut ChunkedState, buf: &mut BytesMut) -> Result<Decoded, Parse> {
    loop {
        match *state {
            ChunkedState::Size => {
                let line = match take_line(buf)? {
                    Some(line) => line,
                    None => return Ok(Decoded::NeedMore),
                };
                let size = parse_chunk_size(&line)?;
                trace!("chunk size={}", size);
                *state = if size == 0 {
                    ChunkedState::Trailer
                } else {
                    ChunkedState::Body(size)
                };
            }
            ChunkedState::Body(remaining) => {
                if buf.is_empty() {
                    return Ok(Decoded::NeedMore);
                }
                let n = std::cmp::min(remaining, buf.len() as u64) as usize;
                let left = remaining - n as u64;
                *state = if left == 0 {
                    ChunkedState::BodyCrLf
                } else {
                    ChunkedState::Body(left)
                };
                return Ok(Decoded::Data(buf.split_to(n).freeze()));
            }
            ChunkedState::BodyCrLf => {
                if buf.len() < 2 {
                    return Ok(Decoded::NeedMore);
                }
                if &buf[..2] != b"\r\n" {
                    debug!("chunk data not followed by CRLF");
                    return Err(Parse::Chunked);
                }
                buf.advance(2);
                *state = ChunkedState::Size;
            }
            ChunkedState::Trailer => {
                let line = match take_line(buf)? {
                    Some(line) => line,
                    None => return Ok(Decoded::NeedMore),
                };
                // trailer 字段被丢弃，空行表示整个消息结束
                if line.is_empty() {
                    *state = ChunkedState::End;
                }
            }
            ChunkedState::End => return Ok(Decoded::End),
        }
    }
}

/// 取出一行（不含 CRLF）。没有完整的行时返回 `None`，不消耗数据。
fn take_line(buf: &mut BytesMut) -> Result<Option<BytesMut>, Parse> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = buf.split_to(pos);
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > MAX_LINE_LEN => {
            debug!("chunk line exceeds {} bytes", MAX_LINE_LEN);
            Err(Parse::Chunked)
        }
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, Parse> {
    // 分号之后是 chunk 扩展，直接忽略
    let size = line.split(|&b| b == b';').next().unwrap_or(line);
    let size = trim_ows(size);
    if size.is_empty() {
        return Err(Parse::Chunked);
    }

    let mut n = 0u64;
    for &b in size {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(Parse::Chunked),
        };
        n = n
            .checked_mul(16)
            .and_then(|n| n.checked_add(u64::from(digit)))
            .ok_or(Parse::Chunked)?;
    }
    Ok(n)
}

fn trim_ows(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}
