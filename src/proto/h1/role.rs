use bytes::BytesMut;
use http::header::{HeaderName, HeaderValue, CONNECTION, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};

use super::MAX_HEAD_SIZE;
use crate::body::DecodedLength;
use crate::error::{Header, Parse};
use crate::headers;
use crate::proto::ResponseHead;

pub(crate) type ParseResult = Result<Option<ParsedMessage>, Parse>;

/// 解析一条响应所需的上下文。
#[derive(Debug)]
pub(crate) struct ParseContext<'a> {
    /// 对应请求的方法，HEAD 请求的响应没有 body。
    pub(crate) req_method: &'a Method,
    /// 最多接受的头部数量。
    pub(crate) max_headers: usize,
}

/// 一条解析完成的响应头。
#[derive(Debug)]
pub(crate) struct ParsedMessage {
    pub(crate) head: ResponseHead,
    pub(crate) decode: DecodedLength,
    pub(crate) keep_alive: bool,
}

/// 尝试从 `buf` 的开头解析一个完整的响应头。
///
/// 数据不完整时返回 `Ok(None)` 且不消耗任何字节；解析成功时从 `buf` 中移除
/// 响应头占用的字节，剩余的部分属于 body。
pub(crate) fn parse_response_head(buf: &mut BytesMut, ctx: ParseContext<'_>) -> ParseResult {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut headers_buf = vec![httparse::EMPTY_HEADER; ctx.max_headers];
    let (len, version, status, headers) = {
        let mut res = httparse::Response::new(&mut headers_buf);
        match res.parse(&buf[..])? {
            httparse::Status::Complete(len) => {
                trace!("Response.parse Complete({})", len);
                let code = res.code.ok_or(Parse::Status)?;
                let status = StatusCode::from_u16(code)?;
                let version = if res.version == Some(1) {
                    Version::HTTP_11
                } else {
                    Version::HTTP_10
                };

                let mut headers = HeaderMap::with_capacity(res.headers.len());
                for header in res.headers.iter() {
                    let name = HeaderName::from_bytes(header.name.as_bytes())
                        .map_err(|_| Parse::Header(Header::Token))?;
                    let value = HeaderValue::from_bytes(header.value)
                        .map_err(|_| Parse::Header(Header::Token))?;
                    headers.append(name, value);
                }
                (len, version, status, headers)
            }
            httparse::Status::Partial => {
                if buf.len() >= MAX_HEAD_SIZE {
                    debug!("response head is too large ({} bytes)", buf.len());
                    return Err(Parse::TooLarge);
                }
                return Ok(None);
            }
        }
    };
    let _ = buf.split_to(len);

    let mut keep_alive = version == Version::HTTP_11;
    if let Some(value) = headers.get(CONNECTION) {
        keep_alive = if version == Version::HTTP_11 {
            !headers::connection_close(value)
        } else {
            headers::connection_keep_alive(value)
        };
    }

    let decode = decoded_length(ctx.req_method, status, version, &headers)?;
    if decode.ends_connection() {
        // body 以连接关闭为结束标志，读完后连接必然不可复用
        keep_alive = false;
    }
    if status == StatusCode::SWITCHING_PROTOCOLS {
        keep_alive = false;
    }

    Ok(Some(ParsedMessage {
        head: ResponseHead {
            version,
            subject: status,
            headers,
        },
        decode,
        keep_alive,
    }))
}

// 消息长度的判定顺序见 RFC 7230 3.3.3
fn decoded_length(
    method: &Method,
    status: StatusCode,
    version: Version,
    headers: &HeaderMap,
) -> Result<DecodedLength, Parse> {
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(DecodedLength::ZERO);
    }

    if headers.contains_key(TRANSFER_ENCODING) {
        // Transfer-Encoding 是 HTTP/1.1 才有的机制
        if version == Version::HTTP_10 {
            debug!("HTTP/1.0 cannot have Transfer-Encoding header");
            return Err(Parse::transfer_encoding_unexpected());
        }

        return Ok(if headers::transfer_encoding_is_chunked(headers) {
            DecodedLength::Chunked
        } else {
            trace!("not chunked, read till eof");
            DecodedLength::CloseDelimited
        });
    }

    match headers::content_length_parse_all(headers) {
        Ok(Some(len)) => Ok(DecodedLength::Known(len)),
        Ok(None) => Ok(DecodedLength::CloseDelimited),
        Err(()) => {
            debug!("illegal Content-Length header");
            Err(Parse::content_length_invalid())
        }
    }
}
