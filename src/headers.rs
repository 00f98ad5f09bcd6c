//! HTTP 头部解析与操作工具模块
//!
//! 请求编码和响应解码都依赖这里的函数来处理 `Connection`、`Content-Length`、
//! `Transfer-Encoding` 三个决定消息边界与连接复用的头部。
//!
//! 所有函数都是 `pub(super)` 可见性，仅供 crate 内部使用。

use bytes::BytesMut;
use http::header::{HeaderValue, OccupiedEntry, ValueIter, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method};

/// 检查 `Connection` 头部是否包含 `keep-alive` 指令。
///
/// HTTP/1.0 的响应只有带上它才能复用连接。
pub(super) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

/// 检查 `Connection` 头部是否包含 `close` 指令。
pub(super) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

/// 从 `HeaderMap` 中解析 `Content-Length`。
///
/// 多个 `Content-Length` 值必须全部合法且彼此相同，否则返回 `Err(())`；
/// 没有该头部时返回 `Ok(None)`。
pub(super) fn content_length_parse_all(headers: &HeaderMap) -> Result<Option<u64>, ()> {
    content_length_parse_all_values(headers.get_all(CONTENT_LENGTH).into_iter())
}

fn content_length_parse_all_values(values: ValueIter<'_, HeaderValue>) -> Result<Option<u64>, ()> {
    // If multiple Content-Length headers were sent, everything can still
    // be alright if they all contain the same value, and all parse
    // correctly. If not, then it's an error.

    let mut content_length: Option<u64> = None;
    for h in values {
        let line = h.to_str().map_err(|_| ())?;
        for v in line.split(',') {
            let n = from_digits(v.trim().as_bytes()).ok_or(())?;
            match content_length {
                None => content_length = Some(n),
                Some(prev) if prev != n => return Err(()),
                Some(_) => (),
            }
        }
    }

    Ok(content_length)
}

fn from_digits(bytes: &[u8]) -> Option<u64> {
    // cannot use FromStr for u64, since it allows a signed prefix
    let mut result = 0u64;
    const RADIX: u64 = 10;

    if bytes.is_empty() {
        return None;
    }

    for &b in bytes {
        // can't use char::to_digit, since we haven't verified these bytes
        // are utf-8.
        match b {
            b'0'..=b'9' => {
                result = result.checked_mul(RADIX)?;
                result = result.checked_add((b - b'0') as u64)?;
            }
            _ => {
                // not a DIGIT, get outta here!
                return None;
            }
        }
    }

    Some(result)
}

/// GET、HEAD、DELETE、CONNECT 没有定义请求 body 的语义，空 body 时不必
/// 发送 `Content-Length: 0`。
pub(super) fn method_has_defined_payload_semantics(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::CONNECT
    )
}

/// 仅在调用者没有设置时写入 `Content-Length`。
pub(super) fn set_content_length_if_missing(headers: &mut HeaderMap, len: u64) {
    headers
        .entry(CONTENT_LENGTH)
        .or_insert_with(|| HeaderValue::from(len));
}

/// 检查 `Transfer-Encoding` 的最后一个编码是否为 chunked。
pub(super) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    is_chunked(headers.get_all(TRANSFER_ENCODING).into_iter())
}

fn is_chunked(mut encodings: ValueIter<'_, HeaderValue>) -> bool {
    // chunked must always be the last encoding (RFC 9112 §6.1)
    if let Some(line) = encodings.next_back() {
        return is_chunked_(line);
    }

    false
}

fn is_chunked_(value: &HeaderValue) -> bool {
    // chunked must always be the last encoding (RFC 9112 §6.1)
    if let Ok(s) = value.to_str() {
        if let Some(encoding) = s.rsplit(',').next() {
            return encoding.trim().eq_ignore_ascii_case("chunked");
        }
    }

    false
}

/// 向调用者已设置的 `Transfer-Encoding`（如 `gzip`）末尾追加 `chunked`。
pub(super) fn add_chunked(mut entry: OccupiedEntry<'_, HeaderValue>) {
    const CHUNKED: &str = "chunked";

    if let Some(line) = entry.iter_mut().next_back() {
        // + 2 for ", "
        let new_cap = line.as_bytes().len() + CHUNKED.len() + 2;
        let mut buf = BytesMut::with_capacity(new_cap);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b", ");
        buf.extend_from_slice(CHUNKED.as_bytes());

        // 原值加上 ASCII 后缀依然是合法的头部值
        if let Ok(value) = HeaderValue::from_maybe_shared(buf.freeze()) {
            *line = value;
        }
        return;
    }

    entry.insert(HeaderValue::from_static(CHUNKED));
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::Entry;

    #[test]
    fn connection_tokens_are_case_insensitive() {
        assert!(connection_close(&HeaderValue::from_static("Upgrade, CLOSE")));
        assert!(!connection_close(&HeaderValue::from_static("keep-alive")));
        assert!(connection_keep_alive(&HeaderValue::from_static(" Keep-Alive ")));
    }

    #[test]
    fn content_length_duplicates() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length_parse_all(&headers), Ok(None));

        headers.append(CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("12, 12"));
        assert_eq!(content_length_parse_all(&headers), Ok(Some(12)));

        headers.append(CONTENT_LENGTH, HeaderValue::from_static("13"));
        assert_eq!(content_length_parse_all(&headers), Err(()));
    }

    #[test]
    fn content_length_rejects_signs() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("+5"));
        assert_eq!(content_length_parse_all(&headers), Err(()));
    }

    #[test]
    fn chunked_must_be_last() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked, gzip"));
        assert!(!transfer_encoding_is_chunked(&headers));

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip, chunked"));
        assert!(transfer_encoding_is_chunked(&headers));
    }

    #[test]
    fn add_chunked_appends() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip"));
        if let Entry::Occupied(entry) = headers.entry(TRANSFER_ENCODING) {
            add_chunked(entry);
        }
        assert_eq!(headers[TRANSFER_ENCODING], "gzip, chunked");
    }
}
