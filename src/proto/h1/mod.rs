//! HTTP/1.x 的编解码。
//!
//! - `role`：响应头解析，以及由响应头推导出 body 长度与连接是否可复用；
//! - `encode`：请求头编码与请求 body 的定长/chunked 编码；
//! - `decode`：响应 body 的增量解码。
//!
//! 这里只处理字节，不做 I/O。读写传输层由 `client::conn::Connection` 负责。

pub(crate) use self::decode::{Decoded, Decoder};
pub(crate) use self::encode::{encode_request_head, Encoder};
pub(crate) use self::role::{parse_response_head, ParseContext, ParsedMessage};

mod decode;
mod encode;
mod role;

/// 响应头在读缓冲区里最多可以占用的字节数。
pub(crate) const MAX_HEAD_SIZE: usize = 8192 + 4096 * 100;
