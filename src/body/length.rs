use std::fmt;

/// 响应 body 的界定方式，由响应头推导得出。
///
/// `Known` 记录的是尚未读出的字节数，随着读取递减。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DecodedLength {
    Known(u64),
    Chunked,
    /// body 一直持续到对端关闭连接
    CloseDelimited,
}

impl DecodedLength {
    pub(crate) const ZERO: DecodedLength = DecodedLength::Known(0);

    /// 剩余的确切长度；chunked 与 close-delimited 时为 `None`。
    pub(crate) fn exact(self) -> Option<u64> {
        match self {
            DecodedLength::Known(n) => Some(n),
            DecodedLength::Chunked | DecodedLength::CloseDelimited => None,
        }
    }

    /// 以连接关闭结束的 body 读完后，连接必然不能复用。
    pub(crate) fn ends_connection(self) -> bool {
        self == DecodedLength::CloseDelimited
    }

    /// 记录已经交付了 `amt` 字节。
    pub(crate) fn consume(&mut self, amt: u64) {
        if let DecodedLength::Known(ref mut remaining) = *self {
            *remaining = remaining.saturating_sub(amt);
        }
    }
}

impl fmt::Display for DecodedLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DecodedLength::Known(0) => f.write_str("empty"),
            DecodedLength::Known(n) => write!(f, "content-length ({} bytes)", n),
            DecodedLength::Chunked => f.write_str("chunked encoding"),
            DecodedLength::CloseDelimited => f.write_str("close-delimited"),
        }
    }
}
