//! 请求与响应的 body。
//!
//! 请求 body 是 [`Outgoing`]：空、完整的一段字节，或者一个字节流。
//! 响应 body 是 [`Incoming`]：它在响应头到达后仍然占用着连接，按需从连接中读取，
//! 读完后连接才回到连接池。
//!
//! 两者都实现了 [`Body`] trait，可以直接使用 [`http-body-util`][] 中的工具，
//! 例如 `BodyExt::collect`。
//!
//! [`http-body-util`]: https://docs.rs/http-body-util

pub use bytes::{Buf, Bytes};
pub use http_body::Body;
pub use http_body::Frame;
pub use http_body::SizeHint;

pub use self::incoming::Incoming;
pub use self::outgoing::Outgoing;

pub(crate) use self::length::DecodedLength;

mod incoming;
mod length;
mod outgoing;
