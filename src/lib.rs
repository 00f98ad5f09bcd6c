#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # tether
//!
//! tether 是一个异步 HTTP/1 客户端。它的重点不是 HTTP 报文格式，而是请求在并发、
//! 超时和网络故障下的行为：
//!
//! - 请求的生命周期独立于客户端句柄。丢弃 [`Client`] 不会取消已经提交的请求，
//!   它们的 future 仍然会得到结果；
//! - 超时按阶段计时（建立连接、写出请求、等待响应头、每一次 body 读取），
//!   任何一次超时都会丢弃对应的连接；
//! - 错误分类明确：建立连接失败、连接中途断开、超时、协议错误、取消，
//!   分别可以通过 [`Error`] 上的方法判断；
//! - 可选的按提交顺序派发（`guarantee_order`）。
//!
//! 响应头到达时请求即完成，响应 body 随后从仍被占用的连接上按需读取，
//! 读完后连接回到连接池。
//!
//! # Optional Features
//!
//! - `tcp`（默认开启）：基于 tokio 的 TCP 连接器、执行器与定时器。
//! - `tracing`（默认开启）：通过 `tracing` 输出调试日志。
//!
//! 关闭 `tcp` 后需要通过 [`client::Builder`] 自行提供连接器、执行器和定时器。
//!
//! # 示例
//!
//! ```no_run
//! # #[cfg(feature = "tcp")]
//! # async fn run() -> tether::Result<()> {
//! use std::time::Duration;
//! use tether::{Client, Request};
//! use tether::body::Outgoing;
//!
//! let client = Client::builder()
//!     .timeout(Some(Duration::from_secs(10)))
//!     .base_uri("http://127.0.0.1:3000".parse().unwrap())
//!     .build();
//!
//! let req = Request::post("/upload")
//!     .body(Outgoing::from("hello"))
//!     .unwrap();
//! let pending = client.request(req);
//!
//! // 丢弃客户端不影响已经提交的请求
//! drop(client);
//! let res = pending.await?;
//! println!("status: {}", res.status());
//! # Ok(())
//! # }
//! ```

#[doc(hidden)]
pub use http;

#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

pub use crate::client::{Client, Config, RequestId, ResponseFuture};
pub use crate::error::{Error, Result, Stage};

#[macro_use]
mod cfg;

#[macro_use]
mod trace;

pub mod body;
pub mod client;
mod common;
pub mod connect;
mod error;
mod headers;
mod proto;
pub mod rt;
