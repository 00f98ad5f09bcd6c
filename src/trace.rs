//! 日志追踪（tracing）宏模块
//!
//! 对 `tracing` crate 的日志宏和 span 宏做了一层条件包装：
//!
//! 1. 启用 `tracing` feature 时，宏展开为实际的 `tracing::*` 调用
//! 2. 未启用时，宏展开为空操作，不产生任何运行时开销
//!
//! 本模块在 `lib.rs` 中紧跟 `cfg` 模块以 `#[macro_use]` 引入，整个 crate 都可以
//! 直接使用 `trace!`、`debug!`、`warn!` 与 `instrument!`，而不必关心 feature 是否开启。
//!
//! `tracing` 依赖开启了 `log` 特性，没有安装 tracing subscriber 时，事件会转发给
//! `log`，因此测试里用 `pretty_env_logger` 也能看到这些日志。

/// `debug!`：调试级别日志宏
macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    }
}

/// `instrument!`：让一个 future 在调试级别的 span 中运行。
///
/// span 跟随 future 跨越每一个 `.await`，适合包装整个请求任务。未启用 tracing 时
/// 原样返回 future。
macro_rules! instrument {
    ($fut:expr, $($span:tt)+) => {{
        #[cfg(feature = "tracing")]
        let fut = tracing::Instrument::instrument($fut, tracing::debug_span!($($span)+));
        #[cfg(not(feature = "tracing"))]
        let fut = $fut;
        fut
    }};
}

/// `trace!`：追踪级别日志宏
///
/// 最细粒度的日志级别。请求在各个阶段之间的迁移都用它记录。
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    }
}

/// `warn!`：警告级别日志宏
macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    }
}
