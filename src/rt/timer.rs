//! 定时器 trait。
//!
//! 客户端的每个阶段截止时间都由一个 [`Sleep`] 实现。响应 body 的逐块读取会反复
//! 复用同一个 `Sleep`：每交付一块数据，就通过 [`Sleep::reset`] 把它推迟到新的
//! 截止时间，而不是重新分配一个。
//!
//! 截止时间总是以 [`Timer::now`] 为基准计算，所以一个使用暂停时钟的定时器
//! （例如测试中的 `tokio::time::pause`）可以让所有阶段的超时一起被快进。

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// 创建截止时间的定时器。
///
/// # 示例
///
/// ```
/// use std::pin::Pin;
/// use std::time::Instant;
/// use tether::rt::{Sleep, Timer};
///
/// struct Never;
///
/// impl Timer for Never {
///     fn sleep_until(&self, _deadline: Instant) -> Pin<Box<dyn Sleep>> {
///         Box::pin(Pending)
///     }
/// }
///
/// struct Pending;
///
/// impl std::future::Future for Pending {
///     type Output = ();
///     fn poll(
///         self: Pin<&mut Self>,
///         _: &mut std::task::Context<'_>,
///     ) -> std::task::Poll<()> {
///         std::task::Poll::Pending
///     }
/// }
///
/// impl Sleep for Pending {
///     fn reset(self: Pin<&mut Self>, _deadline: Instant) {}
/// }
/// ```
pub trait Timer {
    /// 返回一个在 `deadline` 时完成的 `Sleep`。
    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>>;

    /// 定时器的当前时间，所有截止时间都以它为基准。
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// 返回一个在 `duration` 之后完成的 `Sleep`。
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        self.sleep_until(self.now() + duration)
    }
}

/// 由 [`Timer`] 创建的截止时间。
pub trait Sleep: Send + Future<Output = ()> {
    /// 原地把截止时间改为 `deadline`。
    ///
    /// 已经完成的 `Sleep` 在重置之后会重新等待。
    fn reset(self: Pin<&mut Self>, deadline: Instant);
}
