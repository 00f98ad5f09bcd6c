//! 定时器抽象模块。
//!
//! `Time` 封装了用户提供的（或默认的 tokio）`rt::Timer`，为请求的每个阶段
//! 提供统一的截止时间操作：
//!
//! - [`Time::deadline`]：给一个阶段的 future 套上从"此刻"起算的截止时间；
//! - [`Time::sleep`] / [`Time::rearm`]：供响应 body 的逐块读取使用，每交付一块
//!   数据就把同一个 sleep 重置到新的截止时间。
//!
//! 没有配置定时器（`Time::Empty`）时，所有截止时间都被忽略，并在配置了超时的
//! 情况下发出一次警告。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use pin_project_lite::pin_project;

use crate::error::Stage;
use crate::rt::{Sleep, Timer};

/// 用户提供的定时器封装。
#[derive(Clone)]
pub(crate) enum Time {
    Timer(Arc<dyn Timer + Send + Sync>),
    Empty,
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Time").finish()
    }
}

impl Time {
    /// 创建一个在 `duration` 之后就绪的 sleep；没有定时器时返回 `None`。
    pub(crate) fn sleep(&self, duration: Duration) -> Option<Pin<Box<dyn Sleep>>> {
        match *self {
            Time::Empty => None,
            Time::Timer(ref t) => Some(t.sleep(duration)),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        match *self {
            Time::Empty => Instant::now(),
            Time::Timer(ref t) => t.now(),
        }
    }

    /// 把已有的 sleep 推迟到从现在起 `duration` 之后。
    pub(crate) fn rearm(&self, sleep: &mut Pin<Box<dyn Sleep>>, duration: Duration) {
        let deadline = self.now() + duration;
        sleep.as_mut().reset(deadline);
    }

    /// 检查某个阶段的超时配置，返回实际生效的时长。
    ///
    /// 配置了超时却没有定时器时，超时无法生效：发出警告并返回 `None`。
    pub(crate) fn check(&self, dur: Option<Duration>, stage: Stage) -> Option<Duration> {
        match (dur, self) {
            (Some(_), Time::Empty) => {
                warn!("{} timeout set, but no timer set", stage);
                None
            }
            (Some(dur), Time::Timer(..)) => Some(dur),
            (None, _) => None,
        }
    }

    /// 给一个阶段的 future 加上截止时间，从调用此方法的时刻开始计时。
    ///
    /// 截止时间先到时，future 被丢弃，结果为该阶段的超时错误。
    pub(crate) fn deadline<F: Future>(
        &self,
        dur: Option<Duration>,
        stage: Stage,
        fut: F,
    ) -> Deadline<F> {
        let sleep = self.check(dur, stage).and_then(|dur| self.sleep(dur));
        Deadline { fut, sleep, stage }
    }
}

pin_project! {
    /// 带截止时间的 future，由 [`Time::deadline`] 创建。
    #[must_use = "futures do nothing unless polled"]
    pub(crate) struct Deadline<F> {
        #[pin]
        fut: F,
        sleep: Option<Pin<Box<dyn Sleep>>>,
        stage: Stage,
    }
}

impl<F: Future> Future for Deadline<F> {
    type Output = crate::Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.project();

        // 内部 future 优先：同一轮中两者都就绪时，以完成为准
        if let Poll::Ready(out) = me.fut.poll(cx) {
            return Poll::Ready(Ok(out));
        }

        if let Some(sleep) = me.sleep {
            if sleep.as_mut().poll(cx).is_ready() {
                trace!("{} deadline elapsed", me.stage);
                return Poll::Ready(Err(crate::Error::new_timeout(*me.stage)));
            }
        }

        Poll::Pending
    }
}
