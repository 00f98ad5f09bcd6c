//! 基于 tokio 的默认运行时组件：`TokioExecutor` 与 `TokioTimer`。

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use pin_project_lite::pin_project;

use super::{Executor, Sleep, Timer};

/// 使用 `tokio::spawn` 运行 future 的执行器。
///
/// 必须在 tokio 运行时上下文中使用。
#[non_exhaustive]
#[derive(Default, Debug, Clone)]
pub struct TokioExecutor {}

impl TokioExecutor {
    /// 创建新的执行器。
    pub fn new() -> Self {
        Self {}
    }
}

impl<Fut> Executor<Fut> for TokioExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        tokio::spawn(fut);
    }
}

/// 基于 `tokio::time` 的定时器。
///
/// 与 tokio 的测试工具（`tokio::time::pause`）兼容：`now()` 返回 tokio 的时钟。
#[non_exhaustive]
#[derive(Default, Clone, Debug)]
pub struct TokioTimer;

impl TokioTimer {
    /// 创建新的定时器。
    pub fn new() -> Self {
        Self
    }
}

impl Timer for TokioTimer {
    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: tokio::time::sleep_until(deadline.into()),
        })
    }

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: tokio::time::sleep(duration),
        })
    }
}

pin_project! {
    struct TokioSleep {
        #[pin]
        inner: tokio::time::Sleep,
    }
}

impl Future for TokioSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

impl Sleep for TokioSleep {
    fn reset(self: Pin<&mut Self>, deadline: Instant) {
        self.project().inner.reset(deadline.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reset_moves_the_deadline() {
        let timer = TokioTimer::new();
        let start = timer.now();
        let mut sleep = timer.sleep(Duration::from_millis(10));
        sleep.as_mut().reset(start + Duration::from_millis(100));
        sleep.as_mut().await;
        assert!(timer.now() - start >= Duration::from_millis(100));

        // 已经完成的 sleep 重置后重新等待
        sleep.as_mut().reset(timer.now() + Duration::from_millis(30));
        let before = timer.now();
        sleep.await;
        assert!(timer.now() - before >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn executor_spawns_onto_tokio() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioExecutor::new().execute(async move {
            let _ = tx.send(5u8);
        });
        assert_eq!(rx.await.unwrap(), 5);
    }
}
