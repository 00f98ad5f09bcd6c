//! 运行时抽象组件模块
//!
//! tether 不直接依赖某个具体的异步运行时来调度请求和计时：
//!
//! - **执行器（Executor）**：每个请求都在执行器上作为独立任务运行，
//!   因此客户端句柄被 drop 后请求仍会继续直到完成。
//! - **定时器（Timer）**：实现各阶段的截止时间。
//!
//! 启用 `tcp` feature（默认开启）时提供基于 tokio 的 [`TokioExecutor`] 和
//! [`TokioTimer`]，`Client::builder()` 默认使用它们。

mod timer;

pub use self::timer::{Sleep, Timer};

cfg_tcp! {
    mod tokio;

    pub use self::tokio::{TokioExecutor, TokioTimer};
}

/// Future 执行器 trait。
///
/// # 示例
///
/// ```
/// # use tether::rt::Executor;
/// # use std::future::Future;
/// #[derive(Clone)]
/// struct SpawnExecutor;
///
/// impl<F> Executor<F> for SpawnExecutor
/// where
///     F: Future + Send + 'static,
///     F::Output: Send + 'static,
/// {
///     fn execute(&self, future: F) {
///         tokio::spawn(future);
///     }
/// }
/// ```
pub trait Executor<Fut> {
    /// 将 future 放入执行器中运行。
    fn execute(&self, fut: Fut);
}
