//! 异步任务辅助工具模块。
//!
//! - `noop_waker`：创建一个什么都不做的 Waker
//! - `poll_once`：用空操作 Waker 同步地轮询一次，不会登记任何后续唤醒
//!
//! 连接池在复用空闲连接之前，用 `poll_once` 对连接做一次非阻塞的读探测，
//! 判断对端是否已经关闭了连接。

use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

// TODO: replace with `std::task::Waker::noop()` once MSRV >= 1.85
/// 创建一个空操作（no-op）Waker。
///
/// 该 Waker 的所有操作（clone、wake、wake_by_ref、drop）都不执行任何动作。
fn noop_waker() -> Waker {
    const NOOP_RAW_WAKER: RawWaker = RawWaker::new(std::ptr::null(), &NOOP_VTABLE);
    const NOOP_VTABLE: RawWakerVTable = RawWakerVTable::new(
        |_: *const ()| NOOP_RAW_WAKER,
        |_: *const ()| {},
        |_: *const ()| {},
        |_: *const ()| {},
    );

    // SAFETY：虚函数表中的所有函数都可以安全调用，Waker 的安全性不要求它们实际执行任何操作。
    unsafe { Waker::from_raw(NOOP_RAW_WAKER) }
}

/// 用空操作 Waker 调用一次 `f`。
///
/// 如果返回 `Pending`，没有任何人会被唤醒；调用者不能依赖这次轮询登记的唤醒。
pub(crate) fn poll_once<T>(f: impl FnOnce(&mut Context<'_>) -> Poll<T>) -> Option<T> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match f(&mut cx) {
        Poll::Ready(res) => Some(res),
        Poll::Pending => None,
    }
}
