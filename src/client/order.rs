//! 按提交顺序派发请求。
//!
//! 开启 `guarantee_order` 后，每个请求在提交时同步领取一张递增的号码。
//! 执行任务在借用连接之前等待轮到自己的号码，拿到连接后号码跟随连接一起保管，
//! 直到连接归还连接池或被关闭（或者请求在此之前失败、被取消）才作废，
//! 下一个号码随即可以派发。
//!
//! 这样同一个客户端上同一时刻只有一个请求占用连接：后一个请求可以复用前一个
//! 请求的连接，只接受一条连接的服务端也会按提交顺序看到所有请求。

use std::collections::BTreeSet;
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Clone)]
pub(crate) struct DispatchOrder {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    /// 下一张要发出的号码
    next: u64,
    /// 当前允许派发的号码
    serving: u64,
    /// 已作废但还没轮到的号码
    finished: BTreeSet<u64>,
}

/// 派发号码。丢弃即作废。
pub(crate) struct Ticket {
    order: Arc<Inner>,
    number: u64,
}

impl DispatchOrder {
    pub(crate) fn new() -> DispatchOrder {
        DispatchOrder {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    next: 0,
                    serving: 0,
                    finished: BTreeSet::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// 领取下一张号码，必须在提交请求时同步调用。
    pub(crate) fn ticket(&self) -> Ticket {
        let mut state = self.inner.lock();
        let number = state.next;
        state.next += 1;
        Ticket {
            order: self.inner.clone(),
            number,
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_turn(&self, number: u64) -> bool {
        self.lock().serving == number
    }
}

impl Ticket {
    /// 等到轮到这张号码。
    pub(crate) async fn wait_turn(&self) {
        loop {
            let mut notified = pin!(self.order.notify.notified());
            // 先登记等待再检查，避免错过检查与等待之间的唤醒
            notified.as_mut().enable();
            if self.order.is_turn(self.number) {
                return;
            }
            trace!("dispatch ticket {} waiting", self.number);
            notified.await;
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut guard = self.order.lock();
        let state = &mut *guard;
        if state.serving == self.number {
            state.serving += 1;
            // 跳过之前已经作废的号码
            while state.finished.remove(&state.serving) {
                state.serving += 1;
            }
        } else {
            state.finished.insert(self.number);
            return;
        }
        drop(guard);
        self.order.notify.notify_waiters();
    }
}

impl fmt::Debug for DispatchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("DispatchOrder")
            .field("next", &state.next)
            .field("serving", &state.serving)
            .finish()
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ticket").field(&self.number).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_ticket_goes_immediately() {
        let order = DispatchOrder::new();
        let ticket = order.ticket();
        ticket.wait_turn().await;
    }

    #[tokio::test]
    async fn later_ticket_waits_for_earlier() {
        let order = DispatchOrder::new();
        let first = order.ticket();
        let second = order.ticket();

        let waiter = tokio::spawn(async move {
            second.wait_turn().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second ticket should be served")
            .unwrap();
    }

    #[tokio::test]
    async fn abandoned_tickets_are_skipped() {
        let order = DispatchOrder::new();
        let first = order.ticket();
        let second = order.ticket();
        let third = order.ticket();

        // 中间的号码先作废，第一张作废时一并跳过
        drop(second);
        drop(first);
        tokio::time::timeout(Duration::from_secs(1), third.wait_turn())
            .await
            .expect("third ticket should be served");
    }
}
