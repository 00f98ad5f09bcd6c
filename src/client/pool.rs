//! 连接池。
//!
//! 空闲连接按 [`Endpoint`] 分组保存。借出的连接包装在 [`Pooled`] 中，
//! `Pooled` 被丢弃时连接自动归还：可复用则放回空闲列表，否则关闭。
//!
//! 空闲表的所有修改都在同一把锁下完成；借出的连接只属于持有 `Pooled` 的一方。
//!
//! 过期的空闲连接在每次借出和交还时清理，范围是所有端点，而不只是本次请求的端点。

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::conn::Connection;
use super::order::Ticket;
use crate::common::time::Time;
use crate::connect::{Connect, Endpoint};
use crate::error::Stage;

#[derive(Clone)]
pub(crate) struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Config {
    /// 空闲连接的最长保留时间，`None` 表示不过期
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) max_idle_per_host: usize,
}

struct PoolInner {
    connector: Arc<dyn Connect>,
    idle: Mutex<HashMap<Endpoint, Vec<Idle>>>,
    time: Time,
    config: Config,
}

struct Idle {
    conn: Connection,
    idle_at: Instant,
}

/// 从连接池借出的连接。
///
/// 丢弃时把连接交还连接池，由连接自身的状态决定放回空闲列表还是关闭。
pub(crate) struct Pooled {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    /// 连接交还之后才作废的派发号码
    turn: Option<Ticket>,
}

impl Pool {
    pub(crate) fn new(connector: Arc<dyn Connect>, time: Time, config: Config) -> Pool {
        Pool {
            inner: Arc::new(PoolInner {
                connector,
                idle: Mutex::new(HashMap::new()),
                time,
                config,
            }),
        }
    }

    /// 借出一条到 `endpoint` 的连接。
    ///
    /// 优先复用空闲连接；没有可用的空闲连接时，在 `timeout`（连接阶段的截止时间）内
    /// 建立新连接。连接失败不会在池中留下任何记录。
    pub(crate) async fn acquire(
        &self,
        endpoint: &Endpoint,
        timeout: Option<Duration>,
    ) -> crate::Result<Pooled> {
        if let Some(mut conn) = self.inner.checkout(endpoint) {
            trace!("reuse idle connection for {}", endpoint);
            conn.reuse();
            return Ok(self.pooled(conn));
        }

        debug!("connecting to {}", endpoint);
        let connecting = self.inner.connector.connect(endpoint);
        let io = self
            .inner
            .time
            .deadline(timeout, Stage::Connect, connecting)
            .await?
            .map_err(|err| {
                debug!("connect to {} failed: {}", endpoint, err);
                crate::Error::new_connect(err)
            })?;
        trace!("connected to {}", endpoint);
        Ok(self.pooled(Connection::new(io, endpoint.clone())))
    }

    fn pooled(&self, conn: Connection) -> Pooled {
        Pooled {
            conn: Some(conn),
            pool: self.inner.clone(),
            turn: None,
        }
    }

    /// `endpoint` 当前的空闲连接数。
    pub(crate) fn idle_count(&self, endpoint: &Endpoint) -> usize {
        self.inner
            .lock_idle()
            .get(endpoint)
            .map_or(0, |list| list.len())
    }

    /// 关闭并丢弃所有空闲连接。借出中的连接不受影响。
    pub(crate) fn clear(&self) {
        let drained: Vec<Idle> = {
            let mut idle = self.inner.lock_idle();
            idle.drain().flat_map(|(_, list)| list).collect()
        };
        trace!("clearing {} idle connections", drained.len());
        close_all(drained.into_iter().map(|entry| entry.conn).collect());
    }
}

impl PoolInner {
    fn lock_idle(&self) -> MutexGuard<'_, HashMap<Endpoint, Vec<Idle>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 取出一条仍然可用的空闲连接，顺带清理已过期或已被对端关闭的连接。
    fn checkout(&self, endpoint: &Endpoint) -> Option<Connection> {
        let now = self.time.now();
        let (found, discarded) = {
            let mut idle = self.lock_idle();
            let mut discarded = self.take_expired(&mut idle, now);
            let mut found = None;
            if let Some(list) = idle.get_mut(endpoint) {
                // 最近放回的连接最可能仍然存活
                while let Some(entry) = list.pop() {
                    let mut conn = entry.conn;
                    if conn.is_closed_by_peer() {
                        discarded.push(conn);
                        continue;
                    }
                    found = Some(conn);
                    break;
                }
                if list.is_empty() {
                    idle.remove(endpoint);
                }
            }
            (found, discarded)
        };

        close_all(discarded);
        found
    }

    /// 从所有端点的空闲列表中摘除过期的连接，没有剩余连接的端点一并移除。
    fn take_expired(
        &self,
        idle: &mut HashMap<Endpoint, Vec<Idle>>,
        now: Instant,
    ) -> Vec<Connection> {
        let timeout = match self.config.idle_timeout {
            Some(timeout) => timeout,
            None => return Vec::new(),
        };

        let mut expired = Vec::new();
        idle.retain(|_endpoint, list| {
            let (alive, stale): (Vec<Idle>, Vec<Idle>) = mem::take(list)
                .into_iter()
                .partition(|entry| now.saturating_duration_since(entry.idle_at) < timeout);
            if !stale.is_empty() {
                trace!("{} idle connections for {} expired", stale.len(), _endpoint);
            }
            expired.extend(stale.into_iter().map(|entry| entry.conn));
            *list = alive;
            !list.is_empty()
        });
        expired
    }

    /// 交还一条借出的连接。每次交还都会顺带清理所有端点上过期的空闲连接。
    fn release(&self, mut conn: Connection) {
        let endpoint = conn.endpoint().clone();
        let now = self.time.now();

        let closing = {
            let mut idle = self.lock_idle();
            let mut closing = self.take_expired(&mut idle, now);

            if conn.was_aborted() {
                // 对端可能已经整体不可用，下一个请求应当重新建立连接
                if let Some(evicted) = idle.remove(&endpoint) {
                    debug!(
                        "connection to {} aborted, evicting {} idle connections",
                        endpoint,
                        evicted.len()
                    );
                    closing.extend(evicted.into_iter().map(|entry| entry.conn));
                }
                closing.push(conn);
            } else if !conn.is_reusable() {
                trace!("discarding connection to {}", endpoint);
                closing.push(conn);
            } else if idle.get(&endpoint).map_or(0, Vec::len) >= self.config.max_idle_per_host {
                trace!("max idle per host reached, closing connection");
                closing.push(conn);
            } else {
                conn.idle();
                idle.entry(endpoint).or_default().push(Idle { conn, idle_at: now });
            }
            closing
        };

        close_all(closing);
    }

    #[cfg(test)]
    fn endpoint_count(&self) -> usize {
        self.lock_idle().len()
    }
}

fn close_all(conns: Vec<Connection>) {
    for mut conn in conns {
        conn.close();
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .finish()
    }
}

// ===== impl Pooled =====

impl Pooled {
    /// 占用派发顺序，直到这条连接被交还。
    pub(crate) fn hold_turn(&mut self, ticket: Ticket) {
        self.turn = Some(ticket);
    }
}

impl Deref for Pooled {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("not dropped")
    }
}

impl DerefMut for Pooled {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("not dropped")
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
        // 先归还连接再作废号码，下一个请求才能复用这条连接
        drop(self.turn.take());
    }
}

impl fmt::Debug for Pooled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.conn).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::{ConnectError, ConnectErrorKind, Connecting, Io};
    use http::uri::Scheme;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    type Servers = Arc<Mutex<Vec<DuplexStream>>>;

    fn endpoint() -> Endpoint {
        Endpoint::new(Scheme::HTTP, "example.com", 80)
    }

    fn config() -> Config {
        Config {
            idle_timeout: None,
            max_idle_per_host: usize::MAX,
        }
    }

    fn duplex_pool(time: Time, config: Config) -> (Pool, Arc<AtomicUsize>, Servers) {
        let connects = Arc::new(AtomicUsize::new(0));
        let servers = Servers::default();
        let (c, s) = (connects.clone(), servers.clone());
        let connector = move |_: &Endpoint| -> Connecting {
            c.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(1024);
            s.lock().unwrap().push(server);
            Box::pin(async move { Ok(Box::new(client) as Box<dyn Io>) })
        };
        (Pool::new(Arc::new(connector), time, config), connects, servers)
    }

    async fn complete(conn: &mut Pooled, server: &mut DuplexStream) {
        server
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
        let msg = conn.receive_head(&Method::GET, 100).await.unwrap();
        conn.on_message_complete(msg.keep_alive);
    }

    #[tokio::test]
    async fn completed_connection_is_reused() {
        let (pool, connects, servers) = duplex_pool(Time::Empty, config());

        let mut conn = pool.acquire(&endpoint(), None).await.unwrap();
        let mut server = servers.lock().unwrap().pop().unwrap();
        complete(&mut conn, &mut server).await;
        drop(conn);
        assert_eq!(pool.idle_count(&endpoint()), 1);

        let _conn = pool.acquire(&endpoint(), None).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(&endpoint()), 0);
    }

    #[tokio::test]
    async fn unfinished_connection_is_discarded() {
        let (pool, connects, _servers) = duplex_pool(Time::Empty, config());

        let conn = pool.acquire(&endpoint(), None).await.unwrap();
        drop(conn);
        assert_eq!(pool.idle_count(&endpoint()), 0);

        let _conn = pool.acquire(&endpoint(), None).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_idle_connection_is_skipped() {
        let (pool, connects, servers) = duplex_pool(Time::Empty, config());

        let mut conn = pool.acquire(&endpoint(), None).await.unwrap();
        let mut server = servers.lock().unwrap().pop().unwrap();
        complete(&mut conn, &mut server).await;
        drop(conn);
        drop(server);

        let _conn = pool.acquire(&endpoint(), None).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_idle_per_host_zero_keeps_nothing() {
        let config = Config {
            max_idle_per_host: 0,
            ..config()
        };
        let (pool, _connects, servers) = duplex_pool(Time::Empty, config);

        let mut conn = pool.acquire(&endpoint(), None).await.unwrap();
        let mut server = servers.lock().unwrap().pop().unwrap();
        complete(&mut conn, &mut server).await;
        drop(conn);
        assert_eq!(pool.idle_count(&endpoint()), 0);
    }

    #[tokio::test]
    async fn abort_evicts_idle_siblings() {
        let (pool, _connects, servers) = duplex_pool(Time::Empty, config());

        let mut a = pool.acquire(&endpoint(), None).await.unwrap();
        let mut b = pool.acquire(&endpoint(), None).await.unwrap();
        let (mut server_a, server_b) = {
            let mut servers = servers.lock().unwrap();
            let b = servers.pop().unwrap();
            (servers.pop().unwrap(), b)
        };

        complete(&mut a, &mut server_a).await;
        drop(a);
        assert_eq!(pool.idle_count(&endpoint()), 1);

        drop(server_b);
        let err = b.receive_head(&Method::GET, 100).await.unwrap_err();
        assert!(err.is_aborted());
        drop(b);
        assert_eq!(pool.idle_count(&endpoint()), 0);
    }

    #[tokio::test]
    async fn connect_failure_leaves_no_entry() {
        let connector = |_: &Endpoint| -> Connecting {
            Box::pin(async { Err(ConnectError::new(ConnectErrorKind::Refused)) })
        };
        let pool = Pool::new(Arc::new(connector), Time::Empty, config());

        let err = pool.acquire(&endpoint(), None).await.unwrap_err();
        assert!(err.is_connect());
        assert_eq!(
            err.connect_error().map(ConnectError::kind),
            Some(ConnectErrorKind::Refused)
        );
        assert_eq!(pool.idle_count(&endpoint()), 0);
    }

    #[cfg(feature = "tcp")]
    #[tokio::test(start_paused = true)]
    async fn expired_idle_connection_is_dropped() {
        let time = Time::Timer(Arc::new(crate::rt::TokioTimer::new()));
        let config = Config {
            idle_timeout: Some(Duration::from_secs(1)),
            ..config()
        };
        let (pool, connects, servers) = duplex_pool(time, config);

        let mut conn = pool.acquire(&endpoint(), None).await.unwrap();
        let mut server = servers.lock().unwrap().pop().unwrap();
        complete(&mut conn, &mut server).await;
        drop(conn);

        tokio::time::advance(Duration::from_secs(2)).await;
        let _conn = pool.acquire(&endpoint(), None).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(&endpoint()), 0);
    }

    #[tokio::test]
    async fn turn_passes_only_after_connection_returns() {
        use super::super::order::DispatchOrder;
        use futures_util::FutureExt;

        let (pool, connects, servers) = duplex_pool(Time::Empty, config());
        let order = DispatchOrder::new();
        let first = order.ticket();
        let second = order.ticket();

        let mut conn = pool.acquire(&endpoint(), None).await.unwrap();
        conn.hold_turn(first);
        let mut server = servers.lock().unwrap().pop().unwrap();
        complete(&mut conn, &mut server).await;
        assert!(second.wait_turn().now_or_never().is_none());

        drop(conn);
        assert!(second.wait_turn().now_or_never().is_some());
        let _conn = pool.acquire(&endpoint(), None).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "tcp")]
    #[tokio::test(start_paused = true)]
    async fn release_sweeps_expired_connections_of_every_endpoint() {
        let time = Time::Timer(Arc::new(crate::rt::TokioTimer::new()));
        let config = Config {
            idle_timeout: Some(Duration::from_secs(1)),
            ..config()
        };
        let (pool, _connects, servers) = duplex_pool(time, config);
        let other = Endpoint::new(Scheme::HTTP, "other.example", 8080);

        let mut a = pool.acquire(&other, None).await.unwrap();
        let mut server_a = servers.lock().unwrap().pop().unwrap();
        let mut b = pool.acquire(&endpoint(), None).await.unwrap();
        let mut server_b = servers.lock().unwrap().pop().unwrap();

        complete(&mut a, &mut server_a).await;
        drop(a);
        assert_eq!(pool.idle_count(&other), 1);

        // `other` 再也没有请求，它的空闲连接在别的端点交还连接时被清理
        tokio::time::advance(Duration::from_secs(2)).await;
        complete(&mut b, &mut server_b).await;
        drop(b);

        assert_eq!(pool.idle_count(&other), 0);
        assert_eq!(pool.idle_count(&endpoint()), 1);
        assert_eq!(pool.inner.endpoint_count(), 1);
    }

    #[cfg(feature = "tcp")]
    #[tokio::test(start_paused = true)]
    async fn connect_deadline() {
        let time = Time::Timer(Arc::new(crate::rt::TokioTimer::new()));
        let connector =
            |_: &Endpoint| -> Connecting { Box::pin(futures_util::future::pending()) };
        let pool = Pool::new(Arc::new(connector), time, config());

        let err = pool
            .acquire(&endpoint(), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err.timeout_stage(), Some(Stage::Connect));
    }
}
