//! 客户端配置：各阶段超时、派发顺序与连接池策略。

use std::time::Duration;

/// 客户端配置。
///
/// 构造客户端时配置被复制一份快照，之后再修改这个值不会影响已经存在的客户端，
/// 也不会影响已经提交的请求。
///
/// ```
/// use std::time::Duration;
/// use tether::client::Config;
///
/// let mut config = Config::new();
/// config.timeout(Some(Duration::from_secs(5))).guarantee_order(true);
/// assert!(config.get_guarantee_order());
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    pub(super) timeout: Option<Duration>,
    pub(super) guarantee_order: bool,
    pub(super) pool_idle_timeout: Option<Duration>,
    pub(super) pool_max_idle_per_host: usize,
    pub(super) nodelay: bool,
    pub(super) max_headers: usize,
}

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_MAX_HEADERS: usize = 100;

impl Config {
    /// 默认配置。
    pub fn new() -> Config {
        Config {
            timeout: None,
            guarantee_order: false,
            pool_idle_timeout: Some(DEFAULT_POOL_IDLE_TIMEOUT),
            pool_max_idle_per_host: usize::MAX,
            nodelay: true,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }

    /// 每个阶段的超时。
    ///
    /// 超时分别作用于建立连接、写出请求 body 的每一块、等待响应头，以及读取响应
    /// body 的每一次读取，各自从该阶段（或该块）开始时计时，不在阶段之间累计。
    ///
    /// 默认为 `None`，即不限时。
    pub fn timeout(&mut self, dur: Option<Duration>) -> &mut Self {
        self.timeout = dur;
        self
    }

    /// 是否按提交顺序派发请求。
    ///
    /// 开启后，同一个客户端一次只让一个请求占用连接：后提交的请求要等先提交的
    /// 请求的连接归还（响应 body 读完或被丢弃）之后才开始借用连接，通常会直接复用
    /// 同一条连接。
    ///
    /// 随响应头一起完整到达的小 body 不占用连接。较大的响应 body 在读完或丢弃之前
    /// 会阻塞后面的请求，所以不要在读取前一个响应的 body 之前等待后一个请求。
    ///
    /// 默认为 `false`。
    pub fn guarantee_order(&mut self, enabled: bool) -> &mut Self {
        self.guarantee_order = enabled;
        self
    }

    /// 空闲连接在连接池中的最长保留时间，`None` 表示不过期。
    ///
    /// 默认为 90 秒。
    pub fn pool_idle_timeout(&mut self, dur: Option<Duration>) -> &mut Self {
        self.pool_idle_timeout = dur;
        self
    }

    /// 每个端点最多保留的空闲连接数。设为 0 则完全不复用连接。
    ///
    /// 默认不限。
    pub fn pool_max_idle_per_host(&mut self, max: usize) -> &mut Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// 是否为 TCP 连接设置 `TCP_NODELAY`。只对内置的 TCP 连接器生效。
    ///
    /// 默认为 `true`。
    pub fn nodelay(&mut self, enabled: bool) -> &mut Self {
        self.nodelay = enabled;
        self
    }

    /// 响应中最多接受的头部数量，超出时响应解析失败。
    ///
    /// 默认为 100。
    pub fn max_headers(&mut self, max: usize) -> &mut Self {
        self.max_headers = max;
        self
    }

    /// 当前的超时设置。
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// 当前是否按提交顺序派发。
    pub fn get_guarantee_order(&self) -> bool {
        self.guarantee_order
    }

    /// 当前的空闲连接保留时间。
    pub fn get_pool_idle_timeout(&self) -> Option<Duration> {
        self.pool_idle_timeout
    }

    /// 当前每个端点的空闲连接上限。
    pub fn get_pool_max_idle_per_host(&self) -> usize {
        self.pool_max_idle_per_host
    }

    /// 当前的 `TCP_NODELAY` 设置。
    pub fn get_nodelay(&self) -> bool {
        self.nodelay
    }

    /// 当前的头部数量上限。
    pub fn get_max_headers(&self) -> usize {
        self.max_headers
    }

    pub(super) fn pool_config(&self) -> super::pool::Config {
        super::pool::Config {
            idle_timeout: self.pool_idle_timeout,
            max_idle_per_host: self.pool_max_idle_per_host,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.get_timeout(), None);
        assert!(!config.get_guarantee_order());
        assert_eq!(config.get_pool_idle_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.get_pool_max_idle_per_host(), usize::MAX);
        assert!(config.get_nodelay());
        assert_eq!(config.get_max_headers(), 100);
    }

    #[test]
    fn setters_chain() {
        let mut config = Config::new();
        config
            .timeout(Some(Duration::from_millis(250)))
            .pool_max_idle_per_host(0)
            .max_headers(10);
        assert_eq!(config.get_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.get_pool_max_idle_per_host(), 0);
        assert_eq!(config.get_max_headers(), 10);
    }
}
