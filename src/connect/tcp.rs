use std::net::{IpAddr, SocketAddr};

use http::uri::Scheme;
use tokio::net::TcpStream;

use super::{Connect, ConnectError, ConnectErrorKind, Connecting, Endpoint, Io};

/// 基于 tokio 的明文 TCP 连接器。
///
/// DNS 解析使用 `tokio::net::lookup_host`，然后依次尝试解析出的每个地址，
/// 返回第一个连接成功的流。只支持 `http` scheme，`https` 端点会以
/// [`ConnectErrorKind::Unsupported`] 失败。
#[derive(Clone, Debug)]
pub struct HttpConnector {
    nodelay: bool,
}

impl HttpConnector {
    /// 创建连接器，默认开启 `TCP_NODELAY`。
    pub fn new() -> HttpConnector {
        HttpConnector { nodelay: true }
    }

    /// 设置新连接是否开启 `TCP_NODELAY`。
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
    }
}

impl Default for HttpConnector {
    fn default() -> HttpConnector {
        HttpConnector::new()
    }
}

impl Connect for HttpConnector {
    fn connect(&self, dst: &Endpoint) -> Connecting {
        let dst = dst.clone();
        let nodelay = self.nodelay;
        Box::pin(async move {
            let stream = connect_tcp(&dst, nodelay).await?;
            Ok(Box::new(stream) as Box<dyn Io>)
        })
    }
}

async fn connect_tcp(dst: &Endpoint, nodelay: bool) -> Result<TcpStream, ConnectError> {
    if *dst.scheme() != Scheme::HTTP {
        return Err(ConnectError::new(ConnectErrorKind::Unsupported)
            .with(format!("scheme `{}` requires a custom connector", dst.scheme())));
    }

    let addrs = resolve(dst).await?;

    let mut last_err = None;
    for addr in addrs {
        trace!("connecting to {}", addr);
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if nodelay {
                    stream.set_nodelay(true).map_err(ConnectError::from_io)?;
                }
                debug!("connected to {}", addr);
                return Ok(stream);
            }
            Err(err) => {
                trace!("connect error for {}: {:?}", addr, err);
                last_err = Some(err);
            }
        }
    }

    Err(match last_err {
        Some(err) => ConnectError::from_io(err),
        None => ConnectError::new(ConnectErrorKind::Resolve).with("no addresses resolved"),
    })
}

async fn resolve(dst: &Endpoint) -> Result<Vec<SocketAddr>, ConnectError> {
    let host = dst.host().trim_start_matches('[').trim_end_matches(']');

    // IP 字面量不需要经过 DNS
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, dst.port())]);
    }

    debug!("resolving host={:?}", host);
    let addrs = tokio::net::lookup_host((host, dst.port()))
        .await
        .map_err(|err| ConnectError::new(ConnectErrorKind::Resolve).with(err))?;
    Ok(addrs.collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn https_is_unsupported() {
        let dst = Endpoint::new(Scheme::HTTPS, "127.0.0.1", 443);
        let err = match HttpConnector::new().connect(&dst).await {
            Ok(_) => panic!("https should not connect"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ConnectErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn refused_when_nothing_listens() {
        // 绑定后立即释放，拿到一个当前没有进程监听的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dst = Endpoint::new(Scheme::HTTP, "127.0.0.1", port);
        let err = match HttpConnector::new().connect(&dst).await {
            Ok(_) => panic!("nothing should be listening"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ConnectErrorKind::Refused);
    }

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dst = Endpoint::new(Scheme::HTTP, "127.0.0.1", port);
        let (accepted, connected) = tokio::join!(listener.accept(), HttpConnector::new().connect(&dst));
        assert!(accepted.is_ok());
        assert!(connected.is_ok());
    }
}
