//! Forwarder accept loop and per-connection relay

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::socket::get_original_dst;
use super::upstream::Upstream;
use crate::client::ApiClient;
use crate::error::ForwarderError;
use crate::io::copy_bidirectional_idle;
use crate::model::MappingView;
use crate::sniff::{mask_host, sniff_host};

/// Preface sniff read deadline
pub const SNIFF_TIMEOUT: Duration = Duration::from_millis(300);

/// Maximum preface bytes peeked before splicing
pub const SNIFF_MAX: usize = 2048;

/// Per-direction splice inactivity deadline
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Select this instance's upstream from the active mapping set.
///
/// The unique mapping whose `local_redirect_port` matches and whose proxy is
/// enabled wins; anything else is a startup failure, and the supervisor's
/// restart policy owns recovery.
///
/// # Errors
///
/// Returns [`ForwarderError::NoMapping`] when no active mapping matches.
pub fn resolve_upstream(
    views: &[MappingView],
    local_port: u16,
) -> Result<Upstream, ForwarderError> {
    views
        .iter()
        .find(|v| v.local_redirect_port == local_port && v.proxy.enabled)
        .map(Upstream::from_view)
        .ok_or(ForwarderError::NoMapping(local_port))
}

/// A bound forwarder instance
#[derive(Debug)]
pub struct Forwarder {
    listener: TcpListener,
    local_addr: SocketAddr,
    upstream: Arc<Upstream>,
}

impl Forwarder {
    /// Resolve the upstream through the control plane and bind the local
    /// redirect port.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::NoMapping`] when the control plane has no
    /// active mapping for this port, [`ForwarderError::Upstream`] when the
    /// control plane is unreachable, and [`ForwarderError::Bind`] when the
    /// port cannot be bound. All are fatal at startup.
    pub async fn bind(addr: SocketAddr, api: &ApiClient) -> Result<Self, ForwarderError> {
        let views = api
            .list_mappings()
            .await
            .map_err(|e| ForwarderError::Upstream(format!("mapping fetch failed: {e}")))?;
        let upstream = resolve_upstream(&views, addr.port())?;

        info!(
            port = addr.port(),
            upstream = %upstream.addr,
            kind = upstream.kind.as_str(),
            "resolved upstream"
        );

        Self::bind_with_upstream(addr, upstream).await
    }

    /// Bind with an already-resolved upstream (tests, tooling).
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::Bind`] when the address cannot be bound.
    pub async fn bind_with_upstream(
        addr: SocketAddr,
        upstream: Upstream,
    ) -> Result<Self, ForwarderError> {
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr().map_err(|e| ForwarderError::Bind {
            addr,
            reason: e.to_string(),
        })?;

        info!(addr = %local_addr, "forwarder listening");

        Ok(Self {
            listener,
            local_addr,
            upstream: Arc::new(upstream),
        })
    }

    /// Actual bound address (differs from the requested one for port 0)
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop: one task per connection. Per-connection failures are
    /// logged and never take down the listener.
    pub async fn run(&self) -> Result<(), ForwarderError> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let upstream = Arc::clone(&self.upstream);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, &upstream).await {
                    if e.is_recoverable() {
                        debug!(peer = %peer, error = %e, "connection ended");
                    } else {
                        warn!(peer = %peer, error = %e, "connection failed");
                    }
                }
            });
        }
    }
}

/// Create the listening socket with `SO_REUSEADDR` so a supervisor restart
/// can rebind the port immediately.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ForwarderError> {
    let bind_err = |e: &dyn std::fmt::Display| ForwarderError::Bind {
        addr,
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| bind_err(&e))?;
    socket.set_reuse_address(true).map_err(|e| bind_err(&e))?;
    socket.set_nonblocking(true).map_err(|e| bind_err(&e))?;
    socket.bind(&addr.into()).map_err(|e| bind_err(&e))?;
    socket.listen(1024).map_err(|e| bind_err(&e))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(|e| bind_err(&e))
}

/// Relay one redirected connection through the upstream.
async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    upstream: &Upstream,
) -> Result<(), ForwarderError> {
    let original_dst = get_original_dst(client.as_raw_fd())?;

    let mut tunnel = upstream.dial(original_dst).await?;

    // Peek the preface for a hostname; whatever was read is replayed
    // verbatim upstream. Sniffing is best-effort and only feeds the log.
    let mut preface = vec![0u8; SNIFF_MAX];
    let peeked = match timeout(SNIFF_TIMEOUT, client.read(&mut preface)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(ForwarderError::Relay(format!("preface read: {e}"))),
        Err(_) => 0,
    };
    preface.truncate(peeked);

    let host = sniff_host(&preface);
    let display_host = host.as_deref().map_or_else(
        || original_dst.ip().to_string(),
        mask_host,
    );
    info!(
        client = %peer.ip(),
        host = %display_host,
        port = original_dst.port(),
        "access"
    );

    if !preface.is_empty() {
        tunnel
            .write_all(&preface)
            .await
            .map_err(|e| ForwarderError::Relay(format!("preface relay: {e}")))?;
    }

    let result = copy_bidirectional_idle(&mut client, &mut tunnel, IDLE_TIMEOUT)
        .await
        .map_err(|e| ForwarderError::Relay(e.to_string()))?;

    debug!(
        client = %peer.ip(),
        tx = result.client_to_upstream,
        rx = result.upstream_to_client,
        "connection closed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Client, Mapping, MappingState, Proxy, ProxyKind, ProxyStatus};

    fn view(port: u16, enabled: bool, kind: ProxyKind) -> MappingView {
        MappingView {
            id: format!("m-{port}"),
            client: Client {
                id: "c1".into(),
                ip_cidr: "192.168.2.3/32".into(),
                note: String::new(),
                enabled: true,
            },
            proxy: Proxy {
                id: format!("p-{port}"),
                label: None,
                kind,
                host: "10.0.0.2".into(),
                port: 3128,
                username: Some("user".into()),
                password: None,
                enabled,
                status: ProxyStatus::Down,
                latency_ms: None,
                exit_ip: None,
                last_checked_at: None,
            },
            state: MappingState::Pending,
            local_redirect_port: port,
        }
    }

    #[test]
    fn test_resolve_matches_port_and_enabled() {
        let views = vec![
            view(15001, true, ProxyKind::Http),
            view(15002, true, ProxyKind::Socks5),
        ];

        let upstream = resolve_upstream(&views, 15002).unwrap();
        assert_eq!(upstream.kind, ProxyKind::Socks5);
        assert_eq!(upstream.addr, "10.0.0.2:3128");
        assert_eq!(upstream.username, "user");
        assert!(upstream.has_credentials());
    }

    #[test]
    fn test_resolve_skips_disabled_proxy() {
        let views = vec![view(15001, false, ProxyKind::Http)];
        assert!(matches!(
            resolve_upstream(&views, 15001),
            Err(ForwarderError::NoMapping(15001))
        ));
    }

    #[test]
    fn test_resolve_missing_port() {
        assert!(matches!(
            resolve_upstream(&[], 15001),
            Err(ForwarderError::NoMapping(15001))
        ));
    }

    #[tokio::test]
    async fn test_bind_with_upstream() {
        let upstream = Upstream {
            kind: ProxyKind::Http,
            addr: "127.0.0.1:1".into(),
            username: String::new(),
            password: String::new(),
        };
        let fwd = Forwarder::bind_with_upstream("127.0.0.1:0".parse().unwrap(), upstream)
            .await
            .unwrap();
        assert_ne!(fwd.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let upstream = Upstream {
            kind: ProxyKind::Http,
            addr: "127.0.0.1:1".into(),
            username: String::new(),
            password: String::new(),
        };
        let first = Forwarder::bind_with_upstream("127.0.0.1:0".parse().unwrap(), upstream.clone())
            .await
            .unwrap();
        let err = Forwarder::bind_with_upstream(first.local_addr(), upstream)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwarderError::Bind { .. }));
        assert!(!err.is_recoverable());
    }
}
