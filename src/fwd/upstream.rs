//! Upstream tunnel establishment
//!
//! One resolved upstream per forwarder instance, captured at startup.
//! `dial` opens a TCP connection to the proxy and negotiates a tunnel to the
//! recovered original destination, via HTTP CONNECT or SOCKS5 CONNECT. The
//! target is always the pre-NAT address; sniffed hostnames never steer the
//! tunnel.

use std::net::SocketAddr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::socks5_proto::{
    reply_message, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_METHOD_NONE,
    AUTH_METHOD_NO_ACCEPTABLE, AUTH_METHOD_PASSWORD, AUTH_PASSWORD_VERSION, CMD_CONNECT,
    REPLY_SUCCEEDED, SOCKS5_VERSION,
};
use crate::error::ForwarderError;
use crate::model::{MappingView, ProxyKind};

/// Deadline for the TCP connect plus tunnel negotiation
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum bytes of CONNECT response headers we are willing to drain
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// The upstream a forwarder instance tunnels through
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Proxy protocol
    pub kind: ProxyKind,
    /// Proxy `host:port`
    pub addr: String,
    /// Username (empty when unauthenticated)
    pub username: String,
    /// Password (empty when unauthenticated)
    pub password: String,
}

impl Upstream {
    /// Build the upstream from a mapping view's inlined proxy record
    #[must_use]
    pub fn from_view(view: &MappingView) -> Self {
        Self {
            kind: view.proxy.kind,
            addr: view.proxy.addr(),
            username: view.proxy.username.clone().unwrap_or_default(),
            password: view.proxy.password.clone().unwrap_or_default(),
        }
    }

    /// Whether credentials should be presented to the upstream
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }

    /// Open a tunnel to `original_dst` through this upstream.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::Upstream`] for dial/handshake failures and
    /// [`ForwarderError::Refused`] when the proxy rejects the target.
    pub async fn dial(&self, original_dst: SocketAddr) -> Result<TcpStream, ForwarderError> {
        timeout(DIAL_TIMEOUT, self.dial_inner(original_dst))
            .await
            .map_err(|_| ForwarderError::Upstream(format!("dial {} timed out", self.addr)))?
    }

    async fn dial_inner(&self, original_dst: SocketAddr) -> Result<TcpStream, ForwarderError> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            ForwarderError::Upstream(format!("connect {} failed: {e}", self.addr))
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            trace!("set_nodelay failed: {}", e);
        }

        match self.kind {
            ProxyKind::Http => self.http_connect(stream, original_dst).await,
            ProxyKind::Socks5 => self.socks5_connect(stream, original_dst).await,
        }
    }

    /// HTTP CONNECT handshake: request, 200 status line, drain headers.
    async fn http_connect(
        &self,
        mut stream: TcpStream,
        original_dst: SocketAddr,
    ) -> Result<TcpStream, ForwarderError> {
        let mut request = format!(
            "CONNECT {original_dst} HTTP/1.1\r\nHost: {original_dst}\r\n"
        );
        if self.has_credentials() {
            let credentials = BASE64.encode(format!("{}:{}", self.username, self.password));
            request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
        }
        request.push_str("\r\n");

        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| ForwarderError::Upstream(format!("write CONNECT: {e}")))?;

        // Read the response headers up to the blank line; nothing after it
        // belongs to the proxy, so the read must not overshoot.
        let mut response = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            if response.len() >= MAX_CONNECT_RESPONSE {
                return Err(ForwarderError::Upstream(
                    "CONNECT response headers too large".into(),
                ));
            }
            let n = stream
                .read(&mut byte)
                .await
                .map_err(|e| ForwarderError::Upstream(format!("read CONNECT response: {e}")))?;
            if n == 0 {
                return Err(ForwarderError::Upstream(
                    "upstream closed during CONNECT".into(),
                ));
            }
            response.push(byte[0]);
        }

        let text = String::from_utf8_lossy(&response);
        let status_line = text.lines().next().unwrap_or_default();
        let mut parts = status_line.split_whitespace();
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();

        if !version.starts_with("HTTP/1.") || code != "200" {
            return Err(ForwarderError::Refused(format!(
                "CONNECT answered {}",
                status_line.trim()
            )));
        }

        debug!(upstream = %self.addr, target = %original_dst, "HTTP tunnel established");
        Ok(stream)
    }

    /// SOCKS5 handshake (RFC 1928) with optional username/password
    /// sub-negotiation (RFC 1929), then CONNECT with ATYP=IPv4.
    async fn socks5_connect(
        &self,
        mut stream: TcpStream,
        original_dst: SocketAddr,
    ) -> Result<TcpStream, ForwarderError> {
        let SocketAddr::V4(dst) = original_dst else {
            return Err(ForwarderError::Upstream(
                "SOCKS5 tunnel requires an IPv4 original destination".into(),
            ));
        };

        // Method selection
        let greeting: &[u8] = if self.has_credentials() {
            &[SOCKS5_VERSION, 2, AUTH_METHOD_NONE, AUTH_METHOD_PASSWORD]
        } else {
            &[SOCKS5_VERSION, 1, AUTH_METHOD_NONE]
        };
        stream
            .write_all(greeting)
            .await
            .map_err(|e| ForwarderError::Upstream(format!("write greeting: {e}")))?;

        let mut selection = [0u8; 2];
        stream
            .read_exact(&mut selection)
            .await
            .map_err(|e| ForwarderError::Upstream(format!("read method selection: {e}")))?;
        if selection[0] != SOCKS5_VERSION {
            return Err(ForwarderError::Upstream(format!(
                "bad SOCKS version {:#04x}",
                selection[0]
            )));
        }
        match selection[1] {
            AUTH_METHOD_NONE => {}
            AUTH_METHOD_PASSWORD => self.socks5_authenticate(&mut stream).await?,
            AUTH_METHOD_NO_ACCEPTABLE => {
                return Err(ForwarderError::Refused(
                    "no acceptable authentication method".into(),
                ))
            }
            other => {
                return Err(ForwarderError::Upstream(format!(
                    "unsupported auth method {other:#04x}"
                )))
            }
        }

        // CONNECT request: VER CMD RSV ATYP DST.ADDR DST.PORT
        let mut request = Vec::with_capacity(10);
        request.push(SOCKS5_VERSION);
        request.push(CMD_CONNECT);
        request.push(0x00);
        request.push(ATYP_IPV4);
        request.extend_from_slice(&dst.ip().octets());
        request.extend_from_slice(&dst.port().to_be_bytes());
        stream
            .write_all(&request)
            .await
            .map_err(|e| ForwarderError::Upstream(format!("write CONNECT: {e}")))?;

        // Reply: VER REP RSV ATYP BND.ADDR BND.PORT
        let mut header = [0u8; 4];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| ForwarderError::Upstream(format!("read CONNECT reply: {e}")))?;
        if header[1] != REPLY_SUCCEEDED {
            return Err(ForwarderError::Refused(format!(
                "SOCKS5 REP={:#04x}: {}",
                header[1],
                reply_message(header[1])
            )));
        }

        // Consume the bound address for whichever ATYP the server chose
        let bound_len = match header[3] {
            ATYP_IPV4 => 4 + 2,
            ATYP_IPV6 => 16 + 2,
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream
                    .read_exact(&mut len)
                    .await
                    .map_err(|e| ForwarderError::Upstream(format!("read bound len: {e}")))?;
                usize::from(len[0]) + 2
            }
            other => {
                return Err(ForwarderError::Upstream(format!(
                    "bad bound ATYP {other:#04x}"
                )))
            }
        };
        let mut bound = vec![0u8; bound_len];
        stream
            .read_exact(&mut bound)
            .await
            .map_err(|e| ForwarderError::Upstream(format!("read bound address: {e}")))?;

        debug!(upstream = %self.addr, target = %original_dst, "SOCKS5 tunnel established");
        Ok(stream)
    }

    async fn socks5_authenticate(&self, stream: &mut TcpStream) -> Result<(), ForwarderError> {
        if self.username.len() > 255 || self.password.len() > 255 {
            return Err(ForwarderError::Upstream(
                "credential too long (max 255)".into(),
            ));
        }

        let mut auth = Vec::with_capacity(3 + self.username.len() + self.password.len());
        auth.push(AUTH_PASSWORD_VERSION);
        auth.push(self.username.len() as u8);
        auth.extend_from_slice(self.username.as_bytes());
        auth.push(self.password.len() as u8);
        auth.extend_from_slice(self.password.as_bytes());

        stream
            .write_all(&auth)
            .await
            .map_err(|e| ForwarderError::Upstream(format!("write auth: {e}")))?;

        let mut reply = [0u8; 2];
        stream
            .read_exact(&mut reply)
            .await
            .map_err(|e| ForwarderError::Upstream(format!("read auth reply: {e}")))?;
        if reply[0] != AUTH_PASSWORD_VERSION {
            return Err(ForwarderError::Upstream(format!(
                "bad auth version {:#04x}",
                reply[0]
            )));
        }
        if reply[1] != 0x00 {
            return Err(ForwarderError::Refused("SOCKS5 authentication failed".into()));
        }
        Ok(())
    }
}
