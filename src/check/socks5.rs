//! SOCKS5 proxy health probe (RFC 1928, RFC 1929)
//!
//! Hand-rolled handshake: greeting, optional username/password
//! sub-negotiation, CONNECT to an IP-echo host by domain name, then a plain
//! HTTP/1.1 GET over the tunnel. The user/pass method is advertised iff
//! either credential is non-empty.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::{classify_latency, CheckResult, ENDPOINTS};
use crate::error::CheckError;
use crate::fwd::socks5_proto::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_METHOD_NONE, AUTH_METHOD_NO_ACCEPTABLE,
    AUTH_METHOD_PASSWORD, AUTH_PASSWORD_VERSION, CMD_CONNECT, REPLY_SUCCEEDED, SOCKS5_VERSION,
};
use crate::model::Proxy;

/// Probe a SOCKS5 proxy.
///
/// # Errors
///
/// Returns [`CheckError::AllEndpointsFailed`] when every echo endpoint
/// failed, or [`CheckError::Timeout`] when the whole probe overran.
pub async fn check_socks5(proxy: &Proxy, deadline: Duration) -> Result<CheckResult, CheckError> {
    timeout(deadline, check_socks5_inner(proxy))
        .await
        .map_err(|_| CheckError::Timeout)?
}

async fn check_socks5_inner(proxy: &Proxy) -> Result<CheckResult, CheckError> {
    let username = proxy.username.clone().unwrap_or_default();
    let password = proxy.password.clone().unwrap_or_default();

    let mut last_err = String::new();
    for (host, path) in ENDPOINTS {
        let start = Instant::now();
        match probe_one(proxy, &username, &password, host, path).await {
            Ok(exit_ip) => {
                let elapsed = start.elapsed();
                return Ok(CheckResult {
                    status: classify_latency(elapsed),
                    latency_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    exit_ip,
                });
            }
            Err(e) => {
                trace!(%host, error = %e, "socks5 probe endpoint failed");
                last_err = e.to_string();
            }
        }
    }
    Err(CheckError::AllEndpointsFailed(last_err))
}

async fn probe_one(
    proxy: &Proxy,
    username: &str,
    password: &str,
    host: &str,
    path: &str,
) -> Result<String, CheckError> {
    let addr = proxy.addr();
    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| CheckError::Connect {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

    // Greeting: advertise user/pass iff either credential is non-empty
    let advertise_auth = !username.is_empty() || !password.is_empty();
    let greeting: &[u8] = if advertise_auth {
        &[SOCKS5_VERSION, 2, AUTH_METHOD_NONE, AUTH_METHOD_PASSWORD]
    } else {
        &[SOCKS5_VERSION, 1, AUTH_METHOD_NONE]
    };
    stream
        .write_all(greeting)
        .await
        .map_err(|e| CheckError::Protocol(format!("write greeting: {e}")))?;

    let mut sel = [0u8; 2];
    stream
        .read_exact(&mut sel)
        .await
        .map_err(|e| CheckError::Protocol(format!("read method selection: {e}")))?;
    if sel[0] != SOCKS5_VERSION {
        return Err(CheckError::Protocol(format!("bad version {:#04x}", sel[0])));
    }
    match sel[1] {
        AUTH_METHOD_NONE => {}
        AUTH_METHOD_PASSWORD => {
            if username.len() > 255 || password.len() > 255 {
                return Err(CheckError::Protocol("credential too long".into()));
            }
            let mut auth = Vec::with_capacity(3 + username.len() + password.len());
            auth.push(AUTH_PASSWORD_VERSION);
            auth.push(username.len() as u8);
            auth.extend_from_slice(username.as_bytes());
            auth.push(password.len() as u8);
            auth.extend_from_slice(password.as_bytes());
            stream
                .write_all(&auth)
                .await
                .map_err(|e| CheckError::Protocol(format!("write auth: {e}")))?;

            let mut reply = [0u8; 2];
            stream
                .read_exact(&mut reply)
                .await
                .map_err(|e| CheckError::Protocol(format!("read auth reply: {e}")))?;
            if reply[1] != 0x00 {
                return Err(CheckError::AuthFailed);
            }
        }
        AUTH_METHOD_NO_ACCEPTABLE => {
            return Err(CheckError::Protocol("no acceptable auth method".into()))
        }
        other => {
            return Err(CheckError::Protocol(format!(
                "unsupported auth method {other:#04x}"
            )))
        }
    }

    // CONNECT to the echo host by domain (ATYP 0x03), port 80
    let dom = host.as_bytes();
    if dom.len() > 255 {
        return Err(CheckError::Protocol("host too long".into()));
    }
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, dom.len() as u8];
    request.extend_from_slice(dom);
    request.extend_from_slice(&80u16.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| CheckError::Protocol(format!("write connect: {e}")))?;

    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| CheckError::Protocol(format!("read connect reply: {e}")))?;
    if header[1] != REPLY_SUCCEEDED {
        return Err(CheckError::Protocol(format!(
            "connect REP={:#04x}",
            header[1]
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
                .map_err(|e| CheckError::Protocol(format!("read bound domain len: {e}")))?;
            usize::from(len[0]) + 2
        }
        other => return Err(CheckError::Protocol(format!("bad ATYP {other:#04x}"))),
    };
    let mut bound = vec![0u8; bound_len];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| CheckError::Protocol(format!("read bound address: {e}")))?;

    // Plain HTTP GET through the tunnel
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: pgw-health/1.0\r\nConnection: close\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| CheckError::Protocol(format!("write request: {e}")))?;

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    read_line(&mut reader, &mut status_line).await?;
    if !status_line.contains("200") {
        return Err(CheckError::Protocol(format!(
            "non-200: {}",
            status_line.trim()
        )));
    }

    // Drain headers to the blank line
    loop {
        let mut line = String::new();
        read_line(&mut reader, &mut line).await?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
    }

    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .await
        .map_err(|e| CheckError::Protocol(format!("read body: {e}")))?;

    Ok(String::from_utf8_lossy(&body).trim().to_string())
}

async fn read_line(
    reader: &mut BufReader<TcpStream>,
    line: &mut String,
) -> Result<(), CheckError> {
    use tokio::io::AsyncBufReadExt;
    reader
        .read_line(line)
        .await
        .map_err(|e| CheckError::Protocol(format!("read line: {e}")))?;
    Ok(())
}
