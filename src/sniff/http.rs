//! HTTP Host header sniffing
//!
//! Minimal hand-written parser: confirm the preface starts with a known
//! HTTP/1.x method, then scan header lines for `Host:` (case-insensitive)
//! and strip any port suffix. Partial prefaces are fine; the header just
//! has to be inside the peeked window.

/// Quick check if data looks like an HTTP request.
///
/// Fast heuristic over known method prefixes; `sniff_http_host` does the
/// actual header scan.
#[must_use]
pub fn looks_like_http(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    matches!(
        &data[..4],
        b"GET " | b"POST" | b"PUT " | b"HEAD" | b"DELE" | b"OPTI" | b"PATC" | b"CONN" | b"TRAC"
    )
}

/// Extract the Host header value from an HTTP/1.x request preface.
///
/// The header match is case-insensitive and a `:port` suffix is stripped.
/// Returns `None` for non-HTTP data or when no Host header is present in the
/// given bytes.
#[must_use]
pub fn sniff_http_host(data: &[u8]) -> Option<String> {
    if !looks_like_http(data) {
        return None;
    }

    // Headers are ASCII; parse lossily so stray bytes in a partial body
    // cannot abort the scan.
    let text = String::from_utf8_lossy(data);

    let mut lines = text.split("\r\n");
    // Request line
    lines.next()?;

    for line in lines {
        if line.is_empty() {
            // Blank line ends the header block
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("host") {
            continue;
        }
        let host = strip_port(value.trim());
        if host.is_empty() {
            return None;
        }
        return Some(host.to_string());
    }

    None
}

/// Strip a port suffix from a Host value.
///
/// Handles `example.com:8080` and bracketed IPv6 `[::1]:8080`.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }

    if let Some(colon) = host.rfind(':') {
        let port = &host[colon + 1..];
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            return &host[..colon];
        }
    }

    host
}
