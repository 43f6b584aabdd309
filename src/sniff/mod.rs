//! Protocol sniffing (HTTP Host, TLS SNI)
//!
//! The forwarder peeks at the first bytes of a redirected connection to name
//! the destination for access logs. Sniffing is advisory only: the tunnel
//! target is always the recovered original destination, never the sniffed
//! name, so a spoofed Host header cannot steer traffic.

pub mod http;
pub mod tls;

pub use http::sniff_http_host;
pub use tls::sniff_tls_sni;

/// Extract a hostname from a connection preface.
///
/// Tries HTTP Host parsing first, then TLS `ClientHello` SNI. Returns `None`
/// when neither protocol is recognised; that is not an error.
#[must_use]
pub fn sniff_host(data: &[u8]) -> Option<String> {
    sniff_http_host(data).or_else(|| sniff_tls_sni(data))
}

/// Mask a hostname for access logs.
///
/// Each DNS label keeps its first and last character with the middle replaced
/// by `*`; one- and two-character labels are left as-is. Raw IP addresses are
/// not masked.
///
/// `secure.example.com` → `s****e.e*****e.c*m`
#[must_use]
pub fn mask_host(host: &str) -> String {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }

    host.split('.')
        .map(|label| {
            let chars: Vec<char> = label.chars().collect();
            if chars.len() <= 2 {
                label.to_string()
            } else {
                let mut masked = String::with_capacity(chars.len());
                masked.push(chars[0]);
                masked.extend(std::iter::repeat('*').take(chars.len() - 2));
                masked.push(chars[chars.len() - 1]);
                masked
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
