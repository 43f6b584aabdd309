//! Original-destination recovery
//!
//! When the NAT prerouting chain redirects a connection to a local port, the
//! kernel records the pre-NAT destination on the socket. `SO_ORIGINAL_DST`
//! is the one source of truth for the tunnel's remote endpoint, never the
//! client's Host header or SNI. Linux IPv4 only.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::RawFd;

use crate::error::ForwarderError;

/// Linux kernel constant: `SO_ORIGINAL_DST` (`SOL_IP` level)
/// Used with getsockopt to retrieve the pre-NAT destination address
/// from a redirected TCP connection.
pub const SO_ORIGINAL_DST: libc::c_int = 80;

/// Get the original destination address from a redirected TCP connection.
///
/// # Arguments
///
/// * `fd` - Raw file descriptor of the accepted TCP connection
///
/// # Errors
///
/// Returns `ForwarderError::OriginalDst` if:
/// - The socket was not redirected (ENOPROTOOPT)
/// - getsockopt fails for any other reason
pub fn get_original_dst(fd: RawFd) -> Result<SocketAddr, ForwarderError> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len: libc::socklen_t = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            std::ptr::addr_of_mut!(addr).cast::<libc::c_void>(),
            &raw mut len,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOPROTOOPT) {
            return Err(ForwarderError::OriginalDst(
                "SO_ORIGINAL_DST not available - not a redirected connection?".into(),
            ));
        }
        return Err(ForwarderError::OriginalDst(format!(
            "getsockopt SO_ORIGINAL_DST failed: {err}"
        )));
    }

    let port = u16::from_be(addr.sin_port);
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));

    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}
