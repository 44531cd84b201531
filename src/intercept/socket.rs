//! Socket utilities for intercepted connections
//!
//! - listener socket creation through `socket2`
//! - `SO_ORIGINAL_DST` lookup of the pre-NAT destination

use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::InterceptError;

/// Linux kernel constant: `SO_ORIGINAL_DST` (`SOL_IP` level)
///
/// Returns the conntrack entry's original destination as a `sockaddr_in`.
pub const SO_ORIGINAL_DST: libc::c_int = 80;

/// Create a non-blocking TCP listening socket for `addr`.
///
/// `SO_REUSEADDR` is set so a restarted proxy can rebind while old
/// connections sit in `TIME_WAIT`.
///
/// # Errors
///
/// Returns `InterceptError` if socket creation, option setting or binding fails.
pub fn create_listener_socket(addr: SocketAddr, backlog: u32) -> Result<Socket, InterceptError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| InterceptError::SocketCreation(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| InterceptError::socket_option("SO_REUSEADDR", e.to_string()))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| InterceptError::socket_option("O_NONBLOCK", e.to_string()))?;

    socket
        .bind(&addr.into())
        .map_err(|e| InterceptError::bind(addr, e.to_string()))?;

    socket
        .listen(i32::try_from(backlog).unwrap_or(i32::MAX))
        .map_err(|e| InterceptError::socket_option("listen", e.to_string()))?;

    debug!("Created listening socket on {} (backlog={})", addr, backlog);
    Ok(socket)
}

/// Get the original (pre-redirect) destination of an accepted TCP connection.
///
/// The port is decoded from the network-order `sin_port` field.
///
/// # Errors
///
/// Returns `InterceptError::OriginalDstError` if:
/// - The connection did not pass through a NAT rule (`ENOENT`)
/// - The socket does not support the query (`ENOPROTOOPT`)
/// - getsockopt fails for any other reason
#[cfg(target_os = "linux")]
pub fn get_original_dst(fd: RawFd) -> Result<SocketAddr, InterceptError> {
    use std::io;
    use std::mem;
    use std::net::{Ipv4Addr, SocketAddrV4};

    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    // SAFETY: `addr` and `len` are valid for writes and `len` matches the
    // buffer size; the kernel never writes more than `len` bytes.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            std::ptr::addr_of_mut!(addr).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::ENOENT) => InterceptError::OriginalDstError(
                "no NAT entry for socket - connection was not redirected".into(),
            ),
            Some(libc::ENOPROTOOPT) => InterceptError::OriginalDstError(
                "SO_ORIGINAL_DST not supported on this socket".into(),
            ),
            _ => InterceptError::OriginalDstError(format!(
                "getsockopt SO_ORIGINAL_DST failed: {err}"
            )),
        });
    }

    let port = u16::from_be(addr.sin_port);
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));

    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// NAT-table lookups only exist on Linux.
#[cfg(not(target_os = "linux"))]
pub fn get_original_dst(_fd: RawFd) -> Result<SocketAddr, InterceptError> {
    Err(InterceptError::OriginalDstError(
        "SO_ORIGINAL_DST is only available on Linux".into(),
    ))
}
