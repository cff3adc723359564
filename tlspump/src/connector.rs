//! Blocking TCP connection establishment.
//!
//! Resolution goes through the system resolver; the socket itself is created
//! and connected with raw `socket(2)`/`connect(2)` so that socket creation
//! failures and connection failures stay distinguishable.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::Error;

/// Resolve `hostname` and connect to the first address that accepts.
///
/// Addresses are tried in resolver order. A socket that fails to connect is
/// closed before the next address is tried. When every address fails, the
/// error from the last one is returned.
pub fn connect(hostname: &str, port: u16, tcp_nodelay: bool) -> Result<Connection, Error> {
    let addrs = (hostname, port)
        .to_socket_addrs()
        .map_err(|source| Error::Resolution {
            host: hostname.to_string(),
            source,
        })?;

    let mut last_err = None;
    for addr in addrs {
        debug!(%addr, "connecting");
        match connect_addr(addr) {
            Ok(fd) => {
                let stream = TcpStream::from(fd);
                if tcp_nodelay {
                    stream.set_nodelay(true).map_err(Error::Socket)?;
                }
                return Ok(Connection::new(stream, addr));
            }
            Err(e @ Error::Socket(_)) => return Err(e),
            Err(e) => {
                warn!(%addr, error = %e, "connect failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Resolution {
        host: hostname.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
    }))
}

fn connect_addr(addr: SocketAddr) -> Result<OwnedFd, Error> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let raw = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if raw < 0 {
        return Err(Error::Socket(io::Error::last_os_error()));
    }
    // Safety: `raw` was just returned by socket(2) and has no other owner.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = socket_addr_to_sockaddr(addr, &mut storage);
    let ret = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &storage as *const _ as *const libc::sockaddr,
            len,
        )
    };
    if ret == 0 {
        return Ok(fd);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EINTR) {
        return Err(Error::Connect { addr, source: err });
    }
    // An interrupted connect keeps going in the background.
    finish_interrupted_connect(&fd).map_err(|source| Error::Connect { addr, source })?;
    Ok(fd)
}

/// Wait for an interrupted `connect(2)` to settle and report its result.
fn finish_interrupted_connect(fd: &OwnedFd) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLOUT,
        revents: 0,
    };
    loop {
        let n = unsafe { libc::poll(&mut pfd, 1, -1) };
        if n >= 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }

    let mut so_error: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut so_error as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if so_error != 0 {
        return Err(io::Error::from_raw_os_error(so_error));
    }
    Ok(())
}

/// Write a SocketAddr into a sockaddr_storage, return the address length.
fn socket_addr_to_sockaddr(addr: SocketAddr, storage: &mut libc::sockaddr_storage) -> libc::socklen_t {
    match addr {
        SocketAddr::V4(v4) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sa).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sa).sin_port = v4.port().to_be();
                (*sa).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sa).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sa).sin6_port = v6.port().to_be();
                (*sa).sin6_flowinfo = v6.flowinfo();
                (*sa).sin6_addr.s6_addr = v6.ip().octets();
                (*sa).sin6_scope_id = v6.scope_id();
            }
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}
