//! Readiness multiplexer for the single socket of a fetch attempt.
//!
//! A multiplexer watches exactly one descriptor. [`Multiplexer::wait`] blocks
//! the calling thread, with no timeout, until the descriptor is ready for at
//! least one of the requested directions.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::config::Backend;
use crate::error::Error;

/// Directions the caller wants to be woken for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

/// Directions the descriptor is ready for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    /// Map a `poll(2)`/`epoll(7)` event mask. Hang-up counts as readable so
    /// that the following read observes EOF; errors count as both.
    fn from_events(events: u32) -> Self {
        let err = events & libc::EPOLLERR as u32 != 0;
        let hup = events & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0;
        Readiness {
            readable: events & libc::EPOLLIN as u32 != 0 || hup || err,
            writable: events & libc::EPOLLOUT as u32 != 0 || err,
        }
    }
}

/// Blocks until a registered descriptor becomes ready.
pub trait Multiplexer {
    /// Wait for the descriptor to become ready for `interest`.
    fn wait(&mut self, interest: Interest) -> Result<Readiness, Error>;
}

impl<M: Multiplexer + ?Sized> Multiplexer for Box<M> {
    fn wait(&mut self, interest: Interest) -> Result<Readiness, Error> {
        (**self).wait(interest)
    }
}

/// Open a multiplexer for `fd` using `backend`.
///
/// The descriptor must outlive the returned multiplexer.
pub fn open(backend: Backend, fd: RawFd) -> Result<Box<dyn Multiplexer>, Error> {
    match backend {
        Backend::Epoll => Ok(Box::new(EpollPoller::new(fd)?)),
        #[cfg(feature = "uring")]
        Backend::Uring => Ok(Box::new(uring::UringPoller::new(fd)?)),
        #[cfg(not(feature = "uring"))]
        Backend::Uring => Err(Error::Config(
            "uring backend requires the `uring` feature".into(),
        )),
    }
}

/// Event mask for `interest`. Peer half-close is only watched alongside
/// reads: level-triggered, it would otherwise fire on every write-only wait.
fn epoll_events(interest: Interest) -> u32 {
    let mut events = 0;
    if interest.read {
        events |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
    }
    if interest.write {
        events |= libc::EPOLLOUT as u32;
    }
    events
}

// ── epoll ───────────────────────────────────────────────────────────────

/// Level-triggered epoll instance with a single event slot.
pub struct EpollPoller {
    epfd: OwnedFd,
    fd: RawFd,
    registered: Option<Interest>,
}

impl EpollPoller {
    /// Create an epoll instance for `fd`. Registration happens on the first
    /// wait, once the interest is known.
    pub fn new(fd: RawFd) -> Result<Self, Error> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(Error::Poll(io::Error::last_os_error()));
        }
        // Safety: `raw` is a fresh descriptor returned by epoll_create1.
        let epfd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(EpollPoller {
            epfd,
            fd,
            registered: None,
        })
    }

    fn arm(&mut self, interest: Interest) -> Result<(), Error> {
        let op = match self.registered {
            Some(current) if current == interest => return Ok(()),
            Some(_) => libc::EPOLL_CTL_MOD,
            None => libc::EPOLL_CTL_ADD,
        };
        let mut ev = libc::epoll_event {
            events: epoll_events(interest),
            u64: self.fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, self.fd, &mut ev) };
        if ret < 0 {
            return Err(Error::Poll(io::Error::last_os_error()));
        }
        self.registered = Some(interest);
        Ok(())
    }
}

impl Multiplexer for EpollPoller {
    fn wait(&mut self, interest: Interest) -> Result<Readiness, Error> {
        self.arm(interest)?;
        let mut events = [libc::epoll_event { events: 0, u64: 0 }];
        loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.len() as libc::c_int,
                    -1,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Poll(err));
            }
            if n == 0 {
                continue;
            }
            return Ok(Readiness::from_events(events[0].events));
        }
    }
}

// ── io_uring ────────────────────────────────────────────────────────────

#[cfg(feature = "uring")]
mod uring {
    use std::io;
    use std::os::fd::RawFd;

    use io_uring::{IoUring, opcode, types};

    use super::{Interest, Multiplexer, Readiness, epoll_events};
    use crate::error::Error;

    const POLL_USER_DATA: u64 = 0x706f_6c6c;

    /// One-shot `PollAdd` on a small io_uring instance.
    pub struct UringPoller {
        ring: IoUring,
        fd: RawFd,
    }

    impl UringPoller {
        pub fn new(fd: RawFd) -> Result<Self, Error> {
            let ring = IoUring::new(4).map_err(Error::Poll)?;
            Ok(UringPoller { ring, fd })
        }
    }

    impl Multiplexer for UringPoller {
        fn wait(&mut self, interest: Interest) -> Result<Readiness, Error> {
            // POLLIN/POLLOUT/POLLRDHUP share their values with the EPOLL* bits.
            let sqe = opcode::PollAdd::new(types::Fd(self.fd), epoll_events(interest))
                .build()
                .user_data(POLL_USER_DATA);
            // Safety: the poll SQE references no user memory.
            unsafe {
                self.ring
                    .submission()
                    .push(&sqe)
                    .map_err(|_| Error::Poll(io::Error::other("submission queue full")))?;
            }

            loop {
                match self.ring.submit_and_wait(1) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::Poll(e)),
                }
                let Some(cqe) = self.ring.completion().next() else {
                    continue;
                };
                debug_assert_eq!(cqe.user_data(), POLL_USER_DATA);
                let res = cqe.result();
                if res < 0 {
                    return Err(Error::Poll(io::Error::from_raw_os_error(-res)));
                }
                return Ok(Readiness::from_events(res as u32));
            }
        }
    }
}

#[cfg(feature = "uring")]
pub use uring::UringPoller;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn fresh_socket_is_writable() {
        let (client, _server) = pair();
        let mut poller = EpollPoller::new(client.as_raw_fd()).unwrap();
        let ready = poller.wait(Interest::WRITE).unwrap();
        assert!(ready.writable);
        assert!(!ready.readable);
    }

    #[test]
    fn readable_after_peer_writes() {
        let (client, mut server) = pair();
        let mut poller = EpollPoller::new(client.as_raw_fd()).unwrap();
        server.write_all(b"hello").unwrap();
        let ready = poller.wait(Interest::READ).unwrap();
        assert!(ready.readable);
        // Interest narrowed to read: writability is not reported.
        assert!(!ready.writable);
    }

    #[test]
    fn interest_change_rearms() {
        let (client, mut server) = pair();
        let mut poller = EpollPoller::new(client.as_raw_fd()).unwrap();
        assert!(poller.wait(Interest::WRITE).unwrap().writable);
        server.write_all(b"x").unwrap();
        let ready = poller.wait(Interest::BOTH).unwrap();
        assert!(ready.readable && ready.writable);
    }

    #[test]
    fn peer_close_reports_readable() {
        let (client, server) = pair();
        let mut poller = EpollPoller::new(client.as_raw_fd()).unwrap();
        drop(server);
        assert!(poller.wait(Interest::READ).unwrap().readable);
    }

    #[test]
    fn half_close_does_not_wake_write_only_interest() {
        let (client, server) = pair();
        let mut poller = EpollPoller::new(client.as_raw_fd()).unwrap();
        server.shutdown(std::net::Shutdown::Write).unwrap();

        let ready = poller.wait(Interest::WRITE).unwrap();
        assert!(ready.writable);
        assert!(!ready.readable);

        // Once reads are wanted again the FIN is reported.
        assert!(poller.wait(Interest::READ).unwrap().readable);
    }

    #[test]
    fn rdhup_only_registered_with_read() {
        let rdhup = libc::EPOLLRDHUP as u32;
        assert_eq!(epoll_events(Interest::WRITE) & rdhup, 0);
        assert_ne!(epoll_events(Interest::READ) & rdhup, 0);
        assert_ne!(epoll_events(Interest::BOTH) & rdhup, 0);
    }

    #[test]
    fn bad_descriptor_is_poll_error() {
        let mut poller = EpollPoller::new(-1).unwrap();
        assert!(matches!(poller.wait(Interest::READ), Err(Error::Poll(_))));
    }

    #[test]
    fn event_mask_mapping() {
        let r = Readiness::from_events(libc::EPOLLHUP as u32);
        assert!(r.readable && !r.writable);
        let r = Readiness::from_events(libc::EPOLLERR as u32);
        assert!(r.readable && r.writable);
        let r = Readiness::from_events(libc::EPOLLOUT as u32);
        assert!(!r.readable && r.writable);
    }

    #[cfg(not(feature = "uring"))]
    #[test]
    fn uring_backend_needs_feature() {
        assert!(matches!(open(Backend::Uring, 0), Err(Error::Config(_))));
    }

    #[cfg(feature = "uring")]
    #[test]
    fn uring_readable_after_peer_writes() {
        let (client, mut server) = pair();
        // io_uring may be disabled by the sandbox; nothing to test then.
        let Ok(mut poller) = UringPoller::new(client.as_raw_fd()) else {
            return;
        };
        server.write_all(b"hello").unwrap();
        let ready = poller.wait(Interest::READ).unwrap();
        assert!(ready.readable);
    }
}
