use std::io::{self, IoSlice};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use libc::{c_int, c_void, socklen_t};

use crate::error::EtudeResult;

// ---- Socket Operations ----

/// Create a non-blocking TCP listening socket bound to `addr`.
pub fn create_listen_socket(addr: &SocketAddr, backlog: i32) -> EtudeResult<OwnedFd> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    unsafe {
        // 1. Atomic non-blocking, close-on-exec socket
        let raw = libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        );
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // Owned from here on: every early return closes it.
        let fd = OwnedFd::from_raw_fd(raw);

        // 2. SO_REUSEADDR so restarts do not trip over TIME_WAIT
        set_flag(raw, libc::SOL_SOCKET, libc::SO_REUSEADDR)?;

        // 3. TCP_NODELAY on listener, inherited by accepted sockets
        set_flag(raw, libc::IPPROTO_TCP, libc::TCP_NODELAY)?;

        // 4. Bind
        bind_addr(raw, addr)?;

        // 5. Listen
        if libc::listen(raw, backlog) < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(fd)
    }
}

fn set_flag(fd: c_int, level: c_int, name: c_int) -> io::Result<()> {
    let one: c_int = 1;
    let res = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_addr(fd: c_int, addr: &SocketAddr) -> io::Result<()> {
    let res = unsafe {
        match addr {
            SocketAddr::V4(a) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: a.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(a.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                libc::bind(
                    fd,
                    &sin as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin) as socklen_t,
                )
            }
            SocketAddr::V6(a) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: a.port().to_be(),
                    sin6_flowinfo: a.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: a.ip().octets(),
                    },
                    sin6_scope_id: a.scope_id(),
                };
                libc::bind(
                    fd,
                    &sin6 as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin6) as socklen_t,
                )
            }
        }
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn socket_addr_from_storage(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            // SAFETY: ss_family says the storage holds a sockaddr_in.
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // SAFETY: ss_family says the storage holds a sockaddr_in6.
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

/// The address a socket is bound to.
pub fn local_addr(fd: RawFd) -> EtudeResult<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of_val(&storage) as socklen_t;
    let res = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if res < 0 {
        return Err(io::Error::last_os_error().into());
    }
    socket_addr_from_storage(&storage).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unsupported address family").into()
    })
}

/// Accept one pending connection as a non-blocking socket.
///
/// `Ok(None)` means the accept queue is drained.
pub fn accept_connection(listen_fd: RawFd) -> EtudeResult<Option<(OwnedFd, Option<SocketAddr>)>> {
    loop {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as socklen_t;

        let fd = unsafe {
            libc::accept4(
                listen_fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };

        if fd < 0 {
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(None),
                // The peer gave up between SYN and accept; try the next one.
                io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted => continue,
                _ => return Err(err.into()),
            }
        }

        // TCP_NODELAY is inherited from the listener socket
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        return Ok(Some((owned, socket_addr_from_storage(&storage))));
    }
}

/// Ignore SIGPIPE so writes to a closed peer fail with EPIPE instead of
/// terminating the process. Must be called by the embedding process.
pub fn ignore_sigpipe() -> io::Result<()> {
    let prev = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if prev == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ---- Epoll Operations ----

pub use libc::epoll_event;

/// Interest a connection can be armed for. Never both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn bits(self) -> u32 {
        let base = (libc::EPOLLRDHUP | libc::EPOLLET | libc::EPOLLONESHOT) as u32;
        match self {
            Interest::Read => base | libc::EPOLLIN as u32,
            Interest::Write => base | libc::EPOLLOUT as u32,
        }
    }
}

/// Readiness flags of a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness(u32);

impl Readiness {
    pub fn from_event(ev: &epoll_event) -> Self {
        Readiness(ev.events)
    }

    pub fn is_readable(self) -> bool {
        self.0 & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & libc::EPOLLOUT as u32 != 0
    }

    /// Error, hang-up or peer half-close.
    pub fn is_hangup(self) -> bool {
        self.0 & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// The shared readiness registration.
///
/// `epoll_ctl` is thread-safe, so workers re-arm connections through a shared
/// reference while the reactor thread waits.
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> EtudeResult<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn ctl(&self, op: c_int, fd: RawFd, token: u64, events: u32) -> EtudeResult<()> {
        let mut event = epoll_event { events, u64: token };
        if unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Register a listening socket: edge-triggered, not one-shot, so it keeps
    /// reporting new connections.
    pub fn add_listener(&self, fd: RawFd, token: u64) -> EtudeResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, (libc::EPOLLIN | libc::EPOLLET) as u32)
    }

    /// Register a connection, edge-triggered and one-shot.
    pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> EtudeResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest.bits())
    }

    /// Re-arm a one-shot registration.
    pub fn rearm(&self, fd: RawFd, token: u64, interest: Interest) -> EtudeResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest.bits())
    }

    pub fn delete(&self, fd: RawFd) -> EtudeResult<()> {
        let res = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, ptr::null_mut())
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Wait for events; `timeout_ms` of -1 blocks until something is ready.
    /// An interrupted wait reports zero events.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> EtudeResult<usize> {
        let res = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as c_int,
                timeout_ms,
            )
        };

        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(0);
            }
            return Err(err.into());
        }

        Ok(res as usize)
    }
}

/// A non-blocking eventfd used to pull the reactor out of an untimed wait.
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    pub fn new() -> EtudeResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn notify(&self) -> io::Result<()> {
        let one: u64 = 1;
        let res = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const c_void,
                mem::size_of::<u64>(),
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wakeup is already pending.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn drain(&self) {
        let mut value: u64 = 0;
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut value as *mut u64 as *mut c_void,
                mem::size_of::<u64>(),
            );
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

// ---- Data Transfer ----

/// Non-blocking read. `Ok(None)` means the read would block; `Ok(Some(0))`
/// means the peer closed the connection.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if res >= 0 {
            return Ok(Some(res as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(None),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

/// Non-blocking write of a single buffer. `Ok(None)` means it would block.
pub fn write_nonblocking(fd: RawFd, buf: &[u8]) -> io::Result<Option<usize>> {
    loop {
        let res = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
        if res >= 0 {
            return Ok(Some(res as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(None),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

/// Vectored write: several buffers in one syscall. `Ok(None)` means it would block.
pub fn writev_nonblocking(fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<Option<usize>> {
    if bufs.is_empty() {
        return Ok(Some(0));
    }

    loop {
        // IoSlice is ABI-compatible with iovec on Unix.
        let res = unsafe {
            libc::writev(
                fd,
                bufs.as_ptr() as *const libc::iovec,
                bufs.len().min(libc::c_int::MAX as usize) as c_int,
            )
        };
        if res >= 0 {
            return Ok(Some(res as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(None),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::os::unix::net::UnixStream;

    #[test]
    fn listen_accept_and_local_addr() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = create_listen_socket(&addr, 16).unwrap();
        let bound = local_addr(listener.as_raw_fd()).unwrap();
        assert_ne!(bound.port(), 0);

        assert!(accept_connection(listener.as_raw_fd()).unwrap().is_none());

        let _client = TcpStream::connect(bound).unwrap();
        // The connection may take a moment to land in the accept queue.
        let mut accepted = None;
        for _ in 0..100 {
            if let Some(conn) = accept_connection(listener.as_raw_fd()).unwrap() {
                accepted = Some(conn);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (_fd, peer) = accepted.expect("connection was never accepted");
        assert_eq!(peer.unwrap().ip(), bound.ip());
    }

    #[test]
    fn read_reports_would_block_and_eof() {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 16];
        assert!(read_nonblocking(a.as_raw_fd(), &mut buf).unwrap().is_none());
        drop(b);
        assert_eq!(read_nonblocking(a.as_raw_fd(), &mut buf).unwrap(), Some(0));
    }

    #[test]
    fn writev_sends_segments_in_order() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let bufs = [IoSlice::new(b"head|"), IoSlice::new(b"body")];
        assert_eq!(writev_nonblocking(a.as_raw_fd(), &bufs).unwrap(), Some(9));
        drop(a);
        let mut out = String::new();
        b.read_to_string(&mut out).unwrap();
        assert_eq!(out, "head|body");
    }

    #[test]
    fn one_shot_registration_fires_once_until_rearmed() {
        let epoll = Epoll::new().unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        epoll.add(a.as_raw_fd(), 7, Interest::Read).unwrap();

        b.write_all(b"x").unwrap();
        let mut events = vec![epoll_event { events: 0, u64: 0 }; 4];
        assert_eq!(epoll.wait(&mut events, 100).unwrap(), 1);
        let token = events[0].u64;
        assert_eq!(token, 7);
        assert!(Readiness::from_event(&events[0]).is_readable());

        // More data arrives, but the registration is disarmed.
        b.write_all(b"y").unwrap();
        assert_eq!(epoll.wait(&mut events, 50).unwrap(), 0);

        // Re-arming reports the pending data again.
        epoll.rearm(a.as_raw_fd(), 7, Interest::Read).unwrap();
        assert_eq!(epoll.wait(&mut events, 100).unwrap(), 1);
    }

    #[test]
    fn eventfd_wakes_a_wait() {
        let epoll = Epoll::new().unwrap();
        let waker = EventFd::new().unwrap();
        epoll.add_listener(waker.as_raw_fd(), u64::MAX).unwrap();
        waker.notify().unwrap();
        let mut events = vec![epoll_event { events: 0, u64: 0 }; 4];
        assert_eq!(epoll.wait(&mut events, 100).unwrap(), 1);
        waker.drain();
    }
}
