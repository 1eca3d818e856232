//! The shared listening socket.
//!
//! Created once, before the pool is forked, so every process inherits the
//! same descriptor. The master only watches it for readiness; workers are the
//! only callers of `accept()`.
//!
//! The socket is non-blocking. `O_NONBLOCK` lives on the open file
//! description, so it holds in every process sharing it.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::RawFd;

use prefork_core::error::{last_errno, PreforkError, PreforkResult};

use crate::poller::set_nonblocking;

/// Outcome of one non-blocking accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// A connection, already `O_NONBLOCK | FD_CLOEXEC`
    Connection(RawFd, SocketAddrV4),
    /// Nothing pending (another worker won the race, or a stale token)
    WouldBlock,
    /// accept4() failed with this errno
    Failed(i32),
}

/// IPv4 TCP listening socket.
#[derive(Debug)]
pub struct Listener {
    fd: RawFd,
}

impl Listener {
    /// Create, bind and listen on `addr:port`.
    pub fn setup(addr: Ipv4Addr, port: u16, backlog: i32) -> PreforkResult<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            return Err(PreforkError::Socket(last_errno()));
        }
        // From here on Drop closes fd on every error path.
        let listener = Self { fd };

        let opt: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &opt as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(PreforkError::SocketOption(last_errno()));
        }

        let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_addr.s_addr = u32::from(addr).to_be();
        sin.sin_port = port.to_be();

        let ret = unsafe {
            libc::bind(
                fd,
                &sin as *const _ as *const libc::sockaddr,
                std::mem::size_of_val(&sin) as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(PreforkError::Bind(last_errno()));
        }

        if unsafe { libc::listen(fd, backlog) } != 0 {
            return Err(PreforkError::Listen(last_errno()));
        }

        set_nonblocking(fd).map_err(PreforkError::SocketOption)?;

        Ok(listener)
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> PreforkResult<SocketAddrV4> {
        let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(self.fd, &mut sin as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if ret != 0 {
            return Err(PreforkError::SocketOption(last_errno()));
        }
        Ok(sockaddr_to_v4(&sin))
    }

    /// Accept one pending connection without blocking.
    pub fn accept(&self) -> Accept {
        loop {
            let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept4(
                    self.fd,
                    &mut sin as *mut _ as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                return Accept::Connection(fd, sockaddr_to_v4(&sin));
            }
            match last_errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return Accept::WouldBlock,
                errno => return Accept::Failed(errno),
            }
        }
    }

    /// Raw descriptor, for readiness registration.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Close the socket. Called by the master on the normal shutdown path.
    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd); }
            self.fd = -1;
        }
    }
}

fn sockaddr_to_v4(sin: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
        u16::from_be(sin.sin_port),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpStream;

    fn loopback() -> Listener {
        Listener::setup(Ipv4Addr::LOCALHOST, 0, 5).expect("setup")
    }

    #[test]
    fn test_setup_and_local_addr() {
        let l = loopback();
        let addr = l.local_addr().unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_accept_would_block_when_idle() {
        let l = loopback();
        assert_eq!(l.accept(), Accept::WouldBlock);
    }

    #[test]
    fn test_accept_connection() {
        let l = loopback();
        let addr = l.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();

        let fd = match l.accept() {
            Accept::Connection(fd, peer) => {
                assert_eq!(*peer.ip(), Ipv4Addr::LOCALHOST);
                fd
            }
            other => panic!("expected connection, got {:?}", other),
        };
        assert_eq!(l.accept(), Accept::WouldBlock);

        let sent = unsafe { libc::send(fd, b"hi".as_ptr() as *const libc::c_void, 2, 0) };
        assert_eq!(sent, 2);
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        unsafe { libc::close(fd); }
    }

    #[test]
    fn test_bind_conflict() {
        let first = loopback();
        let port = first.local_addr().unwrap().port();
        // SO_REUSEADDR does not allow two listeners on the same port.
        let err = Listener::setup(Ipv4Addr::LOCALHOST, port, 5).unwrap_err();
        assert_eq!(err, PreforkError::Bind(libc::EADDRINUSE));
    }
}
