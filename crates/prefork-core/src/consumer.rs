//! Application byte handling seam.
//!
//! A worker hands every successful read to a `ByteConsumer`. The server does
//! no framing: each call sees exactly the bytes of one `recv`, so a consumer
//! that needs whole messages must buffer across calls itself.
//!
//! # Implementors
//!
//! - `LogConsumer` (default): logs the bytes at debug level.
//! - Anything else the embedder supplies (echo, protocol parser, ...).

use std::os::unix::io::RawFd;

/// The connection a chunk of bytes arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    /// Accepted client descriptor, owned by the worker loop
    pub fd: RawFd,
    /// Pool index of the worker servicing this connection
    pub worker: usize,
}

impl Peer {
    /// Best-effort non-blocking send on the connection.
    ///
    /// Returns bytes written, or the errno. `EAGAIN` means the socket buffer
    /// is full; the server does not queue output.
    pub fn reply(&self, data: &[u8]) -> Result<usize, i32> {
        let ret = unsafe {
            libc::send(
                self.fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
            )
        };
        if ret < 0 {
            return Err(crate::error::last_errno());
        }
        Ok(ret as usize)
    }
}

/// Consumes bytes received by a worker.
///
/// **Contract:**
/// - `consume()` must not block; it runs inside the worker's event loop.
/// - `data` is only valid for the duration of the call.
/// - `closed()` is called once when the connection is dropped by the worker.
pub trait ByteConsumer {
    /// Bytes from one read on `peer`.
    fn consume(&mut self, peer: &Peer, data: &[u8]);

    /// The connection was closed and deregistered.
    fn closed(&mut self, _peer: &Peer) {}
}

/// Logs what it receives and nothing more.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConsumer;

impl ByteConsumer for LogConsumer {
    fn consume(&mut self, peer: &Peer, data: &[u8]) {
        crate::kdebug!(
            "recv {} bytes from fd {}: {}",
            data.len(),
            peer.fd,
            String::from_utf8_lossy(data)
        );
    }

    fn closed(&mut self, peer: &Peer) {
        crate::kdebug!("client fd {} closed", peer.fd);
    }
}

impl<C: ByteConsumer + ?Sized> ByteConsumer for Box<C> {
    fn consume(&mut self, peer: &Peer, data: &[u8]) {
        (**self).consume(peer, data)
    }

    fn closed(&mut self, peer: &Peer) {
        (**self).closed(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_on_socketpair() {
        let mut fds = [0 as RawFd; 2];
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0);

        let peer = Peer { fd: fds[0], worker: 0 };
        assert_eq!(peer.reply(b"pong"), Ok(4));

        let mut buf = [0u8; 8];
        let n = unsafe { libc::recv(fds[1], buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        assert_eq!(&buf[..n as usize], b"pong");

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_reply_on_closed_fd() {
        let peer = Peer { fd: -1, worker: 0 };
        assert_eq!(peer.reply(b"x"), Err(libc::EBADF));
    }

    #[test]
    fn test_boxed_consumer() {
        struct Count(usize);
        impl ByteConsumer for Count {
            fn consume(&mut self, _peer: &Peer, data: &[u8]) {
                self.0 += data.len();
            }
        }

        let mut boxed: Box<Count> = Box::new(Count(0));
        let peer = Peer { fd: -1, worker: 2 };
        boxed.consume(&peer, b"abc");
        boxed.closed(&peer);
        assert_eq!(boxed.0, 3);
    }
}
