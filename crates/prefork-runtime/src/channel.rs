//! Master/worker token channel.
//!
//! One `AF_UNIX` stream socketpair per worker. The master writes single-byte
//! tokens on its end; the value is never interpreted, a byte only means "a
//! connection may be pending on the shared socket". Nothing else travels on
//! the channel, in particular no descriptors.
//!
//! Both ends are non-blocking.

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use prefork_core::constants::TOKEN;
use prefork_core::error::{last_errno, PreforkError, PreforkResult};

/// One end of a worker channel.
#[derive(Debug)]
pub struct Channel {
    fd: OwnedFd,
}

/// What one drain of the worker end produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tokens {
    /// Tokens read before EAGAIN
    pub count: usize,
    /// The master end is gone (EOF)
    pub closed: bool,
    /// recv failed with something other than EAGAIN
    pub error: Option<i32>,
}

/// Create a connected pair: `(master_end, worker_end)`.
pub fn pair() -> PreforkResult<(Channel, Channel)> {
    let (a, b) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
    )
    .map_err(|e| PreforkError::Channel(e as i32))?;
    Ok((Channel { fd: a }, Channel { fd: b }))
}

impl Channel {
    /// Write one token. Returns the errno on failure (EPIPE once the worker
    /// end is closed, EAGAIN if the worker stopped reading).
    pub fn send_token(&self) -> Result<(), i32> {
        let data = TOKEN;
        let ret = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                &data as *const u8 as *const libc::c_void,
                1,
                libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
            )
        };
        if ret < 0 {
            return Err(last_errno());
        }
        Ok(())
    }

    /// Read every queued token until EAGAIN, EOF or an error.
    pub fn recv_tokens(&self) -> Tokens {
        let mut tokens = Tokens::default();
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n > 0 {
                tokens.count += n as usize;
                continue;
            }
            if n == 0 {
                tokens.closed = true;
                return tokens;
            }
            match last_errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return tokens,
                errno => {
                    tokens.error = Some(errno);
                    return tokens;
                }
            }
        }
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
