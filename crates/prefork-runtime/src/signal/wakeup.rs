//! `Wakeup` - eventfd used to interrupt an epoll wait from a signal handler.
//!
//! `notify()` is a single `write(2)` and is async-signal-safe. Multiple
//! notifications before the loop drains coalesce into one readable edge
//! (eventfd counter semantics).

use std::os::unix::io::RawFd;

use prefork_core::error::{last_errno, PreforkError, PreforkResult};

#[derive(Debug)]
pub struct Wakeup {
    fd: RawFd,
}

impl Wakeup {
    /// Create a non-blocking, close-on-exec eventfd.
    pub fn create() -> PreforkResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(PreforkError::Signal(last_errno()));
        }
        Ok(Self { fd })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Bump the counter. Safe to call from a signal handler.
    pub fn notify(&self) {
        let val: u64 = 1;
        // EAGAIN means the counter is saturated, so a wakeup is already
        // pending. Nothing else can fail on a valid eventfd.
        unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// Reset the counter. Returns true if a notification was pending.
    pub fn drain(&self) -> bool {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        ret == std::mem::size_of::<u64>() as isize && val > 0
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd); }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_coalesces() {
        let w = Wakeup::create().unwrap();
        assert!(!w.drain());
        w.notify();
        w.notify();
        assert!(w.drain());
        assert!(!w.drain());
    }
}
