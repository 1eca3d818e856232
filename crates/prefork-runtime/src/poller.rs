//! Edge-triggered readiness multiplexer (epoll).
//!
//! Every descriptor is registered `EPOLLIN | EPOLLET` and switched to
//! non-blocking on registration. With edge triggering a wakeup is only
//! delivered on a transition to readable, so callers must drain each ready
//! descriptor to `EAGAIN` before waiting again.
//!
//! Each process owns its own `Poller`; instances are never shared across
//! fork.

use std::os::unix::io::RawFd;
use std::time::Duration;

use prefork_core::error::{last_errno, PreforkError, PreforkResult};

/// Set `O_NONBLOCK` on `fd`, returning the errno on failure.
pub fn set_nonblocking(fd: RawFd) -> Result<(), i32> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(last_errno());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(last_errno());
    }
    Ok(())
}

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    /// EPOLLIN was reported
    pub readable: bool,
    /// EPOLLHUP or EPOLLERR was reported
    pub hangup: bool,
}

/// Result of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// `n` events are available through `Poller::event`
    Ready(usize),
    /// epoll_wait returned EINTR
    Interrupted,
}

pub struct Poller {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
    /// Valid entries in `events` from the last wait
    ready: usize,
}

impl Poller {
    /// Create an epoll instance able to report `capacity` events per wait.
    pub fn new(capacity: usize) -> PreforkResult<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(PreforkError::Poller(last_errno()));
        }
        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            ready: 0,
        })
    }

    /// Watch `fd` for edge-triggered readability.
    pub fn add_readable(&self, fd: RawFd) -> PreforkResult<()> {
        set_nonblocking(fd).map_err(PreforkError::Poller)?;
        let mut ev = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLET) as u32,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if ret != 0 {
            return Err(PreforkError::Poller(last_errno()));
        }
        Ok(())
    }

    /// Stop watching `fd`. The descriptor itself is left open.
    pub fn delete(&self, fd: RawFd) -> PreforkResult<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret != 0 {
            return Err(PreforkError::Poller(last_errno()));
        }
        Ok(())
    }

    /// Block until at least one registered descriptor is ready.
    ///
    /// `None` waits forever. A signal interrupting the wait is reported as
    /// `Wait::Interrupted`, any other failure as `PreforkError::Poll`.
    pub fn wait(&mut self, timeout: Option<Duration>) -> PreforkResult<Wait> {
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        self.ready = 0;
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return match last_errno() {
                libc::EINTR => Ok(Wait::Interrupted),
                errno => Err(PreforkError::Poll(errno)),
            };
        }
        self.ready = n as usize;
        Ok(Wait::Ready(self.ready))
    }

    /// The `i`-th event of the last successful wait.
    pub fn event(&self, i: usize) -> Event {
        debug_assert!(i < self.ready);
        let raw = self.events[i];
        let bits = raw.events;
        let data = raw.u64;
        Event {
            fd: data as RawFd,
            readable: bits & libc::EPOLLIN as u32 != 0,
            hangup: bits & (libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0,
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if self.epfd >= 0 {
            unsafe { libc::close(self.epfd); }
            self.epfd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn write_byte(fd: RawFd) {
        let b = 1u8;
        assert_eq!(unsafe { libc::write(fd, &b as *const u8 as *const libc::c_void, 1) }, 1);
    }

    #[test]
    fn test_timeout_with_nothing_ready() {
        let mut p = Poller::new(8).unwrap();
        assert_eq!(p.wait(Some(Duration::from_millis(10))).unwrap(), Wait::Ready(0));
    }

    #[test]
    fn test_edge_triggered_fires_once() {
        let (r, w) = pipe();
        let mut p = Poller::new(8).unwrap();
        p.add_readable(r).unwrap();

        write_byte(w);
        assert_eq!(p.wait(Some(Duration::from_millis(100))).unwrap(), Wait::Ready(1));
        let ev = p.event(0);
        assert_eq!(ev.fd, r);
        assert!(ev.readable);

        // Not drained, but no new edge: nothing reported.
        assert_eq!(p.wait(Some(Duration::from_millis(10))).unwrap(), Wait::Ready(0));

        // A new write is a new edge.
        write_byte(w);
        assert_eq!(p.wait(Some(Duration::from_millis(100))).unwrap(), Wait::Ready(1));

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_registration_sets_nonblocking() {
        let (r, w) = pipe();
        let p = Poller::new(1).unwrap();
        p.add_readable(r).unwrap();
        let flags = unsafe { libc::fcntl(r, libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_delete_and_errors() {
        let (r, w) = pipe();
        let mut p = Poller::new(4).unwrap();
        p.add_readable(r).unwrap();
        assert!(matches!(p.add_readable(r), Err(PreforkError::Poller(libc::EEXIST))));
        p.delete(r).unwrap();
        assert!(matches!(p.delete(r), Err(PreforkError::Poller(libc::ENOENT))));

        write_byte(w);
        assert_eq!(p.wait(Some(Duration::from_millis(10))).unwrap(), Wait::Ready(0));
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }
}
