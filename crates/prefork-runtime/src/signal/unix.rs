//! Unix signal handling for master and worker processes
//!
//! The handler does two signal-safe things: OR a bit into an `AtomicU32` and
//! write to an eventfd. It never touches the worker roster. The owning loop
//! watches the eventfd, then calls `SignalState::take()` and acts on the bits
//! (reap, forward SIGTERM, stop) in normal context.
//!
//! Lifecycle signals are blocked across pool creation with
//! `block_lifecycle_signals()` so nothing is delivered before a process has
//! installed its handler; pending signals land once the mask guard drops.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use nix::sys::signal::{
    pthread_sigmask, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};

use prefork_core::error::{PreforkError, PreforkResult};

use super::wakeup::Wakeup;

const CHILD_EXITED: u32 = 1 << 0;
const TERMINATE: u32 = 1 << 1;

/// The state the handler of this process reports into.
static ACTIVE: AtomicPtr<SignalState> = AtomicPtr::new(ptr::null_mut());

/// Something the event loop has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// SIGCHLD: one or more children may have exited
    ChildExited,
    /// SIGTERM or SIGINT
    Terminate,
}

impl Notice {
    #[inline]
    fn bit(self) -> u32 {
        match self {
            Notice::ChildExited => CHILD_EXITED,
            Notice::Terminate => TERMINATE,
        }
    }
}

/// Notices collected since the last `take()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pending(u32);

impl Pending {
    #[inline]
    pub fn child_exited(self) -> bool {
        self.0 & CHILD_EXITED != 0
    }

    #[inline]
    pub fn terminate(self) -> bool {
        self.0 & TERMINATE != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Which signals a process handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// SIGCHLD, SIGTERM, SIGINT
    Master,
    /// SIGTERM, SIGINT
    Worker,
}

impl ProcessKind {
    fn signals(self) -> &'static [Signal] {
        match self {
            ProcessKind::Master => &[Signal::SIGCHLD, Signal::SIGTERM, Signal::SIGINT],
            ProcessKind::Worker => &[Signal::SIGTERM, Signal::SIGINT],
        }
    }
}

/// Pending-signal mask plus the eventfd that wakes the loop.
#[derive(Debug)]
pub struct SignalState {
    pending: AtomicU32,
    wakeup: Wakeup,
}

impl SignalState {
    pub fn new() -> PreforkResult<Self> {
        Ok(Self {
            pending: AtomicU32::new(0),
            wakeup: Wakeup::create()?,
        })
    }

    /// Record `notice` and wake the loop. Async-signal-safe.
    pub fn raise(&self, notice: Notice) {
        self.pending.fetch_or(notice.bit(), Ordering::AcqRel);
        self.wakeup.notify();
    }

    /// Take and clear everything raised so far.
    pub fn take(&self) -> Pending {
        Pending(self.pending.swap(0, Ordering::AcqRel))
    }

    /// Descriptor to register with the loop's poller.
    #[inline]
    pub fn wake_fd(&self) -> i32 {
        self.wakeup.fd()
    }

    /// Consume the eventfd edge.
    pub fn drain_wakeup(&self) {
        self.wakeup.drain();
    }
}

extern "C" fn on_signal(signo: libc::c_int) {
    let saved_errno = unsafe { *libc::__errno_location() };
    let state = ACTIVE.load(Ordering::Acquire);
    if !state.is_null() {
        let notice = match signo {
            libc::SIGCHLD => Some(Notice::ChildExited),
            libc::SIGTERM | libc::SIGINT => Some(Notice::Terminate),
            _ => None,
        };
        if let Some(notice) = notice {
            unsafe { (*state).raise(notice) };
        }
    }
    unsafe { *libc::__errno_location() = saved_errno };
}

/// Restores the previous dispositions when dropped.
pub struct SignalGuard<'a> {
    previous: Vec<(Signal, SigAction)>,
    _state: &'a SignalState,
}

impl Drop for SignalGuard<'_> {
    fn drop(&mut self) {
        for (sig, old) in self.previous.drain(..).rev() {
            let _ = unsafe { sigaction(sig, &old) };
        }
        ACTIVE.store(ptr::null_mut(), Ordering::Release);
    }
}

/// Route this process's lifecycle signals into `state`.
///
/// Only one state can be active per process; a second install fails with
/// `EBUSY` until the first guard is dropped.
pub fn install(state: &SignalState, kind: ProcessKind) -> PreforkResult<SignalGuard<'_>> {
    let raw = state as *const SignalState as *mut SignalState;
    ACTIVE
        .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| PreforkError::Signal(libc::EBUSY))?;

    let mut guard = SignalGuard { previous: Vec::with_capacity(3), _state: state };
    for &sig in kind.signals() {
        let flags = if sig == Signal::SIGCHLD { SaFlags::SA_NOCLDSTOP } else { SaFlags::empty() };
        let action = SigAction::new(SigHandler::Handler(on_signal), flags, SigSet::empty());
        // Dropping `guard` on error restores whatever was already replaced.
        let old = unsafe { sigaction(sig, &action) }.map_err(|e| PreforkError::Signal(e as i32))?;
        guard.previous.push((sig, old));
    }
    Ok(guard)
}

/// Restores the calling thread's signal mask when dropped.
pub struct MaskGuard {
    old: SigSet,
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.old), None);
    }
}

/// Block SIGCHLD, SIGTERM and SIGINT on the calling thread.
///
/// The mask is inherited across fork, so children start with the signals
/// blocked too and unblock them by dropping their copy of the guard.
pub fn block_lifecycle_signals() -> PreforkResult<MaskGuard> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set.add(Signal::SIGTERM);
    set.add(Signal::SIGINT);
    let mut old = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut old))
        .map_err(|e| PreforkError::Signal(e as i32))?;
    Ok(MaskGuard { old })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_take() {
        let s = SignalState::new().unwrap();
        assert!(s.take().is_empty());

        s.raise(Notice::ChildExited);
        s.raise(Notice::ChildExited);
        let p = s.take();
        assert!(p.child_exited());
        assert!(!p.terminate());
        assert!(s.take().is_empty());

        s.raise(Notice::Terminate);
        assert!(s.take().terminate());
        s.drain_wakeup();
    }

    #[test]
    fn test_mask_blocks_and_restores() {
        let before = SigSet::thread_get_mask().unwrap();
        assert!(!before.contains(Signal::SIGTERM));
        {
            let _mask = block_lifecycle_signals().unwrap();
            let during = SigSet::thread_get_mask().unwrap();
            assert!(during.contains(Signal::SIGTERM));
            assert!(during.contains(Signal::SIGCHLD));
        }
        let after = SigSet::thread_get_mask().unwrap();
        assert!(!after.contains(Signal::SIGTERM));
    }
}
