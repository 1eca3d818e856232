//! Master event loop
//!
//! Watches the shared listening socket and turns each readiness edge into one
//! token for the next live worker. The master never accepts. It leaves the
//! loop once every worker has been reaped, whether they died on their own or
//! after a forwarded SIGTERM.

use prefork_core::constants::MAX_EPOLL_NUMBER;
use prefork_core::error::PreforkResult;
use prefork_core::{kdebug, kinfo, ktrace, kwarn};

use crate::listener::Listener;
use crate::poller::{Poller, Wait};
use crate::pool::{Dispatch, MasterPool};
use crate::signal::SignalState;

/// Run the master loop until the pool is fully reaped.
///
/// Returns `Err(PreforkError::Poll)` if `epoll_wait` fails with anything but
/// `EINTR`. The listener is left open; tearing it down is the caller's step.
pub fn run_master(
    pool: &mut MasterPool,
    listener: &Listener,
    signals: &SignalState,
) -> PreforkResult<()> {
    let mut poller = Poller::new(MAX_EPOLL_NUMBER)?;
    poller.add_readable(listener.fd())?;
    poller.add_readable(signals.wake_fd())?;

    // Workers can exit before the SIGCHLD handler exists.
    pool.reap();

    let size = pool.roster().size();
    let mut forwarded = false;
    kinfo!("master loop up, {} workers", size);

    while !pool.roster().all_reaped() {
        let ready = match poller.wait(None)? {
            Wait::Ready(n) => n,
            Wait::Interrupted => 0,
        };

        for i in 0..ready {
            let ev = poller.event(i);
            if ev.fd == listener.fd() && ev.readable {
                match pool.dispatch() {
                    Dispatch::Sent(index) => ktrace!("token -> worker {}", index),
                    Dispatch::SendFailed(index, errno) => {
                        kwarn!("token to worker {} failed: errno {}", index, errno)
                    }
                    Dispatch::NoLiveWorkers => {
                        kwarn!("connection pending but no live workers");
                        pool.terminate_all();
                    }
                }
            } else if ev.fd == signals.wake_fd() {
                signals.drain_wakeup();
            }
        }

        let pending = signals.take();
        if pending.child_exited() {
            pool.reap();
        }
        if pending.terminate() {
            if !forwarded {
                kinfo!("terminating, forwarding SIGTERM to {} workers", pool.roster().live_count());
            }
            forwarded = true;
            pool.terminate_all();
        }
    }

    kdebug!("all {} workers reaped", size);
    Ok(())
}
