//! Process pool: fork the workers, then track them from the master.
//!
//! `create_pool` returns once per process. The master gets
//! `Role::Master` with the roster and one channel end per worker; each child
//! gets `Role::Worker` with its index and its own channel end, and never sees
//! another worker's channel.

use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid as SysPid};

use prefork_core::constants::MAX_PROCESS_NUMBER;
use prefork_core::error::{PreforkError, PreforkResult};
use prefork_core::roster::{Pid, Roster};
use prefork_core::{kdebug, kerror, kinfo, kwarn};

use crate::channel::{self, Channel};
use crate::listener::Listener;

/// Which side of the fork this process is on.
#[derive(Debug)]
pub enum Role {
    Master(MasterPool),
    Worker(WorkerPool),
}

/// The master's view of the pool.
#[derive(Debug)]
pub struct MasterPool {
    roster: Roster,
    /// Master end per slot; `None` once the worker is reaped
    channels: Box<[Option<Channel>]>,
}

/// A worker's view of the pool.
#[derive(Debug)]
pub struct WorkerPool {
    index: usize,
    size: usize,
    channel: Channel,
}

/// Outcome of handing one readiness notification to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Token written to worker `index`
    Sent(usize),
    /// The selected worker's channel rejected the token
    SendFailed(usize, i32),
    /// Every slot is dead
    NoLiveWorkers,
}

/// Fork `size` workers sharing `listener`.
///
/// On a mid-way failure (socketpair or fork) the workers already spawned are
/// sent SIGTERM and reaped before the error is returned, so the caller is
/// left with no children.
pub fn create_pool(listener: &Listener, size: usize) -> PreforkResult<Role> {
    if size == 0 || size > MAX_PROCESS_NUMBER {
        return Err(PreforkError::InvalidPoolSize(size));
    }

    let mut pids: Vec<Pid> = Vec::with_capacity(size);
    let mut masters: Vec<Channel> = Vec::with_capacity(size);

    for index in 0..size {
        let (master_end, worker_end) = match channel::pair() {
            Ok(pair) => pair,
            Err(e) => {
                unwind(&pids, masters);
                return Err(e);
            }
        };

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // Earlier workers' channels are the master's business.
                drop(masters);
                drop(master_end);
                return Ok(Role::Worker(WorkerPool {
                    index,
                    size,
                    channel: worker_end,
                }));
            }
            Ok(ForkResult::Parent { child }) => {
                drop(worker_end);
                kdebug!(
                    "forked worker {} pid {} (listen fd {}, channel fd {})",
                    index,
                    child,
                    listener.fd(),
                    master_end.as_raw_fd()
                );
                pids.push(child.as_raw());
                masters.push(master_end);
            }
            Err(e) => {
                kerror!("fork of worker {} failed: {}", index, e);
                drop(master_end);
                drop(worker_end);
                unwind(&pids, masters);
                return Err(PreforkError::Fork(e as i32));
            }
        }
    }

    kinfo!("pool of {} workers up", size);
    Ok(Role::Master(MasterPool {
        roster: Roster::from_pids(pids),
        channels: masters.into_iter().map(Some).collect(),
    }))
}

/// Terminate and wait for a partially created pool.
fn unwind(pids: &[Pid], masters: Vec<Channel>) {
    for &pid in pids {
        let _ = kill(SysPid::from_raw(pid), Signal::SIGTERM);
    }
    drop(masters);
    for &pid in pids {
        wait_blocking(pid);
    }
    if !pids.is_empty() {
        kwarn!("pool creation failed, {} workers stopped", pids.len());
    }
}

/// Block until `pid` has been collected (or is not our child).
fn wait_blocking(pid: Pid) {
    loop {
        match waitpid(SysPid::from_raw(pid), None) {
            Err(Errno::EINTR) => continue,
            _ => break,
        }
    }
}

impl MasterPool {
    #[cfg(test)]
    pub(crate) fn from_parts(pids: Vec<Pid>, channels: Vec<Channel>) -> Self {
        assert_eq!(pids.len(), channels.len());
        Self {
            roster: Roster::from_pids(pids),
            channels: channels.into_iter().map(Some).collect(),
        }
    }

    #[inline]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Send one token to the next live worker in round-robin order.
    pub fn dispatch(&mut self) -> Dispatch {
        let index = match self.roster.select() {
            Some(i) => i,
            None => return Dispatch::NoLiveWorkers,
        };
        match self.channels[index].as_ref() {
            Some(ch) => match ch.send_token() {
                Ok(()) => Dispatch::Sent(index),
                Err(errno) => Dispatch::SendFailed(index, errno),
            },
            None => Dispatch::SendFailed(index, libc::EPIPE),
        }
    }

    /// Collect every exited child without blocking.
    ///
    /// Returns how many pool workers were marked dead by this call.
    pub fn reap(&mut self) -> usize {
        let mut buried = 0;
        loop {
            let (pid, how) = match waitpid(SysPid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => (pid, format!("exit {}", code)),
                Ok(WaitStatus::Signaled(pid, sig, _)) => (pid, format!("{:?}", sig)),
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    kwarn!("waitpid: {}", e);
                    break;
                }
            };
            match self.roster.mark_dead(pid.as_raw()) {
                Some(index) => {
                    self.channels[index] = None;
                    buried += 1;
                    kinfo!(
                        "worker {} pid {} gone ({}), {}/{} reaped",
                        index,
                        pid,
                        how,
                        self.roster.reaped(),
                        self.roster.size()
                    );
                }
                None => kdebug!("reaped unknown child {} ({})", pid, how),
            }
        }
        buried
    }

    /// SIGTERM every live worker and wait for each of them.
    ///
    /// For the master's error path, where no event loop is left to collect
    /// the children.
    pub fn stop_and_wait(&mut self) {
        self.terminate_all();
        let live: Vec<(usize, Pid)> = self.roster.live().collect();
        for (index, pid) in live {
            wait_blocking(pid);
            self.roster.mark_dead(pid);
            self.channels[index] = None;
        }
        kdebug!("stopped, {}/{} reaped", self.roster.reaped(), self.roster.size());
    }

    /// Send SIGTERM to every live worker. Failures are ignored.
    pub fn terminate_all(&self) {
        for (index, pid) in self.roster.live() {
            if let Err(e) = kill(SysPid::from_raw(pid), Signal::SIGTERM) {
                kdebug!("SIGTERM to worker {} pid {}: {}", index, pid, e);
            }
        }
    }
}

impl WorkerPool {
    #[cfg(test)]
    pub(crate) fn from_parts(index: usize, size: usize, channel: Channel) -> Self {
        Self { index, size, channel }
    }

    /// This worker's slot in the pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Pool size at creation.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}
