//! Worker event loop
//!
//! A worker waits on two descriptors of its own (the master channel and the
//! signal eventfd) plus every client it has accepted. A token on the channel
//! means "try the shared socket"; several workers may race for the same
//! connection and the losers see `EAGAIN`, which is not an error.
//!
//! Client sockets are edge-triggered, so every readable edge is drained with
//! `recv` until `EAGAIN`. Each successful read goes to the `ByteConsumer`
//! untouched.

use std::collections::HashSet;
use std::os::unix::io::{AsRawFd, RawFd};

use prefork_core::constants::{BUFFER_SIZE, MAX_EPOLL_NUMBER, MAX_USER_CONNECT};
use prefork_core::consumer::{ByteConsumer, Peer};
use prefork_core::error::{last_errno, PreforkResult};
use prefork_core::{kdebug, kinfo, ktrace, kwarn};

use crate::listener::{Accept, Listener};
use crate::poller::{Poller, Wait};
use crate::pool::WorkerPool;
use crate::signal::SignalState;

/// How many connections a worker takes from the shared socket per wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptPolicy {
    /// Accept until `EAGAIN`
    Drain,
    /// Accept at most one connection per token received
    PerToken,
}

impl AcceptPolicy {
    #[inline]
    pub fn from_drain(drain: bool) -> Self {
        if drain {
            AcceptPolicy::Drain
        } else {
            AcceptPolicy::PerToken
        }
    }
}

struct WorkerLoop<'a, C: ?Sized> {
    index: usize,
    listener: &'a Listener,
    consumer: &'a mut C,
    poller: Poller,
    clients: HashSet<RawFd>,
    buf: Box<[u8]>,
}

impl<'a, C: ByteConsumer + ?Sized> WorkerLoop<'a, C> {
    /// Take connections off the shared socket, then service them.
    ///
    /// Accepting finishes before any client is read, so a connection that
    /// shows up while this batch is being serviced is left for the worker
    /// the master notifies next.
    fn accept_pending(&mut self, tokens: usize, policy: AcceptPolicy) {
        let budget = match policy {
            AcceptPolicy::Drain => usize::MAX,
            AcceptPolicy::PerToken => tokens,
        };
        let mut batch = Vec::new();
        while batch.len() < budget {
            match self.listener.accept() {
                Accept::Connection(fd, peer) => {
                    kdebug!("accepted fd {} from {}", fd, peer);
                    batch.push(fd);
                }
                Accept::WouldBlock => break,
                Accept::Failed(libc::ECONNABORTED) | Accept::Failed(libc::EPROTO) => continue,
                Accept::Failed(errno) => {
                    kwarn!("accept failed: errno {}", errno);
                    break;
                }
            }
        }
        if batch.is_empty() {
            ktrace!("stale token ({} received)", tokens);
        }
        for fd in batch {
            self.admit(fd);
        }
    }

    fn read_client(&mut self, fd: RawFd) {
        let peer = Peer { fd, worker: self.index };
        loop {
            self.buf.fill(0);
            let n = unsafe {
                libc::recv(fd, self.buf.as_mut_ptr() as *mut libc::c_void, self.buf.len(), 0)
            };
            if n > 0 {
                self.consumer.consume(&peer, &self.buf[..n as usize]);
                continue;
            }
            if n == 0 {
                self.close_client(fd);
                return;
            }
            match last_errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return,
                errno => {
                    kdebug!("recv on fd {}: errno {}", fd, errno);
                    self.close_client(fd);
                    return;
                }
            }
        }
    }

    fn close_client(&mut self, fd: RawFd) {
        if !self.clients.remove(&fd) {
            return;
        }
        let _ = self.poller.delete(fd);
        unsafe { libc::close(fd) };
        self.consumer.closed(&Peer { fd, worker: self.index });
    }

    fn close_all(&mut self) {
        let fds: Vec<RawFd> = self.clients.iter().copied().collect();
        for fd in fds {
            self.close_client(fd);
        }
    }
}

/// Run worker `pool.index()` until SIGTERM/SIGINT or a fatal wait error.
///
/// All accepted connections are closed before returning.
pub fn run_worker<C: ByteConsumer + ?Sized>(
    pool: &WorkerPool,
    listener: &Listener,
    signals: &SignalState,
    consumer: &mut C,
    policy: AcceptPolicy,
) -> PreforkResult<()> {
    let channel_fd = pool.channel().as_raw_fd();
    let poller = Poller::new(MAX_EPOLL_NUMBER)?;
    poller.add_readable(channel_fd)?;
    poller.add_readable(signals.wake_fd())?;

    let mut w = WorkerLoop {
        index: pool.index(),
        listener,
        consumer,
        poller,
        clients: HashSet::new(),
        buf: vec![0u8; BUFFER_SIZE].into_boxed_slice(),
    };
    let mut channel_open = true;
    kinfo!("worker {}/{} up ({:?})", pool.index(), pool.size(), policy);

    let result = loop {
        let ready = match w.poller.wait(None) {
            Ok(Wait::Ready(n)) => n,
            Ok(Wait::Interrupted) => 0,
            Err(e) => break Err(e),
        };

        for i in 0..ready {
            let ev = w.poller.event(i);
            if ev.fd == channel_fd {
                if !channel_open {
                    continue;
                }
                let tokens = pool.channel().recv_tokens();
                if tokens.count > 0 {
                    w.accept_pending(tokens.count, policy);
                }
                if tokens.closed || tokens.error.is_some() {
                    channel_open = false;
                    let _ = w.poller.delete(channel_fd);
                    kwarn!("master channel closed (errno {:?}), serving existing clients", tokens.error);
                }
            } else if ev.fd == signals.wake_fd() {
                signals.drain_wakeup();
            } else if (ev.readable || ev.hangup) && w.clients.contains(&ev.fd) {
                w.read_client(ev.fd);
            }
        }

        if signals.take().terminate() {
            break Ok(());
        }
    };

    kdebug!("closing {} clients", w.clients.len());
    w.close_all();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;
    use crate::signal::Notice;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, Shutdown, TcpStream};

    #[derive(Default)]
    struct Collect {
        bytes: usize,
        closed: usize,
        workers: HashSet<usize>,
    }

    impl ByteConsumer for Collect {
        fn consume(&mut self, peer: &Peer, data: &[u8]) {
            assert!(data.iter().all(|&b| b == b'x'));
            self.bytes += data.len();
            self.workers.insert(peer.worker);
        }

        fn closed(&mut self, _peer: &Peer) {
            self.closed += 1;
        }
    }

    /// Dials the server again from inside the first `consume`, the way a
    /// client opens its next connection as soon as it has been served.
    struct Redial {
        addr: std::net::SocketAddrV4,
        dialed: Vec<TcpStream>,
    }

    impl ByteConsumer for Redial {
        fn consume(&mut self, _peer: &Peer, _data: &[u8]) {
            if self.dialed.is_empty() {
                self.dialed.push(TcpStream::connect(self.addr).unwrap());
            }
        }
    }

    #[test]
    fn test_policy_from_drain() {
        assert_eq!(AcceptPolicy::from_drain(true), AcceptPolicy::Drain);
        assert_eq!(AcceptPolicy::from_drain(false), AcceptPolicy::PerToken);
    }

    #[test]
    fn test_drains_every_byte() {
        const K: usize = 200_000;

        let listener = Listener::setup(Ipv4Addr::LOCALHOST, 0, 5).unwrap();
        let addr = listener.local_addr().unwrap();
        let signals = SignalState::new().unwrap();
        let (master, worker_end) = channel::pair().unwrap();
        let pool = WorkerPool::from_parts(3, 4, worker_end);

        let collected = std::thread::scope(|s| {
            let h = s.spawn(|| {
                let mut c = Collect::default();
                run_worker(&pool, &listener, &signals, &mut c, AcceptPolicy::Drain).unwrap();
                c
            });

            let mut client = TcpStream::connect(addr).unwrap();
            master.send_token().unwrap();
            client.write_all(&vec![b'x'; K]).unwrap();
            client.shutdown(Shutdown::Write).unwrap();
            // EOF here means the worker saw our FIN after every byte.
            let mut rest = Vec::new();
            client.read_to_end(&mut rest).unwrap();
            assert!(rest.is_empty());

            // Connect and close without sending anything.
            let mut quiet = TcpStream::connect(addr).unwrap();
            master.send_token().unwrap();
            quiet.shutdown(Shutdown::Write).unwrap();
            quiet.read_to_end(&mut rest).unwrap();

            signals.raise(Notice::Terminate);
            h.join().unwrap()
        });

        assert_eq!(collected.bytes, K);
        assert_eq!(collected.closed, 2);
        assert_eq!(collected.workers.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_open_clients_closed_on_stop() {
        let listener = Listener::setup(Ipv4Addr::LOCALHOST, 0, 5).unwrap();
        let addr = listener.local_addr().unwrap();
        let signals = SignalState::new().unwrap();
        let (master, worker_end) = channel::pair().unwrap();
        let pool = WorkerPool::from_parts(0, 1, worker_end);

        let mut client = TcpStream::connect(addr).unwrap();
        let collected = std::thread::scope(|s| {
            let h = s.spawn(|| {
                let mut c = Collect::default();
                run_worker(&pool, &listener, &signals, &mut c, AcceptPolicy::PerToken).unwrap();
                c
            });
            master.send_token().unwrap();
            client.write_all(b"xxxx").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(100));
            signals.raise(Notice::Terminate);
            h.join().unwrap()
        });

        assert_eq!(collected.bytes, 4);
        assert_eq!(collected.closed, 1);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_drain_leaves_later_arrivals_queued() {
        let listener = Listener::setup(Ipv4Addr::LOCALHOST, 0, 5).unwrap();
        let addr = listener.local_addr().unwrap();
        let signals = SignalState::new().unwrap();
        let (master, worker_end) = channel::pair().unwrap();
        let pool = WorkerPool::from_parts(0, 2, worker_end);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"x").unwrap();

        let redial = std::thread::scope(|s| {
            let h = s.spawn(|| {
                let mut c = Redial { addr, dialed: Vec::new() };
                run_worker(&pool, &listener, &signals, &mut c, AcceptPolicy::Drain).unwrap();
                c
            });
            master.send_token().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(200));
            signals.raise(Notice::Terminate);
            h.join().unwrap()
        });

        assert_eq!(redial.dialed.len(), 1);
        // The second connection was not taken on the first token.
        match listener.accept() {
            Accept::Connection(fd, _) => unsafe {
                libc::close(fd);
            },
            other => panic!("redialed connection was consumed: {:?}", other),
        }
    }
}
