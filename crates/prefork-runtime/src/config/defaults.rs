//! Library defaults for `ServerConfig`.

use std::net::Ipv4Addr;

/// Bind address
pub const ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Bind port
pub const PORT: u16 = 9000;

/// Worker processes
pub const WORKERS: usize = 7;

/// listen() backlog
pub const BACKLOG: i32 = prefork_core::constants::LISTEN_BACKLOG;

/// Accept until EAGAIN on each notification. With one accept per token a
/// burst that arrives inside a single readiness edge waits for later traffic.
pub const ACCEPT_DRAIN: bool = true;
