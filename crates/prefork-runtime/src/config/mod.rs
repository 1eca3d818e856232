//! Server configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use prefork_runtime::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .port(9000)
//!     .workers(4);
//! config.validate()?;
//! ```

pub mod defaults;

use std::net::Ipv4Addr;

use prefork_core::constants::MAX_PROCESS_NUMBER;
use prefork_core::env::{env_get, env_get_bool, env_get_opt};
use prefork_core::error::ConfigError;
use prefork_core::kwarn;

use crate::worker::AcceptPolicy;

/// Startup parameters for the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// IPv4 address to bind
    pub addr: Ipv4Addr,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Number of worker processes, 1..=MAX_PROCESS_NUMBER
    pub workers: usize,
    /// listen() backlog
    pub backlog: i32,
    /// How many connections a worker accepts per notification
    pub accept_policy: AcceptPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `PREFORK_ADDR` - IPv4 bind address
    /// - `PREFORK_PORT` - Bind port
    /// - `PREFORK_WORKERS` - Worker process count
    /// - `PREFORK_BACKLOG` - listen() backlog
    /// - `PREFORK_ACCEPT_DRAIN` - Accept until EAGAIN per notification (0/1)
    ///
    /// A malformed `PREFORK_ADDR` is reported and the default kept.
    pub fn from_env() -> Self {
        let addr = match std::env::var("PREFORK_ADDR") {
            Ok(raw) => env_get_opt("PREFORK_ADDR").unwrap_or_else(|| {
                kwarn!("ignoring PREFORK_ADDR={:?}: not an IPv4 address", raw);
                defaults::ADDR
            }),
            Err(_) => defaults::ADDR,
        };

        Self {
            addr,
            port: env_get("PREFORK_PORT", defaults::PORT),
            workers: env_get("PREFORK_WORKERS", defaults::WORKERS),
            backlog: env_get("PREFORK_BACKLOG", defaults::BACKLOG),
            accept_policy: AcceptPolicy::from_drain(env_get_bool(
                "PREFORK_ACCEPT_DRAIN",
                defaults::ACCEPT_DRAIN,
            )),
        }
    }

    /// Create config with library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            addr: defaults::ADDR,
            port: defaults::PORT,
            workers: defaults::WORKERS,
            backlog: defaults::BACKLOG,
            accept_policy: AcceptPolicy::from_drain(defaults::ACCEPT_DRAIN),
        }
    }

    // Builder methods

    pub fn addr(mut self, addr: Ipv4Addr) -> Self {
        self.addr = addr;
        self
    }

    /// Set the bind address from an IPv4 literal.
    pub fn addr_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.addr = addr
            .trim()
            .parse()
            .map_err(|_| ConfigError::BadAddress(addr.to_string()))?;
        Ok(self)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn accept_policy(mut self, policy: AcceptPolicy) -> Self {
        self.accept_policy = policy;
        self
    }

    /// Check the values fit the server's fixed limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_PROCESS_NUMBER {
            return Err(ConfigError::WorkersOutOfRange(self.workers));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::ZeroBacklog);
        }
        Ok(())
    }
}
