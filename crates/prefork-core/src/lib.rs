//! # prefork-core
//!
//! Platform-agnostic pieces of the prefork server.
//!
//! ## Modules
//!
//! - `error` - Error types and the `PreforkResult` alias
//! - `roster` - Fixed-size worker table with round-robin selection
//! - `consumer` - `ByteConsumer` trait for received bytes
//! - `kprint` - Leveled, role-tagged stderr logging macros
//! - `env` - Environment variable utilities

pub mod error;
pub mod roster;
pub mod consumer;
pub mod kprint;
pub mod env;

pub use error::{ConfigError, PreforkError, PreforkResult};
pub use roster::{Pid, Roster, Slot};
pub use consumer::{ByteConsumer, LogConsumer, Peer};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};

/// Fixed limits of the server
pub mod constants {
    /// Maximum number of worker processes
    pub const MAX_PROCESS_NUMBER: usize = 16;

    /// Maximum client connections a single worker is expected to hold
    pub const MAX_USER_CONNECT: usize = 65536;

    /// Maximum events returned by one epoll_wait
    pub const MAX_EPOLL_NUMBER: usize = 10000;

    /// Per-worker receive buffer size
    pub const BUFFER_SIZE: usize = 8096;

    /// Default listen() backlog
    pub const LISTEN_BACKLOG: i32 = 5;

    /// Token byte written on a worker channel
    pub const TOKEN: u8 = b'1';
}
