//! Error types for the prefork server

use core::fmt;

/// Result type for prefork operations
pub type PreforkResult<T> = Result<T, PreforkError>;

/// Errors that can occur while setting up or running the server.
///
/// Variants carrying an `i32` hold the raw OS errno of the failing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreforkError {
    /// socket() failed
    Socket(i32),

    /// bind() failed
    Bind(i32),

    /// listen() failed
    Listen(i32),

    /// fcntl()/setsockopt() on a descriptor failed
    SocketOption(i32),

    /// socketpair() for a worker channel failed
    Channel(i32),

    /// fork() failed
    Fork(i32),

    /// epoll_create/epoll_ctl failed
    Poller(i32),

    /// epoll_wait failed with something other than EINTR
    Poll(i32),

    /// eventfd creation or sigaction failed
    Signal(i32),

    /// Worker count outside 1..=MAX_PROCESS_NUMBER
    InvalidPoolSize(usize),

    /// Configuration could not be parsed or validated
    Config(ConfigError),
}

impl PreforkError {
    /// Numeric status surfaced to the embedder.
    ///
    /// OS failures map to their errno, everything else to `EINVAL`.
    pub fn errno(&self) -> i32 {
        match self {
            PreforkError::Socket(e)
            | PreforkError::Bind(e)
            | PreforkError::Listen(e)
            | PreforkError::SocketOption(e)
            | PreforkError::Channel(e)
            | PreforkError::Fork(e)
            | PreforkError::Poller(e)
            | PreforkError::Poll(e)
            | PreforkError::Signal(e) => *e,
            PreforkError::InvalidPoolSize(_) | PreforkError::Config(_) => libc::EINVAL,
        }
    }

    /// True for errors raised before any event loop started.
    pub fn is_setup(&self) -> bool {
        !matches!(self, PreforkError::Poll(_))
    }
}

impl fmt::Display for PreforkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreforkError::Socket(e) => write!(f, "socket failed: errno {}", e),
            PreforkError::Bind(e) => write!(f, "bind failed: errno {}", e),
            PreforkError::Listen(e) => write!(f, "listen failed: errno {}", e),
            PreforkError::SocketOption(e) => write!(f, "socket option failed: errno {}", e),
            PreforkError::Channel(e) => write!(f, "channel creation failed: errno {}", e),
            PreforkError::Fork(e) => write!(f, "fork failed: errno {}", e),
            PreforkError::Poller(e) => write!(f, "poller setup failed: errno {}", e),
            PreforkError::Poll(e) => write!(f, "poll wait failed: errno {}", e),
            PreforkError::Signal(e) => write!(f, "signal setup failed: errno {}", e),
            PreforkError::InvalidPoolSize(n) => write!(f, "invalid pool size: {}", n),
            PreforkError::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for PreforkError {}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Bind address is not an IPv4 literal
    BadAddress(String),

    /// Worker count out of range
    WorkersOutOfRange(usize),

    /// Listen backlog must be positive
    ZeroBacklog,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BadAddress(s) => write!(f, "not an IPv4 address: {:?}", s),
            ConfigError::WorkersOutOfRange(n) => write!(f, "worker count {} out of range", n),
            ConfigError::ZeroBacklog => write!(f, "listen backlog must be positive"),
        }
    }
}

impl From<ConfigError> for PreforkError {
    fn from(e: ConfigError) -> Self {
        PreforkError::Config(e)
    }
}

/// Read the calling thread's errno.
#[inline]
pub fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PreforkError::Bind(libc::EADDRINUSE);
        assert_eq!(format!("{}", e), format!("bind failed: errno {}", libc::EADDRINUSE));

        let e = PreforkError::Config(ConfigError::ZeroBacklog);
        assert_eq!(format!("{}", e), "config error: listen backlog must be positive");
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(PreforkError::Poll(libc::EBADF).errno(), libc::EBADF);
        assert_eq!(PreforkError::InvalidPoolSize(0).errno(), libc::EINVAL);
        assert!(!PreforkError::Poll(libc::EBADF).is_setup());
        assert!(PreforkError::Fork(libc::EAGAIN).is_setup());
    }

    #[test]
    fn test_error_conversion() {
        let err: PreforkError = ConfigError::WorkersOutOfRange(99).into();
        assert!(matches!(err, PreforkError::Config(ConfigError::WorkersOutOfRange(99))));
    }
}
