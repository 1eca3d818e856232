//! # prefork-runtime
//!
//! Linux runtime for the prefork server.
//!
//! This crate provides:
//! - The shared listening socket (`listener`)
//! - Edge-triggered epoll wrapper (`poller`)
//! - Master/worker token channels (`channel`)
//! - Pool creation, dispatch and reaping (`pool`)
//! - Async-signal-safe lifecycle signal handling (`signal`)
//! - The master and worker event loops

// Platform gate
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod config;
        pub mod listener;
        pub mod poller;
        pub mod channel;
        pub mod pool;
        pub mod signal;
        pub mod master;
        pub mod worker;
    } else {
        compile_error!("prefork-runtime needs epoll and eventfd (Linux only)");
    }
}

// Re-exports
pub use config::ServerConfig;
pub use listener::{Accept, Listener};
pub use pool::{create_pool, Dispatch, MasterPool, Role, WorkerPool};
pub use signal::{block_lifecycle_signals, install, Notice, ProcessKind, SignalState};
pub use master::run_master;
pub use worker::{run_worker, AcceptPolicy};

/// Tests that fork reap with `waitpid(-1)` and must not see each other's
/// children.
#[cfg(test)]
pub(crate) static FORK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
