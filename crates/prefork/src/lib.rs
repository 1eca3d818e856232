//! # prefork - Prefork TCP Server
//!
//! One listening socket, one master process, a fixed pool of forked workers.
//!
//! ## Features
//!
//! - **Shared socket**: created before the fork, inherited by every worker
//! - **Token dispatch**: the master never accepts; each readiness edge on the
//!   socket becomes a one-byte token for the next live worker (round-robin)
//! - **Edge-triggered I/O**: every descriptor is drained to `EAGAIN`
//! - **Cascading shutdown**: SIGTERM to the master is forwarded to all
//!   workers; the master exits once every worker has been reaped
//! - **Pluggable bytes**: received data goes to a `ByteConsumer`
//!
//! ## Quick Start
//!
//! ```ignore
//! use prefork::{run_server, LogConsumer, ServerConfig};
//!
//! fn main() {
//!     prefork::init_logging();
//!     let config = ServerConfig::from_env().port(9000).workers(4);
//!     match run_server(&config, LogConsumer) {
//!         Ok(exit) => std::process::exit(exit.code),
//!         Err(e) => {
//!             prefork::kerror!("startup failed: {}", e);
//!             std::process::exit(e.errno());
//!         }
//!     }
//! }
//! ```
//!
//! `run_server` returns in the master and in every worker. Check
//! `Exit::role` if the caller needs to tell them apart.
//!
//! ## Architecture
//!
//! ```text
//!                  clients
//!                     |
//!            shared listening socket
//!             |                  |
//!   readiness (master)      accept (workers)
//!             |                  ^
//!             v                  |
//!     ┌──────────────┐   token   ┌──────────┐
//!     │    master    │ --------> │ worker i │ -> ByteConsumer
//!     │ roster, reap │           └──────────┘
//!     └──────────────┘
//! ```

// Re-export core types
pub use prefork_core::{
    ByteConsumer,
    LogConsumer,
    Peer,
    PreforkError,
    PreforkResult,
    ConfigError,
    Roster,
    Slot,
    constants,
};

// Re-export kprint macros for logging
pub use prefork_core::{kprint, kerror, kwarn, kinfo, kdebug, ktrace};
pub use prefork_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use prefork_core::{env_get, env_get_bool, env_get_opt, env_get_str};

// Re-export runtime types
pub use prefork_runtime::{
    AcceptPolicy,
    Listener,
    ServerConfig,
};

use prefork_runtime::pool::{create_pool, MasterPool, Role, WorkerPool};
use prefork_runtime::signal::{block_lifecycle_signals, install, MaskGuard, ProcessKind, SignalState};
use prefork_runtime::{run_master, run_worker};

/// Status string printed by the server binary.
pub const STATUS: &str = "prefork-server";

/// Which process a `run_server` return happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Master,
    Worker(usize),
}

/// How a process left its event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub role: ProcessRole,
    /// 0 on a clean stop, otherwise the errno that ended the loop
    pub code: i32,
}

/// Validate `config`, open the listening socket and `serve` it.
///
/// `Err` is only returned for failures before the pool exists.
pub fn run_server<C: ByteConsumer>(config: &ServerConfig, consumer: C) -> PreforkResult<Exit> {
    config.validate()?;
    let listener = Listener::setup(config.addr, config.port, config.backlog)?;
    kinfo!("listening on {}", listener.local_addr()?);
    serve(listener, config, consumer)
}

/// Fork the pool over an already listening socket and run this process's
/// loop.
///
/// Returns once per process: in the master after every worker has been
/// reaped (the listener is torn down first), in a worker after SIGTERM or
/// SIGINT.
pub fn serve<C: ByteConsumer>(
    listener: Listener,
    config: &ServerConfig,
    mut consumer: C,
) -> PreforkResult<Exit> {
    // Lifecycle signals stay blocked until each process has its handler.
    let mask = block_lifecycle_signals()?;

    match create_pool(&listener, config.workers)? {
        Role::Master(mut pool) => {
            kprint::set_role_master();
            let result = master_main(&mut pool, &listener, mask);
            if result.is_err() {
                pool.stop_and_wait();
            }
            listener.teardown();
            Ok(Exit { role: ProcessRole::Master, code: exit_code(result) })
        }
        Role::Worker(pool) => {
            kprint::set_role_worker(pool.index());
            let result = worker_main(&pool, &listener, mask, &mut consumer, config.accept_policy);
            Ok(Exit { role: ProcessRole::Worker(pool.index()), code: exit_code(result) })
        }
    }
}

fn master_main(pool: &mut MasterPool, listener: &Listener, mask: MaskGuard) -> PreforkResult<()> {
    let signals = SignalState::new()?;
    let _handlers = install(&signals, ProcessKind::Master)?;
    drop(mask);
    run_master(pool, listener, &signals)
}

fn worker_main<C: ByteConsumer>(
    pool: &WorkerPool,
    listener: &Listener,
    mask: MaskGuard,
    consumer: &mut C,
    policy: AcceptPolicy,
) -> PreforkResult<()> {
    let signals = SignalState::new()?;
    let _handlers = install(&signals, ProcessKind::Worker)?;
    drop(mask);
    run_worker(pool, listener, &signals, consumer, policy)
}

fn exit_code(result: PreforkResult<()>) -> i32 {
    match result {
        Ok(()) => {
            kinfo!("stopped");
            0
        }
        Err(e) if e.is_setup() => {
            kerror!("setup failed after fork: {}", e);
            e.errno()
        }
        Err(e) => {
            kerror!("event loop failed: {}", e);
            e.errno()
        }
    }
}
