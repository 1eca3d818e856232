//! Prefork Server
//!
//! A master process plus a fixed pool of forked workers sharing one
//! listening socket. Workers log whatever they receive.
//!
//! Usage:
//!     cargo build --release -p prefork-server
//!     ./target/release/prefork-server [addr] [port] [workers]
//!
//! Arguments override the `PREFORK_*` environment, which overrides the
//! built-in defaults (127.0.0.1 9000 7).
//!
//! Test with:
//!     PREFORK_LOG_LEVEL=debug ./target/release/prefork-server &
//!     echo "hello" | nc -q0 localhost 9000
//!     kill -TERM %1      # master forwards to every worker, then exits 0

use prefork::{kerror, run_server, LogConsumer, ProcessRole, ServerConfig, STATUS};

fn parse_args(args: &[String]) -> Result<ServerConfig, String> {
    let mut config = ServerConfig::from_env();
    if let Some(addr) = args.get(1) {
        config = config.addr_str(addr).map_err(|e| e.to_string())?;
    }
    if let Some(port) = args.get(2) {
        config = config.port(port.parse().map_err(|_| format!("bad port: {}", port))?);
    }
    if let Some(workers) = args.get(3) {
        config = config.workers(workers.parse().map_err(|_| format!("bad worker count: {}", workers))?);
    }
    Ok(config)
}

fn main() {
    prefork::init_logging();

    let args: Vec<String> = std::env::args().collect();
    let config = match parse_args(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{}: {}", STATUS, msg);
            eprintln!("usage: {} [addr] [port] [workers]", STATUS);
            std::process::exit(2);
        }
    };

    println!("{}", STATUS);
    eprintln!(
        "{}: {}:{} with {} workers ({:?})",
        STATUS, config.addr, config.port, config.workers, config.accept_policy
    );

    let exit = match run_server(&config, LogConsumer) {
        Ok(exit) => exit,
        Err(e) => {
            kerror!("startup failed: {}", e);
            std::process::exit(e.errno());
        }
    };

    if exit.role == ProcessRole::Master {
        eprintln!("{}: master exiting with {}", STATUS, exit.code);
    }
    std::process::exit(exit.code);
}
