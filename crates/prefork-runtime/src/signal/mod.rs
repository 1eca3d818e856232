//! Lifecycle signal handling
//!
//! SIGCHLD (master) and SIGTERM/SIGINT (both roles) are turned into bits in a
//! pending mask plus a write to an eventfd the event loop watches. All pool
//! bookkeeping happens later, in the loop.

mod wakeup;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    } else {
        compile_error!("signal handling requires a unix target");
    }
}

pub use wakeup::Wakeup;
