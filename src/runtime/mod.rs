//! Readiness-driven runtime.
//!
//! One thread, one registry, one listener:
//! - `listener`: non-blocking listening socket setup
//! - `registry`: edge-triggered readiness over mio (epoll/kqueue)
//! - `connection`: per-client buffers and the slab that owns them
//! - `handler`: accept, read-drain and write-flush logic
//! - `event_loop`: wait/dispatch driver and shutdown

mod connection;
mod error;
mod event_loop;
mod handler;
mod listener;
mod registry;
mod stats;

#[cfg(test)]
mod testing;

pub use error::ServerError;
pub use event_loop::{EventLoop, LoopState, ShutdownHandle};
pub use stats::Stats;

use crate::config::Config;

/// Bind the listener and serve until the loop terminates.
pub fn run(config: &Config) -> Result<Stats, ServerError> {
    let mut event_loop = EventLoop::bind(config)?;
    event_loop.run()
}
