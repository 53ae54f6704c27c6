//! edge-echo: a single-threaded, edge-triggered TCP echo server.
//!
//! Every byte a client sends is written back to that same client. One
//! thread multiplexes all connections over a readiness registry (epoll on
//! Linux, kqueue on macOS) registered edge-triggered, so every handler
//! drains its socket completely before returning.

pub mod config;
pub mod runtime;
