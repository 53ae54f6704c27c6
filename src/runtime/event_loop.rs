//! Single-threaded event loop.
//!
//! Readiness-based model: the registry tells us which sockets became
//! ready, then the handlers perform non-blocking accept/read/write
//! syscalls until each socket is drained. The registry wait is the only
//! place the thread ever blocks.

use crate::config::Config;
use crate::runtime::connection::ConnectionTable;
use crate::runtime::handler::{
    accept_connections, close_connection, handle_readable, handle_writable, CloseReason,
};
use crate::runtime::listener::create_listener;
use crate::runtime::registry::{InterestSet, ReadyEvent, Registry, LISTENER, WAKER};
use crate::runtime::{ServerError, Stats};
use mio::net::TcpListener;
use mio::{Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Lifecycle of the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminated,
}

/// Requests termination of a running event loop from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the loop to stop after the current dispatch batch.
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            // A timed wait still notices the flag.
            error!(error = %e, "Failed to wake event loop");
        }
    }
}

pub struct EventLoop {
    registry: Registry,
    listener: TcpListener,
    connections: ConnectionTable,
    ready: Vec<ReadyEvent>,
    scratch: Vec<u8>,
    max_pending_bytes: usize,
    nodelay: bool,
    wait_timeout: Option<Duration>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    state: LoopState,
    stats: Stats,
}

impl EventLoop {
    /// Create the listener and registry. Any failure here is fatal.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let mut listener = create_listener(addr, config.backlog)?;

        let registry = Registry::new(config.max_events).map_err(ServerError::Registry)?;
        registry
            .register_or_update(&mut listener, LISTENER, InterestSet::Read)
            .map_err(ServerError::Registry)?;
        let waker = Arc::new(registry.waker().map_err(ServerError::Registry)?);

        info!(
            addr = %listener.local_addr().unwrap_or(addr),
            backlog = config.backlog,
            buffer_size = config.buffer_size,
            max_events = config.max_events,
            max_pending_bytes = config.max_pending_bytes,
            "Listening"
        );

        Ok(Self {
            registry,
            listener,
            connections: ConnectionTable::with_capacity(config.max_events),
            ready: Vec::with_capacity(config.max_events),
            scratch: vec![0u8; config.buffer_size],
            max_pending_bytes: config.max_pending_bytes,
            nodelay: config.nodelay,
            wait_timeout: config.wait_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
            state: LoopState::Running,
            stats: Stats::default(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            requested: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until shutdown is requested or the registry fails.
    ///
    /// Either way every remaining connection is closed before returning.
    /// A registry failure is returned as [`ServerError::Wait`].
    pub fn run(&mut self) -> Result<Stats, ServerError> {
        let result = self.run_until_stopped();
        if let Err(ref e) = result {
            error!(error = %e, "Event loop failed");
        }
        self.terminate();
        result.map(|()| self.stats)
    }

    fn run_until_stopped(&mut self) -> Result<(), ServerError> {
        while self.state == LoopState::Running {
            if self.shutdown.load(Ordering::Acquire) {
                info!("Shutdown requested");
                break;
            }

            self.turn(self.wait_timeout)?;
        }
        Ok(())
    }

    /// Wait once and dispatch every event in the resulting ready set.
    fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        self.registry
            .wait(timeout, &mut self.ready)
            .map_err(ServerError::Wait)?;

        let ready = std::mem::take(&mut self.ready);
        for event in &ready {
            self.dispatch(*event);
        }
        self.ready = ready;
        Ok(())
    }

    fn dispatch(&mut self, event: ReadyEvent) {
        match event.token {
            LISTENER => accept_connections(
                &self.listener,
                &self.registry,
                &mut self.connections,
                self.nodelay,
                &mut self.stats,
            ),
            WAKER => trace!("Woken"),
            Token(conn_id) => {
                if !self.connections.contains(conn_id) {
                    self.stats.stale_events += 1;
                    trace!(conn_id, "Ignoring event for released connection");
                    return;
                }

                if event.wants_read() {
                    handle_readable(
                        conn_id,
                        &self.registry,
                        &mut self.connections,
                        &mut self.scratch,
                        self.max_pending_bytes,
                        &mut self.stats,
                    );
                }

                // Both bits can be set; the read path may have released it.
                if event.writable && self.connections.contains(conn_id) {
                    handle_writable(conn_id, &self.registry, &mut self.connections, &mut self.stats);
                }
            }
        }
    }

    fn terminate(&mut self) {
        if self.state == LoopState::Terminated {
            return;
        }

        if !self.connections.is_empty() {
            info!(open = self.connections.len(), "Closing remaining connections");
        }
        for conn_id in self.connections.ids() {
            close_connection(
                conn_id,
                &self.registry,
                &mut self.connections,
                CloseReason::Shutdown,
                &mut self.stats,
            );
        }
        if let Err(e) = self.registry.deregister(&mut self.listener) {
            debug!(error = %e, "Failed to deregister listener");
        }

        self.state = LoopState::Terminated;
        info!(
            accepted = self.stats.accepted,
            closed = self.stats.closed,
            bytes_read = self.stats.bytes_read,
            bytes_written = self.stats.bytes_written,
            "Event loop terminated"
        );
    }
}
