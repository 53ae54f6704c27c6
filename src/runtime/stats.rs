//! Event loop counters.

/// Counters maintained by the event loop thread.
///
/// No atomics: only the loop thread touches them. A copy is handed back
/// when the loop terminates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Connections accepted and registered.
    pub accepted: u64,
    /// Connections released, whatever the reason.
    pub closed: u64,
    /// Connections released because the peer shut down its write side.
    pub peer_closed: u64,
    /// Connections released after a read or write error.
    pub errored: u64,
    /// Bytes drained from client sockets.
    pub bytes_read: u64,
    /// Bytes echoed back to clients.
    pub bytes_written: u64,
    /// Events ignored because their connection was already gone.
    pub stale_events: u64,
    /// Read drains cut short by a full echo backlog.
    pub read_pauses: u64,
}

impl Stats {
    /// Connections currently open according to the counters.
    pub fn open(&self) -> u64 {
        self.accepted - self.closed
    }
}
