//! Accept and I/O handlers.
//!
//! Every handler runs to exhaustion: accepts until the backlog is empty,
//! reads until the socket has nothing more, writes until the echo is
//! flushed or the socket is full. Stopping early under edge-triggered
//! notification would leave a handle ready with no further wakeup.

use crate::runtime::connection::{Connection, ConnectionTable};
use crate::runtime::registry::{InterestSet, Registry, LISTENER, WAKER};
use crate::runtime::Stats;
use mio::net::TcpListener;
use mio::Token;
use std::io::{self, Read, Write};
use tracing::{debug, error, info, trace, warn};

/// How a read drain ended. Each variant carries the bytes drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The socket reported `WouldBlock`.
    Drained(usize),
    /// The echo backlog reached its limit; input stays in the kernel.
    Paused(usize),
    /// The peer shut down its write side.
    Eof(usize),
}

impl ReadOutcome {
    pub fn bytes(&self) -> usize {
        match *self {
            ReadOutcome::Drained(n) | ReadOutcome::Paused(n) | ReadOutcome::Eof(n) => n,
        }
    }
}

/// How a write flush ended. Each variant carries the bytes written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every pending byte was written.
    Complete(usize),
    /// The socket is full; the offset is kept for the next writable event.
    Blocked(usize),
}

/// Why a connection was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    ReadError,
    WriteError,
    Registry,
    Shutdown,
}

/// Read from `conn` until the socket is empty, the peer closes, or the
/// unflushed echo backlog reaches `max_backlog`.
///
/// Only the input drained by this call is left in the read buffer.
pub fn drain_read<S: Read>(
    conn: &mut Connection<S>,
    scratch: &mut [u8],
    max_backlog: usize,
) -> io::Result<ReadOutcome> {
    conn.begin_read();
    let mut total = 0;

    loop {
        if conn.backlog() >= max_backlog {
            return Ok(ReadOutcome::Paused(total));
        }

        match conn.stream.read(scratch) {
            Ok(0) => return Ok(ReadOutcome::Eof(total)),
            Ok(n) => {
                conn.append_read(&scratch[..n]);
                total += n;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(ReadOutcome::Drained(total));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write pending echo bytes until they are all out or the socket is full.
///
/// The written offset only moves forward, so a flush resumed on a later
/// writable event never re-sends bytes.
pub fn flush_write<S: Write>(conn: &mut Connection<S>) -> io::Result<FlushOutcome> {
    let mut total = 0;

    while conn.has_pending_write() {
        match conn.write_pending() {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => {
                conn.advance_written(n);
                total += n;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(FlushOutcome::Blocked(total));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(FlushOutcome::Complete(total))
}

/// Accept every pending connection on the listener.
///
/// New connections are registered for read interest only. Failures are
/// confined to the connection being accepted.
pub fn accept_connections(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut ConnectionTable,
    nodelay: bool,
    stats: &mut Stats,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                }

                let conn_id = connections.insert(Connection::new(stream, peer_addr));
                debug_assert!(Token(conn_id) != LISTENER && Token(conn_id) != WAKER);

                let registered = match connections.get_mut(conn_id) {
                    Some(conn) => registry.register_or_update(
                        &mut conn.stream,
                        Token(conn_id),
                        InterestSet::Read,
                    ),
                    None => continue,
                };

                if let Err(e) = registered {
                    warn!(conn_id, peer = %peer_addr, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                stats.accepted += 1;
                info!(conn_id, peer = %peer_addr, "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if is_transient_accept_error(e) => {
                debug!(error = %e, "Transient accept failure");
            }
            Err(e) => {
                // Persistent failures (e.g. out of descriptors) would spin here.
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Handle a readable (or hung-up) notification for `conn_id`.
pub fn handle_readable(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionTable,
    scratch: &mut [u8],
    max_pending_bytes: usize,
    stats: &mut Stats,
) {
    let close = match connections.get_mut(conn_id) {
        Some(conn) => read_and_stage(conn_id, conn, registry, scratch, max_pending_bytes, stats),
        None => return,
    };

    if let Some(reason) = close {
        close_connection(conn_id, registry, connections, reason, stats);
    }
}

fn read_and_stage(
    conn_id: usize,
    conn: &mut Connection,
    registry: &Registry,
    scratch: &mut [u8],
    max_pending_bytes: usize,
    stats: &mut Stats,
) -> Option<CloseReason> {
    let outcome = match drain_read(conn, scratch, max_pending_bytes) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(conn_id, peer = %conn.peer(), error = %e, "Read failed");
            return Some(CloseReason::ReadError);
        }
    };

    let n = outcome.bytes();
    stats.bytes_read += n as u64;
    if n > 0 {
        trace!(conn_id, peer = %conn.peer(), bytes = conn.read_buf().len(), "Drained input");
        conn.stage_echo();
    }

    match outcome {
        ReadOutcome::Eof(_) => {
            if conn.has_pending_write() {
                flush_before_close(conn_id, conn, stats);
            }
            Some(CloseReason::PeerClosed)
        }
        ReadOutcome::Drained(_) | ReadOutcome::Paused(_) => {
            if let ReadOutcome::Paused(_) = outcome {
                stats.read_pauses += 1;
                debug!(conn_id, pending = conn.pending().len(), "Echo backlog full, pausing reads");
            }
            if n == 0 {
                return None;
            }

            let interest = conn.interest();
            update_interest(conn_id, conn, registry, interest)
        }
    }
}

fn update_interest(
    conn_id: usize,
    conn: &mut Connection,
    registry: &Registry,
    interest: InterestSet,
) -> Option<CloseReason> {
    match registry.register_or_update(&mut conn.stream, Token(conn_id), interest) {
        Ok(()) => {
            conn.set_registered(interest);
            None
        }
        Err(e) => {
            warn!(conn_id, error = %e, "Failed to update interest");
            Some(CloseReason::Registry)
        }
    }
}

/// One non-blocking attempt to deliver the echo of a half-closed peer.
fn flush_before_close(conn_id: usize, conn: &mut Connection, stats: &mut Stats) {
    match flush_write(conn) {
        Ok(FlushOutcome::Complete(n)) => stats.bytes_written += n as u64,
        Ok(FlushOutcome::Blocked(n)) => {
            stats.bytes_written += n as u64;
            debug!(conn_id, dropped = conn.pending().len(), "Peer closed with echo unflushed");
        }
        Err(e) => debug!(conn_id, error = %e, "Final flush failed"),
    }
}

/// Handle a writable notification for `conn_id`.
pub fn handle_writable(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionTable,
    stats: &mut Stats,
) {
    let close = match connections.get_mut(conn_id) {
        Some(conn) => write_and_settle(conn_id, conn, registry, stats),
        None => return,
    };

    if let Some(reason) = close {
        close_connection(conn_id, registry, connections, reason, stats);
    }
}

fn write_and_settle(
    conn_id: usize,
    conn: &mut Connection,
    registry: &Registry,
    stats: &mut Stats,
) -> Option<CloseReason> {
    // Writable with nothing queued, e.g. right after the upgrade.
    if !conn.has_pending_write() {
        return None;
    }

    match flush_write(conn) {
        Ok(FlushOutcome::Complete(n)) => {
            stats.bytes_written += n as u64;
            trace!(conn_id, peer = %conn.peer(), bytes = n, "Echo flushed");
            conn.finish_flush();

            // Re-arming read interest also re-reports input left behind
            // by a paused drain.
            update_interest(conn_id, conn, registry, InterestSet::Read)
        }
        Ok(FlushOutcome::Blocked(n)) => {
            stats.bytes_written += n as u64;
            trace!(
                conn_id,
                written = conn.written(),
                remaining = conn.pending().len(),
                "Socket full, flush deferred"
            );
            None
        }
        Err(e) => {
            warn!(conn_id, peer = %conn.peer(), error = %e, "Write failed");
            Some(CloseReason::WriteError)
        }
    }
}

/// Deregister, close and release a connection.
///
/// A no-op if the connection is already gone, so a handle can never be
/// released twice.
pub fn close_connection(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionTable,
    reason: CloseReason,
    stats: &mut Stats,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        if let Err(e) = registry.deregister(&mut conn.stream) {
            debug!(conn_id, error = %e, "Deregister failed");
        }

        stats.closed += 1;
        match reason {
            CloseReason::PeerClosed => stats.peer_closed += 1,
            CloseReason::ReadError | CloseReason::WriteError | CloseReason::Registry => {
                stats.errored += 1
            }
            CloseReason::Shutdown => {}
        }

        info!(conn_id, peer = %conn.peer(), reason = ?reason, "Connection closed");
        // Dropping `conn` closes the socket.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::ScriptedStream;

    fn connection() -> Connection<ScriptedStream> {
        Connection::new(ScriptedStream::default(), "10.0.0.1:5000".parse().unwrap())
    }

    #[test]
    fn test_drain_reads_until_would_block() {
        let mut conn = connection();
        conn.stream.push_read(b"hello ").push_read(b"edge ").push_read(b"world");
        let mut scratch = [0u8; 4];

        let outcome = drain_read(&mut conn, &mut scratch, usize::MAX).unwrap();
        assert_eq!(outcome, ReadOutcome::Drained(16));
        assert_eq!(conn.read_buf(), b"hello edge world");
        // Six partial reads through a 4-byte scratch area, then WouldBlock.
        assert_eq!(conn.stream.read_calls, 7);
    }

    #[test]
    fn test_drain_keeps_only_latest_burst() {
        let mut conn = connection();
        let mut scratch = [0u8; 64];

        conn.stream.push_read(b"first");
        drain_read(&mut conn, &mut scratch, usize::MAX).unwrap();
        conn.stage_echo();

        conn.stream.push_read(b"second");
        drain_read(&mut conn, &mut scratch, usize::MAX).unwrap();
        assert_eq!(conn.read_buf(), b"second");
        conn.stage_echo();
        assert_eq!(conn.pending(), b"firstsecond");
    }

    #[test]
    fn test_drain_retries_interrupted_reads() {
        let mut conn = connection();
        conn.stream
            .push_read_err(io::ErrorKind::Interrupted)
            .push_read(b"ok");
        let mut scratch = [0u8; 16];

        let outcome = drain_read(&mut conn, &mut scratch, usize::MAX).unwrap();
        assert_eq!(outcome, ReadOutcome::Drained(2));
    }

    #[test]
    fn test_drain_reports_eof_after_data() {
        let mut conn = connection();
        conn.stream.push_read(b"ping\n").push_eof();
        let mut scratch = [0u8; 16];

        let outcome = drain_read(&mut conn, &mut scratch, usize::MAX).unwrap();
        assert_eq!(outcome, ReadOutcome::Eof(5));
        assert_eq!(conn.read_buf(), b"ping\n");
    }

    #[test]
    fn test_drain_surfaces_genuine_errors() {
        let mut conn = connection();
        conn.stream.push_read_err(io::ErrorKind::ConnectionReset);
        let mut scratch = [0u8; 16];

        let err = drain_read(&mut conn, &mut scratch, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_drain_pauses_at_backlog_limit() {
        let mut conn = connection();
        conn.stream.push_read(&[7u8; 100]);
        let mut scratch = [0u8; 16];

        let outcome = drain_read(&mut conn, &mut scratch, 40).unwrap();
        // Stops at the first chunk boundary at or past the limit.
        assert_eq!(outcome, ReadOutcome::Paused(48));
        assert_eq!(conn.backlog(), 48);

        // Unread input is still there once the backlog is flushed.
        for expected in [ReadOutcome::Paused(48), ReadOutcome::Drained(4)] {
            conn.stage_echo();
            conn.stream.accept_writes(&[48]);
            assert_eq!(flush_write(&mut conn).unwrap(), FlushOutcome::Complete(48));
            conn.finish_flush();
            assert_eq!(drain_read(&mut conn, &mut scratch, 40).unwrap(), expected);
        }
        assert_eq!(conn.stream.output.len(), 96);
    }

    #[test]
    fn test_flush_resumes_from_retained_offset() {
        let mut conn = connection();
        conn.append_read(b"0123456789");
        conn.stage_echo();

        conn.stream.accept_writes(&[3, 4]);
        assert_eq!(flush_write(&mut conn).unwrap(), FlushOutcome::Blocked(7));
        assert_eq!(conn.written(), 7);
        assert_eq!(conn.pending(), b"789");

        conn.stream.accept_writes(&[100]);
        assert_eq!(flush_write(&mut conn).unwrap(), FlushOutcome::Complete(3));
        assert_eq!(conn.stream.output, b"0123456789");
    }

    #[test]
    fn test_flush_treats_zero_write_as_error() {
        let mut conn = connection();
        conn.append_read(b"abc");
        conn.stage_echo();
        conn.stream.accept_writes(&[0]);

        let err = flush_write(&mut conn).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_flush_surfaces_genuine_errors() {
        let mut conn = connection();
        conn.append_read(b"abc");
        conn.stage_echo();
        conn.stream
            .push_write_err(io::ErrorKind::Interrupted)
            .push_write_err(io::ErrorKind::BrokenPipe);

        let err = flush_write(&mut conn).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(conn.stream.output.is_empty());
    }

    #[test]
    fn test_flush_with_nothing_pending() {
        let mut conn = connection();
        assert_eq!(flush_write(&mut conn).unwrap(), FlushOutcome::Complete(0));
    }
}
