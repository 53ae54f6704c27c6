//! Per-connection state and the table that owns it.
//!
//! Each connection tracks the bytes it has drained from the socket, the
//! echo bytes still waiting to be flushed, and how far the flush got.

use crate::runtime::registry::InterestSet;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use slab::Slab;
use std::io::{self, Write};
use std::net::SocketAddr;

/// A single client connection.
///
/// Generic over the stream so the drain logic can run against scripted
/// streams in tests; the runtime always uses a mio `TcpStream`.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    /// Non-blocking client socket.
    pub stream: S,
    /// Peer IP address in string form.
    pub peer_ip: String,
    /// Peer port.
    pub peer_port: u16,
    /// Input drained during the most recent read dispatch.
    read_buf: BytesMut,
    /// Echo bytes awaiting transmission.
    write_buf: BytesMut,
    /// Bytes of `write_buf` already handed to the kernel.
    written: usize,
    /// Interest last accepted by the registry.
    registered: InterestSet,
}

impl<S> Connection<S> {
    /// Create a connection with empty buffers.
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer_ip: peer.ip().to_string(),
            peer_port: peer.port(),
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            written: 0,
            registered: InterestSet::Read,
        }
    }

    /// Forget the previous read burst before draining a new one.
    pub fn begin_read(&mut self) {
        self.read_buf.clear();
    }

    /// Append freshly drained input.
    pub fn append_read(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Input drained by the current read dispatch.
    pub fn read_buf(&self) -> &[u8] {
        &self.read_buf
    }

    /// Queue the drained input for echo, unchanged.
    ///
    /// Already-flushed bytes are dropped from the front first, so the
    /// buffer only ever holds unflushed data plus the new input.
    pub fn stage_echo(&mut self) {
        if self.written > 0 {
            self.write_buf.advance(self.written);
            self.written = 0;
        }
        self.write_buf.extend_from_slice(&self.read_buf);
    }

    /// Bytes still waiting to be written.
    pub fn pending(&self) -> &[u8] {
        &self.write_buf[self.written..]
    }

    /// Unflushed bytes plus input drained but not yet staged.
    ///
    /// Only meaningful between `begin_read` and `stage_echo`.
    pub fn backlog(&self) -> usize {
        self.write_buf.len() - self.written + self.read_buf.len()
    }

    /// Record that `n` more bytes reached the kernel.
    pub fn advance_written(&mut self, n: usize) {
        debug_assert!(self.written + n <= self.write_buf.len());
        self.written += n;
    }

    /// Bytes written so far from the current write buffer.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Whether echo bytes remain to be flushed.
    pub fn has_pending_write(&self) -> bool {
        self.written < self.write_buf.len()
    }

    /// Reset both buffers after a completed flush.
    pub fn finish_flush(&mut self) {
        self.read_buf.clear();
        self.write_buf.clear();
        self.written = 0;
    }

    /// Interest this connection should be registered with right now.
    pub fn interest(&self) -> InterestSet {
        if self.has_pending_write() {
            InterestSet::ReadWrite
        } else {
            InterestSet::Read
        }
    }

    /// Interest the registry currently holds for this connection.
    pub fn registered(&self) -> InterestSet {
        self.registered
    }

    pub fn set_registered(&mut self, interest: InterestSet) {
        self.registered = interest;
    }

    /// Peer address for logging.
    pub fn peer(&self) -> String {
        format!("{}:{}", self.peer_ip, self.peer_port)
    }
}

impl<S: Write> Connection<S> {
    /// Issue one non-blocking write of the unflushed bytes.
    ///
    /// Returns what the stream accepted; the caller advances the offset.
    pub fn write_pending(&mut self) -> io::Result<usize> {
        self.stream.write(&self.write_buf[self.written..])
    }
}

/// Owner of every live connection, keyed by registry token.
///
/// Removing an entry invalidates its key, so events that arrive for it
/// later in the same ready set find nothing and are dropped.
pub struct ConnectionTable {
    connections: Slab<Connection>,
}

impl ConnectionTable {
    /// Create an empty table with room for `capacity` connections.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: Slab::with_capacity(capacity),
        }
    }

    /// Store a new connection and return its key.
    pub fn insert(&mut self, conn: Connection) -> usize {
        self.connections.insert(conn)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection, returning it if it was still present.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Keys of every live connection.
    pub fn ids(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }
}
