//! Readiness registry over mio.
//!
//! mio registers every source edge-triggered (`EPOLLET` on Linux,
//! `EV_CLEAR` on kqueue). A notification is delivered when a handle
//! *becomes* ready, so whoever receives one must drain the handle until
//! the operation reports `WouldBlock`, or the handle may never be
//! reported again.
//!
//! The owner reference for a registration is its `Token`. Connection
//! tokens are slab keys; the two highest token values are reserved for
//! the listener and the shutdown waker.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::time::Duration;

/// Token of the listening socket.
pub const LISTENER: Token = Token(usize::MAX);

/// Token of the shutdown waker.
pub const WAKER: Token = Token(usize::MAX - 1);

/// Interest a handle can be registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestSet {
    /// Read-only; the resting state of every connection.
    Read,
    /// Read and write; only while echo bytes are waiting to be flushed.
    ReadWrite,
}

impl From<InterestSet> for Interest {
    fn from(set: InterestSet) -> Self {
        match set {
            InterestSet::Read => Interest::READABLE,
            InterestSet::ReadWrite => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

/// One entry of a ready set, detached from mio's `Events` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub error: bool,
}

impl ReadyEvent {
    fn from_mio(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            error: event.is_error(),
        }
    }

    /// Whether the read path should run for this event.
    ///
    /// Hang-ups and socket errors go through the read path as well; the
    /// read call is what surfaces EOF or the pending socket error.
    pub fn wants_read(&self) -> bool {
        self.readable || self.read_closed || self.error
    }
}

/// Wrapper around `mio::Poll` exposing register-or-update semantics.
pub struct Registry {
    poll: Poll,
    events: Events,
}

impl Registry {
    /// Create a registry able to report up to `max_events` per wait.
    pub fn new(max_events: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(max_events),
        })
    }

    /// Set the interest and owner of `source`, registering it if needed.
    ///
    /// Callers never need to know whether the handle is already known:
    /// a modify is attempted first and a not-found result falls back to
    /// a fresh registration.
    pub fn register_or_update<S>(
        &self,
        source: &mut S,
        token: Token,
        interest: InterestSet,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        let registry = self.poll.registry();
        match registry.reregister(source, token, interest.into()) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                registry.register(source, token, interest.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove `source` from the registry.
    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Create the waker bound to the reserved [`WAKER`] token.
    pub fn waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKER)
    }

    /// Block until at least one handle is ready or `timeout` elapses.
    ///
    /// The ready set replaces the contents of `ready`. Interrupted waits
    /// are retried; any other failure is returned to the caller.
    pub fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<ReadyEvent>) -> io::Result<()> {
        ready.clear();

        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        ready.extend(self.events.iter().map(ReadyEvent::from_mio));
        Ok(())
    }
}
