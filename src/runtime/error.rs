//! Fatal server errors.
//!
//! Anything that prevents the event loop from starting or from making
//! progress ends up here. Per-connection failures never do; they are
//! logged and the connection is torn down.

use std::io;
use std::net::SocketAddr;

/// Unrecoverable errors surfaced by the runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Creating or configuring the listening socket failed.
    SocketCreate(io::Error),
    /// Binding the listening socket failed (typically address in use).
    Bind(SocketAddr, io::Error),
    /// Putting the socket into listening mode failed.
    Listen(SocketAddr, io::Error),
    /// Creating the readiness registry or registering the listener failed.
    Registry(io::Error),
    /// Waiting for readiness failed with something other than an interrupt.
    Wait(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::SocketCreate(e) => write!(f, "Failed to create listening socket: {}", e),
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ServerError::Listen(addr, e) => write!(f, "Failed to listen on {}: {}", addr, e),
            ServerError::Registry(e) => write!(f, "Readiness registry setup failed: {}", e),
            ServerError::Wait(e) => write!(f, "Readiness wait failed: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::SocketCreate(e)
            | ServerError::Bind(_, e)
            | ServerError::Listen(_, e)
            | ServerError::Registry(e)
            | ServerError::Wait(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_includes_cause() {
        let addr: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        let err = ServerError::Bind(
            addr,
            io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        );
        let msg = err.to_string();
        assert!(msg.contains("0.0.0.0:8080"));
        assert!(msg.contains("address in use"));
        assert!(err.source().is_some());
    }
}
