//! Listening socket setup.

use crate::runtime::ServerError;
use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

/// Create a non-blocking TCP listener bound to `addr`.
///
/// `SO_REUSEADDR` is set so a restarted server does not trip over
/// connections lingering in TIME_WAIT. Every failure here is fatal.
pub fn create_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, ServerError> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(ServerError::SocketCreate)?;

    socket
        .set_reuse_address(true)
        .map_err(ServerError::SocketCreate)?;
    socket
        .set_nonblocking(true)
        .map_err(ServerError::SocketCreate)?;
    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Bind(addr, e))?;
    socket
        .listen(backlog)
        .map_err(|e| ServerError::Listen(addr, e))?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}
