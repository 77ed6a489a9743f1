//! TCP connect/listen helpers.
//!
//! Both roles disable Nagle's algorithm: frames are small and already batched
//! by the writer task.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::Result;

/// Open a connection to `addr` with `TCP_NODELAY` set.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "connected");
    Ok(stream)
}

/// Bind a listener on `addr`.
pub async fn listen<A: ToSocketAddrs>(addr: A) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    debug!(local = ?listener.local_addr().ok(), "listening");
    Ok(listener)
}

/// Accept one connection with `TCP_NODELAY` set.
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    Ok((stream, peer))
}
