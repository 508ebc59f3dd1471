//! Transport abstraction layer for the GPCM server.
//!
//! Provides the [`Transport`] (accept capability) and [`Connection`]
//! (accepted stream) traits the connection core is written against.
//!
//! # Feature Flags
//!
//! - `tcp` (default): bounded TCP transport with pooled read buffers

mod error;
#[cfg(feature = "tcp")]
mod pool;
#[cfg(feature = "tcp")]
mod tcp;

pub use error::TransportError;
#[cfg(feature = "tcp")]
pub use pool::BufferPool;
#[cfg(feature = "tcp")]
pub use tcp::{TcpConnection, TcpTransport, TcpTransportConfig};

use std::future::Future;
use std::net::SocketAddr;

/// Accepts new incoming connections.
///
/// Capacity limits are the transport's business: when it is full it
/// rejects newcomers itself, so every stream it yields may be served.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for and accepts the next incoming connection.
    ///
    /// Resolves to an error once [`shutdown`](Self::shutdown) has run.
    fn accept(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Returns a stream the caller could not use, freeing its slot.
    ///
    /// Streams already handed to a session are never passed back here;
    /// they are released by being dropped, so dropping a connection must
    /// free the same resources.
    fn release(&self, conn: Self::Connection);

    /// Closes the listening resource and releases pooled resources.
    fn shutdown(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether [`shutdown`](Self::shutdown) has run.
    fn is_closed(&self) -> bool;

    /// The address the transport listens on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// A single accepted stream that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends data to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next chunk of bytes from the remote peer.
    ///
    /// Returns `Ok(None)` when the peer closed the connection.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Address of the remote peer.
    fn peer_addr(&self) -> SocketAddr;
}
