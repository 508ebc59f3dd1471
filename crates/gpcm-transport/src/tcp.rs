//! Bounded TCP transport.
//!
//! Admission is controlled by a semaphore: every accepted stream holds one
//! permit for as long as it lives. When no permit is left, the newcomer is
//! sent the configured full-server message and closed before the core ever
//! sees it.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use crate::{BufferPool, Connection, Transport, TransportError};

/// How long a rejected client gets to receive the full-server message.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings for [`TcpTransport::bind`].
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address to listen on. Port 0 lets the OS pick one.
    pub bind_addr: String,
    /// Maximum number of simultaneously open streams.
    pub max_connections: usize,
    /// Sent verbatim to clients that arrive while the server is full.
    pub server_full_message: String,
    /// Initial capacity of each connection's read buffer.
    pub read_buffer_size: usize,
    /// Maximum number of idle read buffers kept for reuse.
    pub buffer_pool_size: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:29900".to_string(),
            max_connections: 1000,
            server_full_message:
                "\\error\\\\err\\0\\fatal\\\\errmsg\\The server is full. Please try again later.\\id\\1\\final\\"
                    .to_string(),
            read_buffer_size: 4096,
            buffer_pool_size: 256,
        }
    }
}

/// A [`Transport`] over a TCP listener with a connection cap.
pub struct TcpTransport {
    listener: parking_lot::Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    permits: Arc<Semaphore>,
    max_connections: usize,
    server_full_message: Arc<[u8]>,
    pool: Arc<BufferPool>,
    closed: CancellationToken,
}

impl TcpTransport {
    /// Binds a new TCP transport.
    pub async fn bind(config: TcpTransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        let max_connections = config.max_connections.max(1);

        tracing::info!(%local_addr, max_connections, "TCP transport listening");

        Ok(Self {
            listener: parking_lot::Mutex::new(Some(Arc::new(listener))),
            local_addr,
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            server_full_message: Arc::from(config.server_full_message.into_bytes()),
            pool: Arc::new(BufferPool::new(
                config.read_buffer_size.max(1),
                config.buffer_pool_size,
            )),
            closed: CancellationToken::new(),
        })
    }

    /// Number of streams that can still be admitted.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// The shared read-buffer pool.
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    fn reject_full(&self, mut stream: TcpStream, peer: SocketAddr) {
        tracing::warn!(
            %peer,
            max = self.max_connections,
            "server full, rejecting connection"
        );
        let message = Arc::clone(&self.server_full_message);
        tokio::spawn(async move {
            let write = async {
                stream.write_all(&message).await?;
                stream.shutdown().await
            };
            match tokio::time::timeout(REJECT_WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(%peer, error = %e, "failed to notify rejected client");
                }
                Err(_) => {
                    tracing::debug!(%peer, "rejected client did not drain full-server message");
                }
            }
        });
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&self) -> Result<TcpConnection, TransportError> {
        let listener = self
            .listener
            .lock()
            .clone()
            .ok_or(TransportError::Shutdown)?;

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(TransportError::Shutdown),
                accepted = listener.accept() => accepted.map_err(TransportError::AcceptFailed)?,
            };

            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    self.reject_full(stream, peer);
                    continue;
                }
                Err(TryAcquireError::Closed) => return Err(TransportError::Shutdown),
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
            }

            tracing::debug!(%peer, "accepted TCP connection");
            return Ok(TcpConnection::new(stream, peer, Arc::clone(&self.pool), permit));
        }
    }

    fn release(&self, conn: TcpConnection) {
        tracing::debug!(peer = %conn.peer, "releasing unused connection");
        drop(conn);
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let listener = self.listener.lock().take();
        drop(listener);
        self.permits.close();
        self.pool.drain();
        tracing::info!(local_addr = %self.local_addr, "TCP transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.local_addr)
    }
}

/// One accepted TCP stream.
///
/// Holds a capacity permit and a pooled read buffer; both go back when the
/// connection is dropped.
pub struct TcpConnection {
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    buffer: Mutex<BytesMut>,
    pool: Arc<BufferPool>,
    _permit: OwnedSemaphorePermit,
}

impl TcpConnection {
    fn new(
        stream: TcpStream,
        peer: SocketAddr,
        pool: Arc<BufferPool>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            buffer: Mutex::new(pool.take()),
            pool,
            _permit: permit,
        }
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        let mut buf = self.buffer.lock().await;
        let n = reader
            .read_buf(&mut *buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Ok(None);
        }
        let data = buf.to_vec();
        buf.clear();
        Ok(Some(data))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        let buf = std::mem::take(self.buffer.get_mut());
        self.pool.put(buf);
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
