//! Error types for the session layer.

use crate::ConnectionId;

/// Errors reported by a login session or its factory.
///
/// The connection core never retries on these. It logs them and lets the
/// next maintenance cycle (or the peer's own disconnect) settle the state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session could not be built around the accepted stream.
    #[error("failed to construct session for {0}: {1}")]
    Construction(ConnectionId, String),

    /// The handshake task could not be started.
    #[error("failed to start session {0}: {1}")]
    StartFailed(ConnectionId, String),

    /// Writing to the peer failed (keep-alive or handshake frame).
    #[error("send failed on {0}: {1}")]
    SendFailed(ConnectionId, String),

    /// The session is already closed or disposed.
    #[error("session {0} is closed")]
    Closed(ConnectionId),
}

/// Errors from the session-marker store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing database could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The database rejected the update.
    #[error("storage query failed: {0}")]
    Query(String),
}
