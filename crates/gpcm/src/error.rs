//! Unified error type for the GPCM server.

use gpcm_session::{ConnectionId, SessionError, StorageError};
use gpcm_transport::TransportError;

/// Invariant violations detected by the connection registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A connection id was registered twice. Ids come from a strictly
    /// increasing counter, so this indicates a bug.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GpcmError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A session-level error (construction, start, keep-alive).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A session-marker storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A registry invariant violation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The server has already been shut down.
    #[error("server has been shut down")]
    ShutDown,

    /// The global tracing subscriber could not be installed.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
