//! Identity and status types shared by the session layer and the core.

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Core-assigned identifier of one accepted connection.
///
/// Assigned once per accepted stream from a strictly increasing counter and
/// never reused for the lifetime of the process, even when the session for
/// that stream fails to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Authenticated player identity (the GPCM profile id).
///
/// Only known once a session's handshake has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// LoginStatus
// ---------------------------------------------------------------------------

/// Progress of a session's login handshake.
///
/// ```text
/// InProgress ──(handshake succeeded)──→ Completed
/// ```
///
/// The transition happens once and never reverses. `Completed` implies the
/// session's identity is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    InProgress,
    Completed,
}

impl LoginStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

// ---------------------------------------------------------------------------
// DisconnectReason
// ---------------------------------------------------------------------------

/// Why the server (or the peer) ended a session.
///
/// The numeric code is what a session writes into its farewell frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DisconnectReason {
    /// The client closed the connection or logged out.
    ClientClosed = 0,
    /// The handshake did not complete within the login timeout.
    LoginTimedOut = 1,
    /// A newer login for the same identity displaced this session.
    Superseded = 2,
    /// An operator or another subsystem requested the logout.
    ForcedLogout = 3,
    /// The server is shutting down.
    ServerShutdown = 4,
    /// The peer violated the handshake protocol.
    ProtocolError = 5,
}

impl DisconnectReason {
    /// Wire-level reason code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClientClosed => "client closed",
            Self::LoginTimedOut => "login timed out",
            Self::Superseded => "superseded by a newer login",
            Self::ForcedLogout => "forced logout",
            Self::ServerShutdown => "server shutdown",
            Self::ProtocolError => "protocol error",
        };
        f.write_str(name)
    }
}
